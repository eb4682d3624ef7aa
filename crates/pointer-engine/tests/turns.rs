use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use pointer_core::domain::{Conversation, MessageRole, MessageStatus, StoredMessage};
use pointer_core::errors::GatewayError;
use pointer_core::ids::{ConversationId, MessageId, ProjectId};
use pointer_core::messages::Message;
use pointer_core::signals::MessageSent;
use pointer_engine::{
    MessageService, PageFetcher, ProcessMessage, RetryPolicy, TurnConfig, WorkflowEngine,
    FAILURE_APOLOGY, FALLBACK_ANSWER,
};
use pointer_llm::{MockProvider, MockResponse};
use pointer_store::{
    Database, MessageScope, NewFile, NewMessage, ProjectStore, SqliteProjectStore, TurnStatus,
};

struct NoFetch;

#[async_trait]
impl PageFetcher for NoFetch {
    async fn fetch_page(&self, _url: &str) -> Option<String> {
        None
    }
}

struct Harness {
    db: Database,
    store: SqliteProjectStore,
    provider: Arc<MockProvider>,
    service: MessageService,
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
    }
}

fn quick_config() -> TurnConfig {
    TurnConfig {
        read_after_write_delay: Duration::ZERO,
        ..TurnConfig::default()
    }
}

fn harness_on(db: Database, responses: Vec<MockResponse>, config: TurnConfig) -> Harness {
    let store = SqliteProjectStore::new(db.clone());
    let provider = Arc::new(MockProvider::new(responses));
    let handler = Arc::new(ProcessMessage::new(
        Arc::new(store.clone()),
        provider.clone(),
        Arc::new(NoFetch),
        config,
    ));
    let engine = WorkflowEngine::new(db.clone(), fast_policy());
    let service = MessageService::new(Arc::new(store.clone()), engine, handler);
    Harness {
        db,
        store,
        provider,
        service,
    }
}

fn harness(responses: Vec<MockResponse>) -> Harness {
    harness_on(Database::in_memory().unwrap(), responses, quick_config())
}

/// A project with a conversation that already has a title, so no title agent runs.
fn titled_conversation(h: &Harness) -> (ProjectId, Conversation) {
    let project = h.store.create_project("site").unwrap();
    let conversation = h
        .store
        .create_conversation(&project, Some("Existing work"))
        .unwrap();
    (project, conversation)
}

fn message(h: &Harness, id: &MessageId) -> StoredMessage {
    h.store.get_message(id).unwrap().unwrap()
}

async fn wait_for_calls(provider: &MockProvider, calls: usize) {
    while provider.call_count() < calls {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn rename_with_wrong_id_recovers() {
    let h = harness(Vec::new());
    let (project, conversation) = titled_conversation(&h);
    let created = h
        .store
        .create_files(
            &project,
            None,
            &[NewFile {
                name: "helpers.ts".into(),
                content: "export {}".into(),
            }],
        )
        .await
        .unwrap();
    let file_id = created[0].file_id.clone().unwrap();

    h.provider.push(MockResponse::tool_call(
        "renameFile",
        json!({"fileId": "file_does_not_exist", "newName": "utils.ts"}),
    ));
    h.provider.push(MockResponse::tool_call(
        "renameFile",
        json!({"fileId": file_id.as_str(), "newName": "utils.ts"}),
    ));
    h.provider
        .push(MockResponse::stream_text("Renamed helpers.ts to utils.ts."));

    let submission = h
        .service
        .send_message(&conversation.id, "rename helpers.ts to utils.ts")
        .await
        .unwrap();
    let status = submission.handle.await.unwrap().unwrap();
    assert_eq!(status, TurnStatus::Completed);

    let contexts = h.provider.contexts();
    assert_eq!(contexts.len(), 3);
    match contexts[1].messages.last() {
        Some(Message::ToolResult { content, is_error, .. }) => {
            assert!(is_error);
            assert!(content.starts_with("Error: file not found"), "{content}");
        }
        other => panic!("expected tool result, got {other:?}"),
    }

    let answer = message(&h, &submission.message_id);
    assert_eq!(answer.content, "Renamed helpers.ts to utils.ts.");
    assert_eq!(answer.status, MessageStatus::Completed);
    let file = h.store.get_file(&file_id).await.unwrap().unwrap();
    assert_eq!(file.name, "utils.ts");
}

#[tokio::test]
async fn invalid_tool_arguments_do_not_abort_the_turn() {
    let h = harness(vec![
        MockResponse::tool_call("deleteFiles", json!({"fileIds": []})),
        MockResponse::stream_text("Nothing to delete."),
    ]);
    let (_, conversation) = titled_conversation(&h);

    let submission = h
        .service
        .send_message(&conversation.id, "delete everything")
        .await
        .unwrap();
    assert_eq!(
        submission.handle.await.unwrap().unwrap(),
        TurnStatus::Completed
    );
    assert_eq!(message(&h, &submission.message_id).content, "Nothing to delete.");
}

#[tokio::test(start_paused = true)]
async fn cancel_during_round_three_stops_the_turn() {
    let h = harness_on(
        Database::in_memory().unwrap(),
        vec![
            MockResponse::tool_call("listFiles", json!({})),
            MockResponse::tool_call("listFiles", json!({})),
            MockResponse::delayed(
                Duration::from_secs(30),
                MockResponse::tool_call("listFiles", json!({})),
            ),
            MockResponse::stream_text("never sent"),
        ],
        TurnConfig::default(),
    );
    let (_, conversation) = titled_conversation(&h);

    let submission = h
        .service
        .send_message(&conversation.id, "list my files a few times")
        .await
        .unwrap();
    wait_for_calls(&h.provider, 3).await;
    assert!(h.service.cancel_message(&submission.message_id).await.unwrap());

    let status = submission.handle.await.unwrap().unwrap();
    assert_eq!(status, TurnStatus::Cancelled);
    assert_eq!(h.provider.call_count(), 3);

    let stored = message(&h, &submission.message_id);
    assert_eq!(stored.content, FAILURE_APOLOGY);
    assert_eq!(stored.status, MessageStatus::Cancelled);

    let steps = h.service.engine().steps().list(&submission.message_id).unwrap();
    assert!(steps.iter().all(|s| s.key != "agent-round-4"));
    assert_eq!(
        steps
            .iter()
            .filter(|s| s.key == "update-message-on-failure")
            .count(),
        1
    );
    assert!(!h.service.cancel_message(&submission.message_id).await.unwrap());
}

#[tokio::test]
async fn round_ceiling_falls_back() {
    let responses = (0..20)
        .map(|_| MockResponse::tool_call("listFiles", json!({})))
        .collect();
    let h = harness(responses);
    let (_, conversation) = titled_conversation(&h);

    let submission = h
        .service
        .send_message(&conversation.id, "keep looking")
        .await
        .unwrap();
    assert_eq!(
        submission.handle.await.unwrap().unwrap(),
        TurnStatus::Completed
    );
    assert_eq!(h.provider.call_count(), 20);
    let stored = message(&h, &submission.message_id);
    assert_eq!(stored.content, FALLBACK_ANSWER);
    assert_eq!(stored.status, MessageStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn resumed_turn_replays_recorded_steps() {
    let db = Database::in_memory().unwrap();
    let first = harness_on(
        db.clone(),
        vec![
            MockResponse::tool_call(
                "createFiles",
                json!({"files": [{"name": "index.html", "content": "<h1>hi</h1>"}]}),
            ),
            MockResponse::delayed(Duration::from_secs(3600), MockResponse::stream_text("lost")),
        ],
        quick_config(),
    );
    let (project, conversation) = titled_conversation(&first);

    let submission = first
        .service
        .send_message(&conversation.id, "create an index page")
        .await
        .unwrap();
    wait_for_calls(&first.provider, 2).await;
    // The process dies while round 2 is in flight.
    submission.handle.abort();
    let _ = submission.handle.await;

    let second = harness_on(
        first.db.clone(),
        vec![MockResponse::stream_text("Created index.html.")],
        quick_config(),
    );
    let handles = second.service.resume().unwrap();
    assert_eq!(handles.len(), 1);
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), TurnStatus::Completed);
    }

    assert_eq!(second.provider.call_count(), 1);
    let files = second.store.list_files(&project).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(
        message(&second, &submission.message_id).content,
        "Created index.html."
    );

    let turn = second
        .service
        .engine()
        .turns()
        .get(&submission.message_id)
        .unwrap()
        .unwrap();
    assert_eq!(turn.runs, 2);
}

#[tokio::test(start_paused = true)]
async fn new_message_cancels_the_previous_turn() {
    let h = harness_on(
        Database::in_memory().unwrap(),
        vec![
            MockResponse::delayed(Duration::from_secs(600), MockResponse::stream_text("first answer")),
            MockResponse::stream_text("second answer"),
        ],
        quick_config(),
    );
    let (_, conversation) = titled_conversation(&h);

    let first = h
        .service
        .send_message(&conversation.id, "build a landing page")
        .await
        .unwrap();
    wait_for_calls(&h.provider, 1).await;

    let second = h
        .service
        .send_message(&conversation.id, "actually, build a blog")
        .await
        .unwrap();
    assert_eq!(
        message(&h, &first.message_id).status,
        MessageStatus::Cancelled
    );

    assert_eq!(second.handle.await.unwrap().unwrap(), TurnStatus::Completed);
    assert_eq!(first.handle.await.unwrap().unwrap(), TurnStatus::Cancelled);

    let first_msg = message(&h, &first.message_id);
    assert_eq!(first_msg.content, FAILURE_APOLOGY);
    assert_eq!(first_msg.status, MessageStatus::Cancelled);
    let second_msg = message(&h, &second.message_id);
    assert_eq!(second_msg.content, "second answer");
    assert_eq!(second_msg.status, MessageStatus::Completed);

    let processing = h
        .store
        .get_processing_messages(&MessageScope::Conversation(conversation.id.clone()))
        .await
        .unwrap();
    assert!(processing.is_empty());
}

#[tokio::test]
async fn default_title_is_generated() {
    let h = harness(vec![
        MockResponse::stream_text("\"Landing page hero\""),
        MockResponse::stream_text("Added a hero section."),
    ]);
    let project = h.store.create_project("site").unwrap();
    let conversation = h.store.create_conversation(&project, None).unwrap();

    let submission = h
        .service
        .send_message(&conversation.id, "add a hero section to the landing page")
        .await
        .unwrap();
    submission.handle.await.unwrap().unwrap();

    let titled = h.store.get_conversation(&conversation.id).await.unwrap().unwrap();
    assert_eq!(titled.title, "Landing page hero");
    let title_context = &h.provider.contexts()[0];
    assert!(title_context.tools.is_empty());
}

#[tokio::test]
async fn title_failure_is_skipped() {
    let h = harness(vec![
        MockResponse::Error(GatewayError::InvalidRequest("bad title request".into())),
        MockResponse::stream_text("Done."),
    ]);
    let project = h.store.create_project("site").unwrap();
    let conversation = h.store.create_conversation(&project, None).unwrap();

    let submission = h
        .service
        .send_message(&conversation.id, "tidy up")
        .await
        .unwrap();
    assert_eq!(
        submission.handle.await.unwrap().unwrap(),
        TurnStatus::Completed
    );
    let titled = h.store.get_conversation(&conversation.id).await.unwrap().unwrap();
    assert!(titled.has_default_title());
    assert_eq!(message(&h, &submission.message_id).content, "Done.");
}

#[tokio::test]
async fn missing_conversation_fails_without_retry() {
    let h = harness(Vec::new());
    let (project, conversation) = titled_conversation(&h);
    let placeholder = h
        .store
        .create_message(pointer_store::NewMessage {
            conversation_id: conversation.id.clone(),
            project_id: project.clone(),
            role: pointer_core::domain::MessageRole::Assistant,
            content: String::new(),
            status: MessageStatus::Processing,
        })
        .await
        .unwrap();

    let event = MessageSent {
        message_id: placeholder.id.clone(),
        conversation_id: ConversationId::from_raw("conv_gone"),
        project_id: project,
        user_text: "hello".into(),
    };
    let status = h
        .service
        .handle_signal(pointer_core::signals::Signal::MessageSent(event))
        .await
        .unwrap()
        .unwrap()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, TurnStatus::Failed);
    assert_eq!(h.provider.call_count(), 0);

    let step = h
        .service
        .engine()
        .steps()
        .get(&placeholder.id, "get-conversation")
        .unwrap()
        .unwrap();
    assert_eq!(step.attempts, 1);
    let stored = message(&h, &placeholder.id);
    assert_eq!(stored.content, FAILURE_APOLOGY);
    assert_eq!(stored.status, MessageStatus::Completed);
}

#[tokio::test]
async fn send_rejects_bad_input() {
    let h = harness(Vec::new());
    let (_, conversation) = titled_conversation(&h);
    assert!(matches!(
        h.service.send_message(&conversation.id, "   ").await,
        Err(pointer_engine::EngineError::EmptyMessage)
    ));
    assert!(matches!(
        h.service
            .send_message(&ConversationId::from_raw("conv_missing"), "hi")
            .await,
        Err(pointer_engine::EngineError::ConversationNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn cancel_project_reports_cancelled_ids() {
    let h = harness_on(
        Database::in_memory().unwrap(),
        vec![MockResponse::delayed(
            Duration::from_secs(60),
            MockResponse::stream_text("late"),
        )],
        quick_config(),
    );
    let (project, conversation) = titled_conversation(&h);
    let submission = h
        .service
        .send_message(&conversation.id, "work slowly")
        .await
        .unwrap();
    wait_for_calls(&h.provider, 1).await;

    let cancelled = h.service.cancel_project(&project).await.unwrap();
    assert_eq!(cancelled, vec![submission.message_id.clone()]);
    assert_eq!(submission.handle.await.unwrap().unwrap(), TurnStatus::Cancelled);

    let idle = h.store.create_project("idle").unwrap();
    assert!(h.service.cancel_project(&idle).await.unwrap().is_empty());
}

/// An assistant placeholder as an earlier process would have left it.
async fn processing_placeholder(h: &Harness, conversation: &Conversation) -> StoredMessage {
    h.store
        .create_message(NewMessage {
            conversation_id: conversation.id.clone(),
            project_id: conversation.project_id.clone(),
            role: MessageRole::Assistant,
            content: String::new(),
            status: MessageStatus::Processing,
        })
        .await
        .unwrap()
}

async fn wait_for_turn_end(h: &Harness, id: &MessageId) -> TurnStatus {
    loop {
        let row = h.service.engine().turns().get(id).unwrap().unwrap();
        if row.status.is_terminal() {
            return row.status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn cancelling_a_stranded_turn_writes_the_apology() {
    let h = harness(vec![MockResponse::stream_text("never asked")]);
    let (project, conversation) = titled_conversation(&h);
    let placeholder = processing_placeholder(&h, &conversation).await;
    h.service
        .engine()
        .turns()
        .create_or_get(&MessageSent {
            message_id: placeholder.id.clone(),
            conversation_id: conversation.id.clone(),
            project_id: project.clone(),
            user_text: "left behind".into(),
        })
        .unwrap();

    let cancelled = h.service.cancel_project(&project).await.unwrap();
    assert_eq!(cancelled, vec![placeholder.id.clone()]);
    assert_eq!(wait_for_turn_end(&h, &placeholder.id).await, TurnStatus::Cancelled);

    let stored = message(&h, &placeholder.id);
    assert_eq!(stored.content, FAILURE_APOLOGY);
    assert_eq!(stored.status, MessageStatus::Cancelled);
    assert_eq!(h.provider.call_count(), 0);
    assert_eq!(h.service.engine().pending_cancel_count(), 0);
}

#[tokio::test]
async fn processing_message_without_a_turn_is_closed() {
    let h = harness(vec![]);
    let (project, conversation) = titled_conversation(&h);
    let placeholder = processing_placeholder(&h, &conversation).await;

    h.service.cancel_project(&project).await.unwrap();

    let stored = message(&h, &placeholder.id);
    assert_eq!(stored.content, FAILURE_APOLOGY);
    assert_eq!(stored.status, MessageStatus::Cancelled);
    assert!(h.service.engine().turns().get(&placeholder.id).unwrap().is_none());
    assert_eq!(h.service.engine().pending_cancel_count(), 0);
}

#[tokio::test]
async fn cancel_signal_for_unknown_message_is_a_no_op() {
    let h = harness(vec![]);
    for _ in 0..100 {
        assert!(!h.service.cancel_message(&MessageId::new()).await.unwrap());
    }
    assert_eq!(h.service.engine().pending_cancel_count(), 0);
}
