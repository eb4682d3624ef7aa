//! The turn function: everything that happens between a `message/sent`
//! signal and the assistant message reaching a terminal state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use pointer_core::context::LlmContext;
use pointer_core::domain::{Conversation, MessageRole, MessageStatus, StoredMessage};
use pointer_core::ids::MessageId;
use pointer_core::messages::Message;
use pointer_core::provider::{LlmProvider, StreamOptions};
use pointer_core::signals::MessageSent;
use pointer_store::ProjectStore;

use crate::prompts::{self, CODING_AGENT_PROMPT, TITLE_AGENT_PROMPT, URL_HINT};
use crate::router::{AgentNetwork, RouterConfig};
use crate::tools::{extract_urls, PageFetcher, ProjectTools, DEFAULT_TOOL_TIMEOUT};
use crate::workflow::{StepContext, StepError, TurnFailure, TurnHandler, WorkflowError};

pub const FAILURE_APOLOGY: &str = "My apologies, I encountered an error while processing your request. Let me know if you need anything else!";

const TITLE_MAX_TOKENS: u32 = 64;

#[derive(Clone, Debug)]
pub struct TurnConfig {
    /// Pause before the turn reads state written just before it started.
    pub read_after_write_delay: Duration,
    pub context_messages: usize,
    pub tool_timeout: Duration,
    pub router: RouterConfig,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            read_after_write_delay: Duration::from_secs(2),
            context_messages: 10,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            router: RouterConfig::default(),
        }
    }
}

/// Answers one user message with the coding agent.
pub struct ProcessMessage {
    store: Arc<dyn ProjectStore>,
    provider: Arc<dyn LlmProvider>,
    fetcher: Arc<dyn PageFetcher>,
    config: TurnConfig,
}

impl ProcessMessage {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        provider: Arc<dyn LlmProvider>,
        fetcher: Arc<dyn PageFetcher>,
        config: TurnConfig,
    ) -> Self {
        Self {
            store,
            provider,
            fetcher,
            config,
        }
    }

    /// Name an untitled conversation. Never fails the turn except on cancel.
    async fn maybe_title(&self, step: &StepContext, event: &MessageSent) -> Result<(), WorkflowError> {
        let provider = &self.provider;
        let text = &event.user_text;
        let generated = step
            .run("generate-title", move || async move {
                let context = LlmContext::single_shot(TITLE_AGENT_PROMPT, text.as_str());
                let options = StreamOptions {
                    max_tokens: Some(TITLE_MAX_TOKENS),
                    ..StreamOptions::default()
                };
                let reply = provider.complete(&context, &options).await?;
                Ok::<_, StepError>(prompts::normalize_title(&reply.text_content()))
            })
            .await;

        let title = match generated {
            Ok(Some(title)) => title,
            Ok(None) => {
                info!("title agent returned nothing usable");
                return Ok(());
            }
            Err(WorkflowError::Cancelled) => return Err(WorkflowError::Cancelled),
            Err(e) => {
                warn!(error = %e, "title generation failed");
                return Ok(());
            }
        };

        let store = &self.store;
        let title = &title;
        let updated = step
            .run("update-title", move || async move {
                store
                    .update_conversation_title(&event.conversation_id, title)
                    .await
                    .map_err(StepError::from)
            })
            .await;
        match updated {
            Ok(()) => {
                info!(%title, "conversation titled");
                Ok(())
            }
            Err(WorkflowError::Cancelled) => Err(WorkflowError::Cancelled),
            Err(e) => {
                warn!(error = %e, "title update failed");
                Ok(())
            }
        }
    }
}

/// Context for the agent: the newest `limit` non-empty messages before the
/// one being answered, oldest first.
pub fn build_history(
    recent: Vec<StoredMessage>,
    placeholder: &MessageId,
    user_text: &str,
    limit: usize,
) -> Vec<Message> {
    let mut kept: Vec<StoredMessage> = recent
        .into_iter()
        .filter(|m| m.id != *placeholder && !m.content.trim().is_empty())
        .collect();
    // The triggering user message is already in the store; the router adds it itself.
    if kept
        .last()
        .is_some_and(|m| m.role == MessageRole::User && m.content.trim() == user_text.trim())
    {
        kept.pop();
    }
    let skip = kept.len().saturating_sub(limit);
    kept.into_iter()
        .skip(skip)
        .map(|m| match m.role {
            MessageRole::User => Message::user_text(m.content),
            MessageRole::Assistant => Message::assistant_text(m.content),
        })
        .collect()
}

#[async_trait]
impl TurnHandler for ProcessMessage {
    #[instrument(skip_all, fields(turn_id = %event.message_id, conversation_id = %event.conversation_id))]
    async fn run(&self, step: &StepContext, event: &MessageSent) -> Result<(), WorkflowError> {
        step.sleep("wait-for-placeholder", self.config.read_after_write_delay)
            .await?;

        let store = &self.store;
        let conversation: Conversation = step
            .run("get-conversation", move || async move {
                let conversation = store
                    .get_conversation(&event.conversation_id)
                    .await?
                    .ok_or_else(|| {
                        StepError::non_retriable(format!(
                            "conversation not found: {}",
                            event.conversation_id
                        ))
                    })?;
                if conversation.project_id != event.project_id {
                    return Err(StepError::non_retriable(format!(
                        "conversation {} does not belong to project {}",
                        event.conversation_id, event.project_id
                    )));
                }
                Ok(conversation)
            })
            .await?;

        // One extra for the placeholder, one for the message being answered.
        let fetch = self.config.context_messages + 2;
        let recent: Vec<StoredMessage> = step
            .run("get-recent-messages", move || async move {
                store
                    .get_recent_messages(&event.conversation_id, fetch)
                    .await
                    .map_err(StepError::from)
            })
            .await?;
        let history = build_history(
            recent,
            &event.message_id,
            &event.user_text,
            self.config.context_messages,
        );

        if conversation.has_default_title() {
            self.maybe_title(step, event).await?;
        }

        let tools = ProjectTools::new(
            Arc::clone(&self.store),
            Arc::clone(&self.fetcher),
            event.project_id.clone(),
        )
        .with_timeout(self.config.tool_timeout);
        let mut system_prompt = CODING_AGENT_PROMPT.to_string();
        if !extract_urls(&event.user_text).is_empty() {
            system_prompt.push_str("\n\n");
            system_prompt.push_str(URL_HINT);
        }
        let network = AgentNetwork::new(
            Arc::clone(&self.provider),
            tools,
            system_prompt,
            self.config.router.clone(),
        );
        let answer = network.run(step, history, &event.user_text).await?;
        info!(rounds = answer.rounds, reason = ?answer.reason, "agent answered");

        let text = &answer.text;
        step.run("update-assistant-message", move || async move {
            store
                .update_message_content(&event.message_id, text)
                .await
                .map_err(StepError::from)
        })
        .await
    }

    #[instrument(skip_all, fields(turn_id = %event.message_id, cancelled = failure.cancelled))]
    async fn on_failure(
        &self,
        step: &StepContext,
        event: &MessageSent,
        failure: &TurnFailure,
    ) -> Result<(), WorkflowError> {
        let store = &self.store;
        let cancelled = failure.cancelled;
        step.run_once("update-message-on-failure", move || async move {
            store
                .update_message_content(&event.message_id, FAILURE_APOLOGY)
                .await?;
            if cancelled {
                store
                    .update_message_status(&event.message_id, MessageStatus::Cancelled)
                    .await?;
            }
            Ok(())
        })
        .await
    }
}
