use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use pointer_core::domain::{MessageRole, MessageStatus};
use pointer_core::ids::{ConversationId, MessageId, ProjectId};
use pointer_core::signals::{MessageSent, Signal};
use pointer_store::{MessageScope, NewMessage, ProjectStore, TurnStatus};

use crate::error::EngineError;
use crate::orchestrator::FAILURE_APOLOGY;
use crate::workflow::{CancelOutcome, TurnHandler, WorkflowEngine, WorkflowError};

pub type TurnHandle = JoinHandle<Result<TurnStatus, WorkflowError>>;

/// A started turn.
pub struct Submission {
    /// The assistant placeholder the turn will fill in.
    pub message_id: MessageId,
    pub handle: TurnHandle,
}

/// Entry point for user actions: start turns, cancel them.
#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn ProjectStore>,
    engine: WorkflowEngine,
    handler: Arc<dyn TurnHandler>,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        engine: WorkflowEngine,
        handler: Arc<dyn TurnHandler>,
    ) -> Self {
        Self {
            store,
            engine,
            handler,
        }
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Record the user's message and start a turn answering it. Turns still
    /// processing in the same conversation are cancelled first.
    #[instrument(skip(self, text), fields(conversation_id = %conversation_id))]
    pub async fn send_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<Submission, EngineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::EmptyMessage);
        }
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| EngineError::ConversationNotFound(conversation_id.clone()))?;

        let scope = MessageScope::Conversation(conversation_id.clone());
        for message in self.store.get_processing_messages(&scope).await? {
            self.cancel_turn(&message.id).await?;
        }

        self.store
            .create_message(NewMessage {
                conversation_id: conversation_id.clone(),
                project_id: conversation.project_id.clone(),
                role: MessageRole::User,
                content: text.to_string(),
                status: MessageStatus::Completed,
            })
            .await?;
        let placeholder = self
            .store
            .create_message(NewMessage {
                conversation_id: conversation_id.clone(),
                project_id: conversation.project_id.clone(),
                role: MessageRole::Assistant,
                content: String::new(),
                status: MessageStatus::Processing,
            })
            .await?;

        let event = MessageSent {
            message_id: placeholder.id.clone(),
            conversation_id: conversation_id.clone(),
            project_id: conversation.project_id,
            user_text: text.to_string(),
        };
        let handle = self.engine.spawn_turn(Arc::clone(&self.handler), event)?;
        info!(message_id = %placeholder.id, "turn started");
        Ok(Submission {
            message_id: placeholder.id,
            handle,
        })
    }

    /// Cancel every processing assistant message in the project.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn cancel_project(&self, project_id: &ProjectId) -> Result<Vec<MessageId>, EngineError> {
        let scope = MessageScope::Project(project_id.clone());
        let processing = self.store.get_processing_messages(&scope).await?;
        let mut cancelled = Vec::with_capacity(processing.len());
        for message in processing {
            self.cancel_turn(&message.id).await?;
            cancelled.push(message.id);
        }
        info!(count = cancelled.len(), "project turns cancelled");
        Ok(cancelled)
    }

    /// Cancel one turn. Returns whether a turn was told to stop.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub async fn cancel_message(&self, message_id: &MessageId) -> Result<bool, EngineError> {
        let outcome = self.engine.cancel(message_id)?;
        match outcome {
            CancelOutcome::Signalled => {}
            CancelOutcome::Deferred => {
                self.engine
                    .settle_deferred(Arc::clone(&self.handler), message_id)?;
            }
            CancelOutcome::AlreadyTerminal | CancelOutcome::Unknown => return Ok(false),
        }
        self.store
            .update_message_status(message_id, MessageStatus::Cancelled)
            .await?;
        Ok(true)
    }

    /// Apply a signal produced elsewhere.
    pub async fn handle_signal(&self, signal: Signal) -> Result<Option<TurnHandle>, EngineError> {
        match signal {
            Signal::MessageSent(event) => Ok(Some(
                self.engine.spawn_turn(Arc::clone(&self.handler), event)?,
            )),
            Signal::MessageCancel(cancel) => {
                self.cancel_message(&cancel.message_id).await?;
                Ok(None)
            }
        }
    }

    /// Re-drive turns a previous process left unfinished.
    pub fn resume(&self) -> Result<Vec<TurnHandle>, EngineError> {
        Ok(self.engine.resume_pending(Arc::clone(&self.handler))?)
    }

    /// Cancel the turn behind a message the store shows as processing.
    async fn cancel_turn(&self, message_id: &MessageId) -> Result<(), EngineError> {
        match self.engine.cancel(message_id)? {
            CancelOutcome::Signalled => {}
            CancelOutcome::Deferred => {
                self.engine
                    .settle_deferred(Arc::clone(&self.handler), message_id)?;
            }
            CancelOutcome::AlreadyTerminal => {
                warn!(%message_id, "message still processing but its turn already finished");
            }
            CancelOutcome::Unknown => {
                warn!(%message_id, "processing message has no turn; closing it");
                self.store
                    .update_message_content(message_id, FAILURE_APOLOGY)
                    .await?;
            }
        }
        self.store
            .update_message_status(message_id, MessageStatus::Cancelled)
            .await?;
        Ok(())
    }
}
