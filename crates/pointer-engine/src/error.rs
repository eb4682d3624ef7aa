use pointer_core::errors::GatewayError;
use pointer_core::ids::ConversationId;
use pointer_store::StoreError;

use crate::workflow::WorkflowError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    #[error("message must not be empty")]
    EmptyMessage,

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("provider error: {0}")]
    Provider(#[from] GatewayError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}
