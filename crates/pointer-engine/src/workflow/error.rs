use pointer_core::errors::GatewayError;
use pointer_store::StoreError;

/// What a step body reports when it fails.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    #[error("{0}")]
    Retriable(String),
    #[error("{0}")]
    NonRetriable(String),
}

impl StepError {
    pub fn retriable(message: impl std::fmt::Display) -> Self {
        Self::Retriable(message.to_string())
    }

    pub fn non_retriable(message: impl std::fmt::Display) -> Self {
        Self::NonRetriable(message.to_string())
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable(_))
    }
}

impl From<StoreError> for StepError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            Self::Retriable(e.to_string())
        } else {
            Self::NonRetriable(e.to_string())
        }
    }
}

impl From<GatewayError> for StepError {
    fn from(e: GatewayError) -> Self {
        if e.is_retryable() {
            Self::Retriable(e.to_string())
        } else {
            Self::NonRetriable(e.to_string())
        }
    }
}

/// Why a turn, or a step inside it, stopped.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("{0}")]
    NonRetriable(String),

    #[error("step {step} failed after {attempts} attempts: {message}")]
    StepFailed {
        step: String,
        attempts: u32,
        message: String,
    },

    #[error("turn cancelled")]
    Cancelled,

    #[error("journal error: {0}")]
    Store(#[from] StoreError),

    #[error("step output serialization: {0}")]
    Serialization(String),
}

impl WorkflowError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_classified_by_kind() {
        assert!(StepError::from(StoreError::Database("locked".into())).is_retriable());
        assert!(!StepError::from(StoreError::NotFound("conversation".into())).is_retriable());
    }

    #[test]
    fn gateway_errors_classified_by_kind() {
        assert!(StepError::from(GatewayError::ProviderOverloaded).is_retriable());
        assert!(StepError::from(GatewayError::RateLimited { retry_after: None }).is_retriable());
        assert!(!StepError::from(GatewayError::NotConfigured("no key".into())).is_retriable());
        assert!(!StepError::from(GatewayError::InvalidRequest("bad".into())).is_retriable());
    }

    #[test]
    fn step_failed_message() {
        let err = WorkflowError::StepFailed {
            step: "agent-round-1".into(),
            attempts: 4,
            message: "network error: reset".into(),
        };
        assert_eq!(
            err.to_string(),
            "step agent-round-1 failed after 4 attempts: network error: reset"
        );
        assert!(!err.is_cancelled());
        assert!(WorkflowError::Cancelled.is_cancelled());
    }
}
