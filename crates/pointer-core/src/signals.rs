//! Events that start and stop turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId, ProjectId};

pub const MESSAGE_SENT: &str = "message/sent";
pub const MESSAGE_CANCEL: &str = "message/cancel";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data")]
pub enum Signal {
    #[serde(rename = "message/sent")]
    MessageSent(MessageSent),
    #[serde(rename = "message/cancel")]
    MessageCancel(MessageCancel),
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageSent(_) => MESSAGE_SENT,
            Self::MessageCancel(_) => MESSAGE_CANCEL,
        }
    }

    /// Correlation id shared by a turn and its cancel requests.
    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::MessageSent(sent) => &sent.message_id,
            Self::MessageCancel(cancel) => &cancel.message_id,
        }
    }
}

/// Starts a turn answering `message_id` (the assistant placeholder).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSent {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub project_id: ProjectId,
    pub user_text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCancel {
    pub message_id: MessageId,
    pub timestamp: DateTime<Utc>,
}

impl MessageCancel {
    pub fn now(message_id: MessageId) -> Self {
        Self {
            message_id,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape() {
        let signal = Signal::MessageSent(MessageSent {
            message_id: MessageId::from_raw("msg_1"),
            conversation_id: ConversationId::from_raw("conv_1"),
            project_id: ProjectId::from_raw("proj_1"),
            user_text: "rename a.ts".into(),
        });
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["name"], "message/sent");
        assert_eq!(json["data"]["messageId"], "msg_1");
        assert_eq!(json["data"]["userText"], "rename a.ts");
        assert_eq!(signal.name(), MESSAGE_SENT);
    }

    #[test]
    fn cancel_parses_from_wire() {
        let raw = r#"{"name":"message/cancel","data":{"messageId":"msg_9","timestamp":"2026-01-01T00:00:00Z"}}"#;
        let signal: Signal = serde_json::from_str(raw).unwrap();
        assert_eq!(signal.message_id().as_str(), "msg_9");
        assert!(matches!(signal, Signal::MessageCancel(_)));
    }
}
