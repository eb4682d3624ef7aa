use serde::{Deserialize, Serialize};

/// Tool definition sent to the model as part of the context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Text handed back to the model for one tool call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// Error payloads always read `Error: <reason>` so the model can self-correct.
    pub fn error(reason: impl std::fmt::Display) -> Self {
        Self {
            content: format!("Error: {reason}"),
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_prefix() {
        let out = ToolOutput::error("file not found: file_1");
        assert_eq!(out.content, "Error: file not found: file_1");
        assert!(out.is_error);
        assert!(!ToolOutput::ok("[]").is_error);
    }
}
