use crate::messages::Message;
use crate::tools::ToolDefinition;

/// Everything sent to a provider for one invocation.
#[derive(Clone, Debug, Default)]
pub struct LlmContext {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

impl LlmContext {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Single user prompt with no tools, used for one-shot agents.
    pub fn single_shot(system_prompt: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            messages: vec![Message::user_text(prompt)],
            tools: Vec::new(),
        }
    }
}
