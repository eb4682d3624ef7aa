use serde_json::{json, Value};

use pointer_core::context::LlmContext;
use pointer_core::messages::{AssistantContent, AssistantMessage, Message};
use pointer_core::provider::StreamOptions;

pub const DEFAULT_MAX_TOKENS: u32 = 16_000;

/// Convert an LlmContext into the Anthropic Messages API request body.
pub fn build_request_body(context: &LlmContext, options: &StreamOptions, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "stream": true,
        "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
    });

    if let Some(temp) = options.temperature {
        body["temperature"] = json!(temp);
    }

    if !options.stop_sequences.is_empty() {
        body["stop_sequences"] = json!(options.stop_sequences);
    }

    if let Some(system) = context.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        body["system"] = json!(system);
    }

    body["messages"] = json!(convert_messages(&context.messages));

    if !context.tools.is_empty() {
        let tools: Vec<Value> = context
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters_schema,
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    body
}

/// Tool results travel inside user turns; consecutive results share one.
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();

    for msg in messages {
        match msg {
            Message::User { content } => {
                result.push(json!({
                    "role": "user",
                    "content": [{"type": "text", "text": content}],
                }));
            }
            Message::Assistant(asst) => {
                if let Some(converted) = convert_assistant_message(asst) {
                    result.push(converted);
                }
            }
            Message::ToolResult {
                tool_call_id,
                content,
                is_error,
            } => {
                let mut block = json!({
                    "type": "tool_result",
                    "tool_use_id": tool_call_id.as_str(),
                    "content": content,
                });
                if *is_error {
                    block["is_error"] = json!(true);
                }

                let previous_is_results = result.last().is_some_and(|m| {
                    m["role"] == "user"
                        && m["content"]
                            .as_array()
                            .and_then(|blocks| blocks.first())
                            .is_some_and(|b| b["type"] == "tool_result")
                });
                match result.last_mut() {
                    Some(last) if previous_is_results => {
                        if let Some(blocks) = last["content"].as_array_mut() {
                            blocks.push(block);
                        }
                    }
                    _ => result.push(json!({"role": "user", "content": [block]})),
                }
            }
        }
    }

    result
}

/// `None` when no block survives; the API rejects empty assistant turns.
fn convert_assistant_message(msg: &AssistantMessage) -> Option<Value> {
    let content: Vec<Value> = msg
        .content
        .iter()
        .filter_map(|c| match c {
            AssistantContent::Text { text } if text.trim().is_empty() => None,
            AssistantContent::Text { text } => Some(json!({"type": "text", "text": text})),
            AssistantContent::ToolCall(tc) => Some(json!({
                "type": "tool_use",
                "id": tc.id.as_str(),
                "name": tc.name,
                "input": tc.arguments,
            })),
        })
        .collect();

    if content.is_empty() {
        return None;
    }
    Some(json!({"role": "assistant", "content": content}))
}
