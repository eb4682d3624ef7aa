use serde::Deserialize;
use serde_json::Value;

use pointer_core::errors::GatewayError;
use pointer_core::ids::ToolCallId;
use pointer_core::messages::{AssistantContent, AssistantMessage, StopReason, ToolCallBlock};
use pointer_core::stream::StreamEvent;

/// State machine for parsing Anthropic SSE stream events.
#[derive(Default)]
pub struct SseParser {
    // Blocks in arrival order, so text and tool calls keep their interleaving.
    blocks: Vec<Block>,
    open: Option<usize>,
    stop_reason: Option<StopReason>,
}

enum Block {
    Text(String),
    Tool {
        id: String,
        name: String,
        arguments_json: String,
    },
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single SSE event and return zero or more StreamEvents.
    pub fn parse_event(&mut self, event_type: &str, data: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        match event_type {
            "message_start" => events.push(StreamEvent::Start),

            "content_block_start" => {
                if let Ok(block) = serde_json::from_str::<ContentBlockStartEvent>(data) {
                    match block.content_block.get("type").and_then(|t| t.as_str()) {
                        Some("text") => {
                            self.blocks.push(Block::Text(String::new()));
                            self.open = Some(self.blocks.len() - 1);
                            events.push(StreamEvent::TextStart);
                        }
                        Some("tool_use") => {
                            let id = string_field(&block.content_block, "id");
                            let name = string_field(&block.content_block, "name");
                            self.blocks.push(Block::Tool {
                                id: id.clone(),
                                name: name.clone(),
                                arguments_json: String::new(),
                            });
                            self.open = Some(self.blocks.len() - 1);
                            events.push(StreamEvent::ToolCallStart {
                                tool_call_id: ToolCallId::from_raw(id),
                                name,
                            });
                        }
                        _ => self.open = None,
                    }
                }
            }

            "content_block_delta" => {
                if let Ok(delta) = serde_json::from_str::<ContentBlockDeltaEvent>(data) {
                    let Some(block) = self.open.and_then(|i| self.blocks.get_mut(i)) else {
                        return events;
                    };
                    match (delta.delta.get("type").and_then(|t| t.as_str()), block) {
                        (Some("text_delta"), Block::Text(text)) => {
                            let piece = string_field(&delta.delta, "text");
                            text.push_str(&piece);
                            events.push(StreamEvent::TextDelta { delta: piece });
                        }
                        (Some("input_json_delta"), Block::Tool { id, arguments_json, .. }) => {
                            let partial = string_field(&delta.delta, "partial_json");
                            arguments_json.push_str(&partial);
                            events.push(StreamEvent::ToolCallDelta {
                                tool_call_id: ToolCallId::from_raw(id.as_str()),
                                arguments_delta: partial,
                            });
                        }
                        _ => {}
                    }
                }
            }

            "content_block_stop" => {
                if let Some(block) = self.open.take().and_then(|i| self.blocks.get(i)) {
                    match block {
                        Block::Text(text) => events.push(StreamEvent::TextEnd { text: text.clone() }),
                        Block::Tool { .. } => {
                            if let AssistantContent::ToolCall(tool_call) = block_content(block) {
                                events.push(StreamEvent::ToolCallEnd { tool_call });
                            }
                        }
                    }
                }
            }

            "message_delta" => {
                if let Ok(delta) = serde_json::from_str::<MessageDeltaEvent>(data) {
                    self.stop_reason = delta.delta.stop_reason.as_deref().and_then(map_stop_reason);
                }
            }

            "message_stop" => {
                let message = self.build_assistant_message();
                let stop_reason = message.stop_reason.unwrap_or(StopReason::EndTurn);
                events.push(StreamEvent::Done { message, stop_reason });
            }

            "error" => {
                if let Ok(err) = serde_json::from_str::<ErrorEvent>(data) {
                    events.push(StreamEvent::Error {
                        error: classify_error(&err),
                    });
                }
            }

            _ => {} // ping
        }

        events
    }

    fn build_assistant_message(&self) -> AssistantMessage {
        let content: Vec<AssistantContent> = self.blocks.iter().map(block_content).collect();
        let inferred = if content.iter().any(|c| matches!(c, AssistantContent::ToolCall(_))) {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        };
        AssistantMessage {
            content,
            stop_reason: Some(self.stop_reason.unwrap_or(inferred)),
        }
    }
}

fn block_content(block: &Block) -> AssistantContent {
    match block {
        Block::Text(text) => AssistantContent::Text { text: text.clone() },
        Block::Tool {
            id,
            name,
            arguments_json,
        } => {
            // Tools with no parameters stream no JSON at all.
            let arguments: Value = serde_json::from_str(arguments_json)
                .unwrap_or(Value::Object(serde_json::Map::new()));
            AssistantContent::ToolCall(ToolCallBlock {
                id: ToolCallId::from_raw(id.as_str()),
                name: name.clone(),
                arguments,
            })
        }
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn map_stop_reason(raw: &str) -> Option<StopReason> {
    match raw {
        "end_turn" => Some(StopReason::EndTurn),
        "tool_use" => Some(StopReason::ToolUse),
        "max_tokens" => Some(StopReason::MaxTokens),
        "stop_sequence" => Some(StopReason::StopSequence),
        _ => None,
    }
}

fn classify_error(err: &ErrorEvent) -> GatewayError {
    match err.error.error_type.as_str() {
        "overloaded_error" => GatewayError::ProviderOverloaded,
        "rate_limit_error" => GatewayError::RateLimited { retry_after: None },
        "authentication_error" | "permission_error" => {
            GatewayError::AuthenticationFailed(err.error.message.clone())
        }
        "invalid_request_error" | "not_found_error" => {
            GatewayError::InvalidRequest(err.error.message.clone())
        }
        _ => GatewayError::ServerError {
            status: 500,
            body: err.error.message.clone(),
        },
    }
}

/// Parse raw SSE text into (event_type, data) pairs.
pub fn parse_sse_lines(raw: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event = String::new();
    let mut current_data = String::new();

    for line in raw.lines() {
        if let Some(event) = line.strip_prefix("event:") {
            current_event = event.trim_start().to_string();
        } else if let Some(data) = line.strip_prefix("data:") {
            current_data = data.trim_start().to_string();
        } else if line.is_empty() && !current_event.is_empty() {
            events.push((
                std::mem::take(&mut current_event),
                std::mem::take(&mut current_data),
            ));
        }
    }

    if !current_event.is_empty() {
        events.push((current_event, current_data));
    }

    events
}

#[derive(Deserialize)]
struct ContentBlockStartEvent {
    content_block: Value,
}

#[derive(Deserialize)]
struct ContentBlockDeltaEvent {
    delta: Value,
}

#[derive(Deserialize)]
struct MessageDeltaEvent {
    delta: MessageDeltaPayload,
}

#[derive(Deserialize)]
struct MessageDeltaPayload {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorPayload,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
