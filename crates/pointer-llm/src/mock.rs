use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use serde_json::Value;

use pointer_core::context::LlmContext;
use pointer_core::errors::GatewayError;
use pointer_core::ids::ToolCallId;
use pointer_core::messages::{AssistantContent, AssistantMessage, StopReason, ToolCallBlock};
use pointer_core::provider::{EventStream, LlmProvider, StreamOptions};
use pointer_core::stream::StreamEvent;

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    /// Yield a sequence of StreamEvents.
    Stream(Vec<StreamEvent>),
    /// Return an error from the stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn stream_text(text: &str) -> Self {
        Self::message(AssistantMessage::text(text))
    }

    /// A round that calls one tool and says nothing.
    pub fn tool_call(name: &str, arguments: Value) -> Self {
        Self::tool_calls(None, vec![(name, arguments)])
    }

    /// A round with optional leading text and any number of tool calls.
    pub fn tool_calls(text: Option<&str>, calls: Vec<(&str, Value)>) -> Self {
        let mut content = Vec::new();
        if let Some(text) = text {
            content.push(AssistantContent::Text { text: text.to_string() });
        }
        for (name, arguments) in calls {
            content.push(AssistantContent::ToolCall(ToolCallBlock {
                id: ToolCallId::new(),
                name: name.to_string(),
                arguments,
            }));
        }
        Self::message(AssistantMessage {
            content,
            stop_reason: Some(StopReason::ToolUse),
        })
    }

    /// Stream events for a complete message, the way a provider would emit them.
    pub fn message(message: AssistantMessage) -> Self {
        let mut events = vec![StreamEvent::Start];
        for block in &message.content {
            match block {
                AssistantContent::Text { text } => {
                    events.push(StreamEvent::TextStart);
                    events.push(StreamEvent::TextDelta { delta: text.clone() });
                    events.push(StreamEvent::TextEnd { text: text.clone() });
                }
                AssistantContent::ToolCall(tc) => {
                    events.push(StreamEvent::ToolCallStart {
                        tool_call_id: tc.id.clone(),
                        name: tc.name.clone(),
                    });
                    events.push(StreamEvent::ToolCallEnd { tool_call: tc.clone() });
                }
            }
        }
        let stop_reason = message.stop_reason.unwrap_or(StopReason::EndTurn);
        events.push(StreamEvent::Done { message, stop_reason });
        Self::Stream(events)
    }

    /// A stream that ends with an error event.
    pub fn stream_error(error: GatewayError) -> Self {
        Self::Stream(vec![StreamEvent::Start, StreamEvent::Error { error }])
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence and
/// records every context it was asked to answer.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    contexts: Mutex<Vec<LlmContext>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            contexts: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn contexts(&self) -> Vec<LlmContext> {
        self.contexts.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream(
        &self,
        context: &LlmContext,
        _options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.contexts.lock().push(context.clone());

        let response = self.responses.lock().pop_front();
        let Some(response) = response else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };

        resolve_response(response).await
    }
}

/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<EventStream, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}
