use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::context::LlmContext;
use crate::errors::GatewayError;
use crate::messages::AssistantMessage;
use crate::stream::StreamEvent;

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Options controlling generation.
#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub stop_sequences: Vec<String>,
}

/// A text-generation capability that can also emit tool calls.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError>;

    /// Single-call variant: drive the stream to its final message.
    async fn complete(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<AssistantMessage, GatewayError> {
        let stream = self.stream(context, options).await?;
        collect_message(stream).await
    }
}

/// Drain a stream until `Done` or `Error`.
pub async fn collect_message(mut stream: EventStream) -> Result<AssistantMessage, GatewayError> {
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Done { mut message, stop_reason } => {
                message.stop_reason.get_or_insert(stop_reason);
                return Ok(message);
            }
            StreamEvent::Error { error } => return Err(error),
            _ => {}
        }
    }
    Err(GatewayError::StreamInterrupted(
        "stream ended before completion".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::StopReason;

    fn boxed(events: Vec<StreamEvent>) -> EventStream {
        Box::pin(futures::stream::iter(events))
    }

    #[tokio::test]
    async fn collects_done_message() {
        let stream = boxed(vec![
            StreamEvent::Start,
            StreamEvent::TextDelta { delta: "hi".into() },
            StreamEvent::Done {
                message: AssistantMessage {
                    stop_reason: None,
                    ..AssistantMessage::text("hi")
                },
                stop_reason: StopReason::EndTurn,
            },
        ]);
        let msg = collect_message(stream).await.unwrap();
        assert_eq!(msg.text_content(), "hi");
        assert_eq!(msg.stop_reason, Some(StopReason::EndTurn));
    }

    #[tokio::test]
    async fn surfaces_stream_error() {
        let stream = boxed(vec![
            StreamEvent::Start,
            StreamEvent::Error {
                error: GatewayError::ProviderOverloaded,
            },
        ]);
        let err = collect_message(stream).await.unwrap_err();
        assert!(matches!(err, GatewayError::ProviderOverloaded));
    }

    #[tokio::test]
    async fn truncated_stream_is_retryable() {
        let err = collect_message(boxed(vec![StreamEvent::Start])).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
