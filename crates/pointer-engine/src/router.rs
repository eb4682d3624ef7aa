use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use pointer_core::context::LlmContext;
use pointer_core::messages::{AssistantMessage, Message, ToolCallBlock};
use pointer_core::provider::{LlmProvider, StreamOptions};

use crate::tools::ProjectTools;
use crate::workflow::{StepContext, StepError, WorkflowError};

pub const DEFAULT_MAX_ROUNDS: u32 = 20;
pub const FALLBACK_ANSWER: &str = "I've completed the requested changes.";

#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub max_rounds: u32,
    /// Answer used when the ceiling is hit and no round produced text.
    pub fallback_text: String,
    pub stream_options: StreamOptions,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            fallback_text: FALLBACK_ANSWER.to_string(),
            stream_options: StreamOptions::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteDecision {
    Stop,
    Continue,
}

/// Routing rule: a round with text and no tool call ends the run.
///
/// This does not tell "done" apart from commentary next to a forgotten tool
/// call; a text-only round always stops, and any tool call keeps going.
pub fn route(round: &AssistantMessage) -> RouteDecision {
    if round.has_text() && !round.has_tool_calls() {
        RouteDecision::Stop
    } else {
        RouteDecision::Continue
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishReason {
    Completed,
    RoundLimit,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalAnswer {
    pub text: String,
    pub rounds: u32,
    pub reason: FinishReason,
}

/// One coding agent driven round by round until the routing rule stops it.
pub struct AgentNetwork {
    provider: Arc<dyn LlmProvider>,
    tools: ProjectTools,
    system_prompt: String,
    config: RouterConfig,
}

impl AgentNetwork {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: ProjectTools,
        system_prompt: impl Into<String>,
        config: RouterConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            system_prompt: system_prompt.into(),
            config,
        }
    }

    /// Run rounds over `history` followed by `input`. Each model call is the
    /// step `agent-round-<n>`; tool calls are resolved before the next round.
    #[instrument(skip_all, fields(turn_id = %step.turn_id(), max_rounds = self.config.max_rounds))]
    pub async fn run(
        &self,
        step: &StepContext,
        history: Vec<Message>,
        input: &str,
    ) -> Result<FinalAnswer, WorkflowError> {
        let mut messages = history;
        messages.push(Message::user_text(input));
        let definitions = self.tools.definitions();
        let mut last_text: Option<String> = None;

        for round in 1..=self.config.max_rounds {
            step.checkpoint()?;
            let context = LlmContext {
                system_prompt: Some(self.system_prompt.clone()),
                messages: messages.clone(),
                tools: definitions.clone(),
            };
            let context = &context;
            let provider = &self.provider;
            let options = &self.config.stream_options;
            let reply: AssistantMessage = step
                .run(&format!("agent-round-{round}"), move || async move {
                    provider.complete(context, options).await.map_err(StepError::from)
                })
                .await?;

            if reply.has_text() {
                last_text = Some(reply.text_content());
            }
            let decision = route(&reply);
            let calls: Vec<ToolCallBlock> = reply.tool_calls().into_iter().cloned().collect();
            debug!(round, tool_calls = calls.len(), ?decision, "round finished");
            if reply.is_empty() {
                warn!(round, "agent returned an empty round");
            } else {
                messages.push(Message::Assistant(reply));
            }

            for call in &calls {
                step.checkpoint()?;
                let output = self.tools.invoke(step, call).await?;
                messages.push(Message::tool_result(call.id.clone(), output.content, output.is_error));
            }

            if decision == RouteDecision::Stop {
                info!(rounds = round, "agent finished");
                return Ok(FinalAnswer {
                    text: last_text.unwrap_or_default(),
                    rounds: round,
                    reason: FinishReason::Completed,
                });
            }
        }

        warn!(rounds = self.config.max_rounds, "round ceiling reached");
        Ok(FinalAnswer {
            text: last_text.unwrap_or_else(|| self.config.fallback_text.clone()),
            rounds: self.config.max_rounds,
            reason: FinishReason::RoundLimit,
        })
    }
}
