//! Durable agent turns: a journaled step engine, the round router for the
//! coding agent, the project-scoped tools it calls and the turn that ties
//! them together. Quick edits rewrite a code selection in one model call.

pub mod error;
pub mod orchestrator;
pub mod prompts;
pub mod quick_edit;
pub mod router;
pub mod service;
pub mod tools;
pub mod workflow;

pub use error::EngineError;
pub use orchestrator::{ProcessMessage, TurnConfig, FAILURE_APOLOGY};
pub use quick_edit::QuickEditService;
pub use router::{AgentNetwork, FinalAnswer, FinishReason, RouterConfig, FALLBACK_ANSWER};
pub use service::{MessageService, Submission, TurnHandle};
pub use tools::{FirecrawlFetcher, HttpPageFetcher, PageFetcher, ProjectTools, ToolError};
pub use workflow::{RetryPolicy, WorkflowEngine, WorkflowError};
