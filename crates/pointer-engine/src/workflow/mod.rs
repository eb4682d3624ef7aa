//! Durable turn execution: named steps journaled in SQLite, timed
//! suspension, retries with backoff and cancellation keyed by message id.

pub mod engine;
pub mod error;
pub mod step;

pub use engine::{CancelOutcome, TurnFailure, TurnHandler, WorkflowEngine};
pub use error::{StepError, WorkflowError};
pub use step::{RetryPolicy, StepContext};
