use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use pointer_core::ids::MessageId;
use pointer_store::{StepKind, StepRepo};

use super::error::{StepError, WorkflowError};

/// Backoff for retriable step failures.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the `attempt`-th failure (1-based), with +-20% jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max_delay.as_millis() as f64);
        let factor = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_millis((capped * factor) as u64)
    }
}

/// Handle a turn uses to run journaled steps.
///
/// Every call to [`run`](Self::run), [`run_once`](Self::run_once) or
/// [`sleep`](Self::sleep) is keyed by its name. Repeating a name within one
/// execution appends `:n`, so a re-driven turn that issues the same steps in
/// the same order lines up with its journal.
pub struct StepContext {
    turn_id: MessageId,
    steps: StepRepo,
    policy: RetryPolicy,
    cancel: CancellationToken,
    seen: Mutex<HashMap<String, u32>>,
}

impl StepContext {
    pub fn new(
        turn_id: MessageId,
        steps: StepRepo,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            turn_id,
            steps,
            policy,
            cancel,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn turn_id(&self) -> &MessageId {
        &self.turn_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Suspension point: fails with `Cancelled` once the turn's token fired.
    pub fn checkpoint(&self) -> Result<(), WorkflowError> {
        if self.cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }
        Ok(())
    }

    fn key_for(&self, name: &str) -> String {
        let mut seen = self.seen.lock();
        let count = seen.entry(name.to_string()).or_insert(0);
        let key = if *count == 0 {
            name.to_string()
        } else {
            format!("{name}:{count}")
        };
        *count += 1;
        key
    }

    /// Run `f` at most once for this turn, retrying retriable failures.
    pub async fn run<T, F, Fut>(&self, name: &str, f: F) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        let key = self.key_for(name);
        self.execute(&key, StepKind::Run, &self.policy, true, f).await
    }

    /// Single attempt, and not interrupted by cancellation. Used for the
    /// failure hook, which must run after the turn was cancelled.
    pub async fn run_once<T, F, Fut>(&self, name: &str, f: F) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        let key = self.key_for(name);
        self.execute(&key, StepKind::FailureHook, &RetryPolicy::single_attempt(), false, f)
            .await
    }

    /// Durable sleep. A replay skips it; a turn that crashed mid-sleep only
    /// waits out the remainder.
    pub async fn sleep(&self, name: &str, duration: Duration) -> Result<(), WorkflowError> {
        let key = self.key_for(name);
        self.checkpoint()?;

        if let Some(row) = self.steps.get(&self.turn_id, &key)? {
            if row.is_completed() {
                debug!(turn_id = %self.turn_id, step = %key, "sleep already elapsed");
                return Ok(());
            }
        }

        let requested = Utc::now()
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        let wake_at = self.steps.record_sleep(&self.turn_id, &key, requested)?;
        let remaining = (wake_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(turn_id = %self.turn_id, step = %key, remaining_ms = remaining.as_millis() as u64, "sleeping");

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(WorkflowError::Cancelled),
            _ = tokio::time::sleep(remaining) => {}
        }

        self.steps
            .record_success(&self.turn_id, &key, StepKind::Sleep, &Value::Null)?;
        self.checkpoint()
    }

    async fn execute<T, F, Fut>(
        &self,
        key: &str,
        kind: StepKind,
        policy: &RetryPolicy,
        cancellable: bool,
        mut f: F,
    ) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        if cancellable {
            self.checkpoint()?;
        }

        if let Some(row) = self.steps.get(&self.turn_id, key)? {
            if row.is_completed() {
                debug!(turn_id = %self.turn_id, step = %key, "replaying recorded step");
                return Ok(serde_json::from_value(row.output.unwrap_or(Value::Null))?);
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => {
                    let encoded = serde_json::to_value(&value)?;
                    self.steps.record_success(&self.turn_id, key, kind, &encoded)?;
                    debug!(turn_id = %self.turn_id, step = %key, attempt, "step completed");
                    return Ok(value);
                }
                Err(StepError::NonRetriable(message)) => {
                    self.steps.record_failure(&self.turn_id, key, kind, &message)?;
                    warn!(turn_id = %self.turn_id, step = %key, error = %message, "step failed permanently");
                    return Err(WorkflowError::NonRetriable(message));
                }
                Err(StepError::Retriable(message)) => {
                    self.steps.record_failure(&self.turn_id, key, kind, &message)?;
                    if attempt >= policy.max_attempts {
                        warn!(turn_id = %self.turn_id, step = %key, attempt, error = %message, "step retries exhausted");
                        return Err(WorkflowError::StepFailed {
                            step: key.to_string(),
                            attempts: attempt,
                            message,
                        });
                    }

                    let delay = policy.delay(attempt);
                    warn!(
                        turn_id = %self.turn_id,
                        step = %key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "retrying step"
                    );
                    if cancellable {
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => return Err(WorkflowError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    } else {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
