use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};

use pointer_core::ids::MessageId;
use pointer_core::signals::MessageSent;
use pointer_store::{Database, StepRepo, TurnRepo, TurnStatus};

use super::error::WorkflowError;
use super::step::{RetryPolicy, StepContext};

/// What went wrong, as handed to the failure hook.
#[derive(Clone, Debug)]
pub struct TurnFailure {
    pub error: String,
    pub cancelled: bool,
}

/// The function a turn executes, plus its failure hook.
#[async_trait]
pub trait TurnHandler: Send + Sync {
    async fn run(&self, step: &StepContext, event: &MessageSent) -> Result<(), WorkflowError>;

    /// Runs once when `run` fails or the turn is cancelled.
    async fn on_failure(
        &self,
        step: &StepContext,
        event: &MessageSent,
        failure: &TurnFailure,
    ) -> Result<(), WorkflowError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A live turn was told to stop.
    Signalled,
    /// The turn is processing but not running here yet; it will stop at its
    /// first step.
    Deferred,
    /// Nothing to do: the turn already finished.
    AlreadyTerminal,
    /// No turn is recorded under this id.
    Unknown,
}

/// Runs turns as journaled step sequences and routes cancellations to them.
#[derive(Clone)]
pub struct WorkflowEngine {
    turns: TurnRepo,
    steps: StepRepo,
    policy: RetryPolicy,
    active: Arc<DashMap<MessageId, CancellationToken>>,
    /// Spawned but not yet registered in `active`.
    scheduled: Arc<DashSet<MessageId>>,
    pending_cancels: Arc<DashSet<MessageId>>,
}

impl WorkflowEngine {
    pub fn new(db: Database, policy: RetryPolicy) -> Self {
        Self {
            turns: TurnRepo::new(db.clone()),
            steps: StepRepo::new(db),
            policy,
            active: Arc::new(DashMap::new()),
            scheduled: Arc::new(DashSet::new()),
            pending_cancels: Arc::new(DashSet::new()),
        }
    }

    pub fn turns(&self) -> &TurnRepo {
        &self.turns
    }

    pub fn steps(&self) -> &StepRepo {
        &self.steps
    }

    pub fn is_active(&self, id: &MessageId) -> bool {
        self.active.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn pending_cancel_count(&self) -> usize {
        self.pending_cancels.len()
    }

    /// Drive one turn to a terminal status. Re-running a turn replays its
    /// recorded steps; running a terminal turn is a no-op.
    #[instrument(skip(self, handler, event), fields(turn_id = %event.message_id, conversation_id = %event.conversation_id))]
    pub async fn run_turn(
        &self,
        handler: Arc<dyn TurnHandler>,
        event: MessageSent,
    ) -> Result<TurnStatus, WorkflowError> {
        let id = event.message_id.clone();
        let row = match self.turns.create_or_get(&event) {
            Ok(row) => row,
            Err(e) => {
                self.scheduled.remove(&id);
                return Err(e.into());
            }
        };
        if row.status.is_terminal() {
            self.scheduled.remove(&id);
            self.pending_cancels.remove(&id);
            info!(status = %row.status, "turn already finished");
            return Ok(row.status);
        }

        let token = CancellationToken::new();
        let registered = match self.active.entry(id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
                true
            }
        };
        self.scheduled.remove(&id);
        if !registered {
            warn!("turn already running in this process");
            return Ok(TurnStatus::Processing);
        }
        if self.pending_cancels.remove(&id).is_some() {
            token.cancel();
        }

        let runs = match self.turns.increment_runs(&id) {
            Ok(runs) => runs,
            Err(e) => {
                self.active.remove(&id);
                self.pending_cancels.remove(&id);
                return Err(e.into());
            }
        };
        info!(runs, "turn started");

        let step = StepContext::new(id.clone(), self.steps.clone(), self.policy.clone(), token);
        let outcome = handler.run(&step, &event).await;

        let (status, error_text) = match outcome {
            Ok(()) => (TurnStatus::Completed, None),
            Err(err) => {
                let failure = TurnFailure {
                    error: err.to_string(),
                    cancelled: err.is_cancelled(),
                };
                if failure.cancelled {
                    info!("turn cancelled");
                } else {
                    warn!(error = %failure.error, "turn failed");
                }
                if let Err(hook_err) = handler.on_failure(&step, &event, &failure).await {
                    error!(error = %hook_err, "failure hook failed");
                }
                let status = if failure.cancelled {
                    TurnStatus::Cancelled
                } else {
                    TurnStatus::Failed
                };
                (status, Some(failure.error))
            }
        };

        self.active.remove(&id);
        self.pending_cancels.remove(&id);
        self.turns.set_status(&id, status, error_text.as_deref())?;
        info!(status = %status, "turn finished");
        Ok(status)
    }

    /// Register the turn, then run it on its own task.
    pub fn spawn_turn(
        &self,
        handler: Arc<dyn TurnHandler>,
        event: MessageSent,
    ) -> Result<JoinHandle<Result<TurnStatus, WorkflowError>>, WorkflowError> {
        self.turns.create_or_get(&event)?;
        self.scheduled.insert(event.message_id.clone());
        let engine = self.clone();
        let span = tracing::info_span!("turn_task", turn_id = %event.message_id);
        Ok(tokio::spawn(
            async move { engine.run_turn(handler, event).await }.instrument(span),
        ))
    }

    /// Ask a turn to stop at its next suspension point.
    #[instrument(skip(self), fields(turn_id = %id))]
    pub fn cancel(&self, id: &MessageId) -> Result<CancelOutcome, WorkflowError> {
        if let Some(token) = self.active.get(id) {
            token.cancel();
            return Ok(CancelOutcome::Signalled);
        }

        match self.turns.get(id)? {
            None => {
                debug!("cancel ignored for unknown turn");
                Ok(CancelOutcome::Unknown)
            }
            Some(row) if row.status.is_terminal() => {
                info!(status = %row.status, "cancel ignored for finished turn");
                Ok(CancelOutcome::AlreadyTerminal)
            }
            Some(_) => {
                self.pending_cancels.insert(id.clone());
                // The turn may have registered between the two checks.
                if let Some(token) = self.active.get(id) {
                    token.cancel();
                    return Ok(CancelOutcome::Signalled);
                }
                Ok(CancelOutcome::Deferred)
            }
        }
    }

    /// Drive a deferred cancellation to completion when nothing in this
    /// process is going to run the turn. The spawned run stops at its first
    /// step and runs the failure hook.
    #[instrument(skip(self, handler), fields(turn_id = %id))]
    pub fn settle_deferred(
        &self,
        handler: Arc<dyn TurnHandler>,
        id: &MessageId,
    ) -> Result<Option<JoinHandle<Result<TurnStatus, WorkflowError>>>, WorkflowError> {
        if self.active.contains_key(id) || self.scheduled.contains(id) {
            return Ok(None);
        }
        let Some(row) = self.turns.get(id)? else {
            self.pending_cancels.remove(id);
            return Ok(None);
        };
        if row.status.is_terminal() {
            self.pending_cancels.remove(id);
            return Ok(None);
        }
        self.pending_cancels.insert(id.clone());
        info!(runs = row.runs, "settling cancelled turn left by an earlier run");
        Ok(Some(self.spawn_turn(handler, row.payload)?))
    }

    /// Re-drive every turn the journal still shows as processing.
    #[instrument(skip(self, handler))]
    pub fn resume_pending(
        &self,
        handler: Arc<dyn TurnHandler>,
    ) -> Result<Vec<JoinHandle<Result<TurnStatus, WorkflowError>>>, WorkflowError> {
        let pending = self.turns.list_by_status(TurnStatus::Processing)?;
        let mut handles = Vec::with_capacity(pending.len());
        for row in pending {
            if self.is_active(&row.id) {
                continue;
            }
            info!(turn_id = %row.id, runs = row.runs, "resuming turn");
            handles.push(self.spawn_turn(Arc::clone(&handler), row.payload)?);
        }
        Ok(handles)
    }
}
