//! Step journal: one row per named step of a turn.
//!
//! A completed row holds the step's serialized output and is returned on
//! replay instead of re-executing the step. Sleeping rows carry the wake-up
//! time so a resumed turn only waits out what is left.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde_json::Value;
use tracing::instrument;

use pointer_core::ids::MessageId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, now_text, timestamp_text};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    Run,
    Sleep,
    FailureHook,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepStatus {
    Completed,
    Sleeping,
    Failed,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($ty))),
                }
            }
        }
    };
}

text_enum!(StepKind { Run => "run", Sleep => "sleep", FailureHook => "failure_hook" });
text_enum!(StepStatus { Completed => "completed", Sleeping => "sleeping", Failed => "failed" });

#[derive(Clone, Debug)]
pub struct StepRow {
    pub turn_id: MessageId,
    pub key: String,
    pub kind: StepKind,
    pub status: StepStatus,
    pub output: Option<Value>,
    pub wake_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl StepRow {
    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

#[derive(Clone)]
pub struct StepRepo {
    db: Database,
}

impl StepRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, turn_id: &MessageId, key: &str) -> Result<Option<StepRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT turn_id, step_key, kind, status, output, wake_at, attempts, last_error
                 FROM steps WHERE turn_id = ?1 AND step_key = ?2",
            )?;
            let mut rows = stmt.query(params![turn_id.as_str(), key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_step(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Journal order.
    pub fn list(&self, turn_id: &MessageId) -> Result<Vec<StepRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT turn_id, step_key, kind, status, output, wake_at, attempts, last_error
                 FROM steps WHERE turn_id = ?1 ORDER BY created_at, rowid",
            )?;
            let mut rows = stmt.query([turn_id.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_step(row)?);
            }
            Ok(out)
        })
    }

    #[instrument(skip(self, output), fields(turn_id = %turn_id))]
    pub fn record_success(
        &self,
        turn_id: &MessageId,
        key: &str,
        kind: StepKind,
        output: &Value,
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(output)?;
        let now = now_text();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO steps (turn_id, step_key, kind, status, output, attempts, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'completed', ?4, 1, ?5, ?5)
                 ON CONFLICT(turn_id, step_key) DO UPDATE SET
                     status = 'completed',
                     output = excluded.output,
                     attempts = steps.attempts + 1,
                     updated_at = excluded.updated_at",
                params![turn_id.as_str(), key, kind.as_str(), encoded, now],
            )?;
            Ok(())
        })
    }

    /// Records a failed attempt and returns the attempt count so far.
    #[instrument(skip(self, error), fields(turn_id = %turn_id))]
    pub fn record_failure(
        &self,
        turn_id: &MessageId,
        key: &str,
        kind: StepKind,
        error: &str,
    ) -> Result<u32, StoreError> {
        let now = now_text();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO steps (turn_id, step_key, kind, status, attempts, last_error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'failed', 1, ?4, ?5, ?5)
                 ON CONFLICT(turn_id, step_key) DO UPDATE SET
                     status = 'failed',
                     attempts = steps.attempts + 1,
                     last_error = excluded.last_error,
                     updated_at = excluded.updated_at",
                params![turn_id.as_str(), key, kind.as_str(), error, now],
            )?;
            let attempts: u32 = conn.query_row(
                "SELECT attempts FROM steps WHERE turn_id = ?1 AND step_key = ?2",
                params![turn_id.as_str(), key],
                |row| row.get(0),
            )?;
            Ok(attempts)
        })
    }

    /// Marks a suspension as started; an existing wake-up time is kept.
    #[instrument(skip(self), fields(turn_id = %turn_id))]
    pub fn record_sleep(
        &self,
        turn_id: &MessageId,
        key: &str,
        wake_at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        let now = now_text();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO steps (turn_id, step_key, kind, status, wake_at, created_at, updated_at)
                 VALUES (?1, ?2, 'sleep', 'sleeping', ?3, ?4, ?4)
                 ON CONFLICT(turn_id, step_key) DO NOTHING",
                params![turn_id.as_str(), key, timestamp_text(wake_at), now],
            )?;
            let stored: String = conn.query_row(
                "SELECT wake_at FROM steps WHERE turn_id = ?1 AND step_key = ?2",
                params![turn_id.as_str(), key],
                |row| row.get(0),
            )?;
            row_helpers::parse_timestamp(&stored, "steps", "wake_at")
        })
    }
}

fn row_to_step(row: &rusqlite::Row<'_>) -> Result<StepRow, StoreError> {
    let kind: String = row_helpers::get(row, 2, "steps", "kind")?;
    let status: String = row_helpers::get(row, 3, "steps", "status")?;
    let output: Option<String> = row_helpers::get(row, 4, "steps", "output")?;
    let wake_at: Option<String> = row_helpers::get(row, 5, "steps", "wake_at")?;
    Ok(StepRow {
        turn_id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "steps", "turn_id")?),
        key: row_helpers::get(row, 1, "steps", "step_key")?,
        kind: row_helpers::parse_enum(&kind, "steps", "kind")?,
        status: row_helpers::parse_enum(&status, "steps", "status")?,
        output: output
            .map(|raw| row_helpers::parse_json(&raw, "steps", "output"))
            .transpose()?,
        wake_at: wake_at
            .map(|raw| row_helpers::parse_timestamp(&raw, "steps", "wake_at"))
            .transpose()?,
        attempts: row_helpers::get(row, 6, "steps", "attempts")?,
        last_error: row_helpers::get(row, 7, "steps", "last_error")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turns::TurnRepo;
    use pointer_core::ids::{ConversationId, ProjectId};
    use pointer_core::signals::MessageSent;
    use serde_json::json;

    fn setup() -> (StepRepo, MessageId) {
        let db = Database::in_memory().unwrap();
        let turns = TurnRepo::new(db.clone());
        let event = MessageSent {
            message_id: MessageId::new(),
            conversation_id: ConversationId::new(),
            project_id: ProjectId::new(),
            user_text: "hello".into(),
        };
        turns.create_or_get(&event).unwrap();
        (StepRepo::new(db), event.message_id)
    }

    #[test]
    fn success_is_replayable() {
        let (steps, turn) = setup();
        assert!(steps.get(&turn, "get-conversation").unwrap().is_none());

        steps
            .record_success(&turn, "get-conversation", StepKind::Run, &json!({"title": "x"}))
            .unwrap();
        let row = steps.get(&turn, "get-conversation").unwrap().unwrap();
        assert!(row.is_completed());
        assert_eq!(row.output, Some(json!({"title": "x"})));
        assert_eq!(row.kind, StepKind::Run);
    }

    #[test]
    fn failures_count_attempts_then_success_overwrites() {
        let (steps, turn) = setup();
        assert_eq!(steps.record_failure(&turn, "a", StepKind::Run, "boom").unwrap(), 1);
        assert_eq!(steps.record_failure(&turn, "a", StepKind::Run, "boom").unwrap(), 2);
        let row = steps.get(&turn, "a").unwrap().unwrap();
        assert_eq!(row.status, StepStatus::Failed);
        assert_eq!(row.last_error.as_deref(), Some("boom"));

        steps.record_success(&turn, "a", StepKind::Run, &json!(1)).unwrap();
        let row = steps.get(&turn, "a").unwrap().unwrap();
        assert!(row.is_completed());
        assert_eq!(row.attempts, 3);
    }

    #[test]
    fn sleep_keeps_first_wake_time() {
        let (steps, turn) = setup();
        let first = Utc::now() + chrono::Duration::seconds(2);
        let stored = steps.record_sleep(&turn, "wait", first).unwrap();
        let again = steps
            .record_sleep(&turn, "wait", first + chrono::Duration::seconds(60))
            .unwrap();
        assert_eq!(stored, again);
        assert_eq!(steps.get(&turn, "wait").unwrap().unwrap().status, StepStatus::Sleeping);
    }

    #[test]
    fn list_in_journal_order() {
        let (steps, turn) = setup();
        for key in ["one", "two", "three"] {
            steps.record_success(&turn, key, StepKind::Run, &Value::Null).unwrap();
        }
        let keys: Vec<String> = steps.list(&turn).unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["one", "two", "three"]);
    }

    #[test]
    fn kind_text() {
        assert_eq!("failure_hook".parse::<StepKind>().unwrap(), StepKind::FailureHook);
        assert!("nap".parse::<StepKind>().is_err());
    }
}
