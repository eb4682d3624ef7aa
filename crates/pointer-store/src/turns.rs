use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::instrument;

use pointer_core::ids::{ConversationId, MessageId, ProjectId};
use pointer_core::signals::MessageSent;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, now_text};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnStatus {
    Processing,
    Completed,
    Cancelled,
    Failed,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

impl std::fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TurnStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown turn status: {other}")),
        }
    }
}

/// A turn row. The id is the placeholder message the turn answers into.
#[derive(Clone, Debug)]
pub struct TurnRow {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub project_id: ProjectId,
    pub status: TurnStatus,
    pub payload: MessageSent,
    pub error: Option<String>,
    pub runs: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TurnRepo {
    db: Database,
}

impl TurnRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers the turn for an event. A second delivery of the same event
    /// returns the existing row untouched.
    #[instrument(skip(self, event), fields(message_id = %event.message_id))]
    pub fn create_or_get(&self, event: &MessageSent) -> Result<TurnRow, StoreError> {
        let payload = serde_json::to_string(event)?;
        let now = now_text();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO turns (id, conversation_id, project_id, payload, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    event.message_id.as_str(),
                    event.conversation_id.as_str(),
                    event.project_id.as_str(),
                    payload,
                    now,
                ],
            )?;
            Ok(())
        })?;
        self.get(&event.message_id)?
            .ok_or_else(|| StoreError::NotFound(format!("turn {}", event.message_id)))
    }

    pub fn get(&self, id: &MessageId) -> Result<Option<TurnRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, project_id, status, payload, error, runs, created_at, updated_at
                 FROM turns WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_turn(row)?)),
                None => Ok(None),
            }
        })
    }

    #[instrument(skip(self, error), fields(turn_id = %id, status = %status))]
    pub fn set_status(
        &self,
        id: &MessageId,
        status: TurnStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE turns SET status = ?2, error = ?3, updated_at = ?4 WHERE id = ?1",
                params![id.as_str(), status.as_str(), error, now_text()],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("turn {id}")));
        }
        Ok(())
    }

    /// Counts an execution of the turn and returns the new total.
    pub fn increment_runs(&self, id: &MessageId) -> Result<u32, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE turns SET runs = runs + 1, updated_at = ?2 WHERE id = ?1",
                params![id.as_str(), now_text()],
            )?;
            Ok(conn.query_row("SELECT runs FROM turns WHERE id = ?1", [id.as_str()], |row| {
                row.get(0)
            })?)
        })
    }

    /// Oldest first.
    pub fn list_by_status(&self, status: TurnStatus) -> Result<Vec<TurnRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, project_id, status, payload, error, runs, created_at, updated_at
                 FROM turns WHERE status = ?1 ORDER BY created_at, id",
            )?;
            let mut rows = stmt.query([status.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_turn(row)?);
            }
            Ok(out)
        })
    }
}

fn row_to_turn(row: &rusqlite::Row<'_>) -> Result<TurnRow, StoreError> {
    let status: String = row_helpers::get(row, 3, "turns", "status")?;
    let payload: String = row_helpers::get(row, 4, "turns", "payload")?;
    let created: String = row_helpers::get(row, 7, "turns", "created_at")?;
    let updated: String = row_helpers::get(row, 8, "turns", "updated_at")?;
    Ok(TurnRow {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "turns", "id")?),
        conversation_id: ConversationId::from_raw(row_helpers::get::<String>(
            row,
            1,
            "turns",
            "conversation_id",
        )?),
        project_id: ProjectId::from_raw(row_helpers::get::<String>(row, 2, "turns", "project_id")?),
        status: row_helpers::parse_enum(&status, "turns", "status")?,
        payload: row_helpers::parse_json(&payload, "turns", "payload")?,
        error: row_helpers::get(row, 5, "turns", "error")?,
        runs: row_helpers::get(row, 6, "turns", "runs")?,
        created_at: row_helpers::parse_timestamp(&created, "turns", "created_at")?,
        updated_at: row_helpers::parse_timestamp(&updated, "turns", "updated_at")?,
    })
}
