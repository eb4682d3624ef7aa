use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, instrument};

use pointer_core::domain::{
    Conversation, FileKind, MessageRole, MessageStatus, ProjectFile, StoredMessage,
    DEFAULT_CONVERSATION_TITLE,
};
use pointer_core::ids::{ConversationId, FileId, MessageId, ProjectId};

use crate::database::Database;
use crate::error::StoreError;
use crate::project_store::{FileCreation, MessageScope, NewFile, NewMessage, ProjectStore};
use crate::row_helpers::{self, now_text};

const FILE_COLUMNS: &str = "id, project_id, parent_id, name, kind, content, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, conversation_id, project_id, role, content, status, created_at";

/// SQLite-backed project store.
#[derive(Clone)]
pub struct SqliteProjectStore {
    db: Database,
}

impl SqliteProjectStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn create_project(&self, name: &str) -> Result<ProjectId, StoreError> {
        let id = ProjectId::new();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), name, now_text()],
            )?;
            Ok(())
        })?;
        Ok(id)
    }

    /// New conversation carrying the default title unless one is given.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub fn create_conversation(
        &self,
        project_id: &ProjectId,
        title: Option<&str>,
    ) -> Result<Conversation, StoreError> {
        let id = ConversationId::new();
        let title = title.unwrap_or(DEFAULT_CONVERSATION_TITLE);
        let now = now_text();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, project_id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id.as_str(), project_id.as_str(), title, now],
            )?;
            Ok(())
        })?;
        Ok(Conversation {
            id,
            project_id: project_id.clone(),
            title: title.to_string(),
            updated_at: row_helpers::parse_timestamp(&now, "conversations", "updated_at")?,
        })
    }

    pub fn get_message(&self, id: &MessageId) -> Result<Option<StoredMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_message(row)?)),
                None => Ok(None),
            }
        })
    }
}

#[async_trait]
impl ProjectStore for SqliteProjectStore {
    #[instrument(skip(self), fields(conversation_id = %id))]
    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, title, updated_at FROM conversations WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => {
                    let updated: String = row_helpers::get(row, 3, "conversations", "updated_at")?;
                    Ok(Some(Conversation {
                        id: ConversationId::from_raw(row_helpers::get::<String>(
                            row,
                            0,
                            "conversations",
                            "id",
                        )?),
                        project_id: ProjectId::from_raw(row_helpers::get::<String>(
                            row,
                            1,
                            "conversations",
                            "project_id",
                        )?),
                        title: row_helpers::get(row, 2, "conversations", "title")?,
                        updated_at: row_helpers::parse_timestamp(
                            &updated,
                            "conversations",
                            "updated_at",
                        )?,
                    }))
                }
                None => Ok(None),
            }
        })
    }

    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    async fn get_recent_messages(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let mut messages = self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![conversation_id.as_str(), limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_message(row)?);
            }
            Ok(out)
        })?;
        messages.reverse();
        Ok(messages)
    }

    async fn get_processing_messages(
        &self,
        scope: &MessageScope,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let (column, value) = match scope {
            MessageScope::Conversation(id) => ("conversation_id", id.as_str()),
            MessageScope::Project(id) => ("project_id", id.as_str()),
        };
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE {column} = ?1 AND role = 'assistant' AND status = 'processing'
                 ORDER BY created_at, id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([value])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_message(row)?);
            }
            Ok(out)
        })
    }

    #[instrument(skip(self, message), fields(conversation_id = %message.conversation_id, role = %message.role))]
    async fn create_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let id = MessageId::new();
        let now = now_text();
        self.db.with_tx(|tx| {
            let touched = tx.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                params![message.conversation_id.as_str(), now],
            )?;
            if touched == 0 {
                return Err(StoreError::NotFound(format!(
                    "conversation {}",
                    message.conversation_id
                )));
            }
            tx.execute(
                "INSERT INTO messages (id, conversation_id, project_id, role, content, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    id.as_str(),
                    message.conversation_id.as_str(),
                    message.project_id.as_str(),
                    message.role.as_str(),
                    message.content,
                    message.status.as_str(),
                    now,
                ],
            )?;
            Ok(())
        })?;

        Ok(StoredMessage {
            id,
            conversation_id: message.conversation_id,
            project_id: message.project_id,
            role: message.role,
            content: message.content,
            status: message.status,
            created_at: row_helpers::parse_timestamp(&now, "messages", "created_at")?,
        })
    }

    #[instrument(skip(self, content), fields(message_id = %id, len = content.len()))]
    async fn update_message_content(&self, id: &MessageId, content: &str) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE messages SET content = ?2, status = 'completed', updated_at = ?3 WHERE id = ?1",
                params![id.as_str(), content, now_text()],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("message {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(message_id = %id, status = %status))]
    async fn update_message_status(
        &self,
        id: &MessageId,
        status: MessageStatus,
    ) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE messages SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.as_str(), status.as_str(), now_text()],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("message {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(conversation_id = %id))]
    async fn update_conversation_title(
        &self,
        id: &ConversationId,
        title: &str,
    ) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE conversations SET title = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.as_str(), title, now_text()],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("conversation {id}")));
        }
        Ok(())
    }

    async fn get_file(&self, id: &FileId) -> Result<Option<ProjectFile>, StoreError> {
        self.db.with_conn(|conn| fetch_file(conn, id))
    }

    #[instrument(skip(self), fields(project_id = %project_id))]
    async fn list_files(&self, project_id: &ProjectId) -> Result<Vec<ProjectFile>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {FILE_COLUMNS} FROM files WHERE project_id = ?1
                 ORDER BY CASE kind WHEN 'folder' THEN 0 ELSE 1 END, name"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([project_id.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_file(row)?);
            }
            Ok(out)
        })
    }

    #[instrument(skip(self, files), fields(project_id = %project_id, count = files.len()))]
    async fn create_files(
        &self,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
        files: &[NewFile],
    ) -> Result<Vec<FileCreation>, StoreError> {
        self.db.with_tx(|tx| {
            check_parent(tx, project_id, parent_id)?;
            let mut out = Vec::with_capacity(files.len());
            for file in files {
                if sibling_exists(tx, project_id, parent_id, &file.name)? {
                    out.push(FileCreation {
                        name: file.name.clone(),
                        file_id: None,
                        error: Some("file already exists".into()),
                    });
                    continue;
                }
                let id = FileId::new();
                insert_file(tx, &id, project_id, parent_id, &file.name, FileKind::File, Some(&file.content))?;
                out.push(FileCreation {
                    name: file.name.clone(),
                    file_id: Some(id),
                    error: None,
                });
            }
            Ok(out)
        })
    }

    #[instrument(skip(self), fields(project_id = %project_id))]
    async fn create_folder(
        &self,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
        name: &str,
    ) -> Result<ProjectFile, StoreError> {
        self.db.with_tx(|tx| {
            check_parent(tx, project_id, parent_id)?;
            if sibling_exists(tx, project_id, parent_id, name)? {
                return Err(StoreError::Conflict(format!("'{name}' already exists")));
            }
            let id = FileId::new();
            insert_file(tx, &id, project_id, parent_id, name, FileKind::Folder, None)?;
            fetch_file(tx, &id)?.ok_or_else(|| StoreError::NotFound(format!("file {id}")))
        })
    }

    #[instrument(skip(self), fields(file_id = %id))]
    async fn rename_file(&self, id: &FileId, new_name: &str) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE files SET name = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.as_str(), new_name, now_text()],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("file {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn delete_files(&self, ids: &[FileId]) -> Result<usize, StoreError> {
        self.db.with_tx(|tx| {
            let mut removed = 0usize;
            for id in ids {
                let subtree: i64 = tx.query_row(
                    "WITH RECURSIVE tree(id) AS (
                         SELECT id FROM files WHERE id = ?1
                         UNION ALL
                         SELECT f.id FROM files f JOIN tree t ON f.parent_id = t.id
                     )
                     SELECT COUNT(*) FROM tree",
                    [id.as_str()],
                    |row| row.get(0),
                )?;
                if subtree == 0 {
                    debug!(file_id = %id, "already deleted");
                    continue;
                }
                tx.execute("DELETE FROM files WHERE id = ?1", [id.as_str()])?;
                removed += subtree as usize;
            }
            Ok(removed)
        })
    }

    #[instrument(skip(self, content), fields(file_id = %id, len = content.len()))]
    async fn update_file(&self, id: &FileId, content: &str) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE files SET content = ?2, updated_at = ?3 WHERE id = ?1 AND kind = 'file'",
                params![id.as_str(), content, now_text()],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("file {id}")));
        }
        Ok(())
    }
}

fn fetch_file(conn: &Connection, id: &FileId) -> Result<Option<ProjectFile>, StoreError> {
    let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([id.as_str()])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_file(row)?)),
        None => Ok(None),
    }
}

fn check_parent(
    conn: &Connection,
    project_id: &ProjectId,
    parent_id: Option<&FileId>,
) -> Result<(), StoreError> {
    let Some(parent_id) = parent_id else {
        return Ok(());
    };
    match fetch_file(conn, parent_id)? {
        Some(parent) if parent.project_id == *project_id && parent.is_folder() => Ok(()),
        Some(parent) if parent.project_id == *project_id => Err(StoreError::Conflict(format!(
            "parent {parent_id} is not a folder"
        ))),
        _ => Err(StoreError::NotFound(format!("folder {parent_id}"))),
    }
}

fn sibling_exists(
    conn: &Connection,
    project_id: &ProjectId,
    parent_id: Option<&FileId>,
    name: &str,
) -> Result<bool, StoreError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM files
             WHERE project_id = ?1 AND COALESCE(parent_id, '') = ?2 AND name = ?3",
            params![
                project_id.as_str(),
                parent_id.map(FileId::as_str).unwrap_or(""),
                name
            ],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn insert_file(
    conn: &Connection,
    id: &FileId,
    project_id: &ProjectId,
    parent_id: Option<&FileId>,
    name: &str,
    kind: FileKind,
    content: Option<&str>,
) -> Result<(), StoreError> {
    let now = now_text();
    conn.execute(
        "INSERT INTO files (id, project_id, parent_id, name, kind, content, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            id.as_str(),
            project_id.as_str(),
            parent_id.map(FileId::as_str),
            name,
            kind.as_str(),
            content,
            now,
        ],
    )?;
    Ok(())
}

fn row_to_file(row: &rusqlite::Row<'_>) -> Result<ProjectFile, StoreError> {
    let kind: String = row_helpers::get(row, 4, "files", "kind")?;
    let updated: String = row_helpers::get(row, 6, "files", "updated_at")?;
    Ok(ProjectFile {
        id: FileId::from_raw(row_helpers::get::<String>(row, 0, "files", "id")?),
        project_id: ProjectId::from_raw(row_helpers::get::<String>(row, 1, "files", "project_id")?),
        parent_id: row_helpers::get::<Option<String>>(row, 2, "files", "parent_id")?
            .map(FileId::from_raw),
        name: row_helpers::get(row, 3, "files", "name")?,
        kind: row_helpers::parse_enum(&kind, "files", "kind")?,
        content: row_helpers::get(row, 5, "files", "content")?,
        updated_at: row_helpers::parse_timestamp(&updated, "files", "updated_at")?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<StoredMessage, StoreError> {
    let role: String = row_helpers::get(row, 3, "messages", "role")?;
    let status: String = row_helpers::get(row, 5, "messages", "status")?;
    let created: String = row_helpers::get(row, 6, "messages", "created_at")?;
    Ok(StoredMessage {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        conversation_id: ConversationId::from_raw(row_helpers::get::<String>(
            row,
            1,
            "messages",
            "conversation_id",
        )?),
        project_id: ProjectId::from_raw(row_helpers::get::<String>(
            row,
            2,
            "messages",
            "project_id",
        )?),
        role: row_helpers::parse_enum::<MessageRole>(&role, "messages", "role")?,
        content: row_helpers::get(row, 4, "messages", "content")?,
        status: row_helpers::parse_enum::<MessageStatus>(&status, "messages", "status")?,
        created_at: row_helpers::parse_timestamp(&created, "messages", "created_at")?,
    })
}
