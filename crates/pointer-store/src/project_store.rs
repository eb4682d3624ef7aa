//! Contract between the agent workflow and whatever holds projects,
//! conversations and files.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use pointer_core::domain::{
    Conversation, MessageRole, MessageStatus, ProjectFile, StoredMessage,
};
use pointer_core::ids::{ConversationId, FileId, MessageId, ProjectId};

use crate::error::StoreError;

#[derive(Clone, Debug)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub project_id: ProjectId,
    pub role: MessageRole,
    pub content: String,
    pub status: MessageStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFile {
    pub name: String,
    pub content: String,
}

/// Per-entry outcome of a batch file creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCreation {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub enum MessageScope {
    Conversation(ConversationId),
    Project(ProjectId),
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_conversation(&self, id: &ConversationId)
        -> Result<Option<Conversation>, StoreError>;

    /// The newest `limit` messages, oldest first.
    async fn get_recent_messages(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    /// Assistant messages still `processing` within `scope`.
    async fn get_processing_messages(
        &self,
        scope: &MessageScope,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    /// Inserts the message and bumps the conversation's `updated_at`.
    async fn create_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError>;

    /// Sets the content and marks the message completed.
    async fn update_message_content(&self, id: &MessageId, content: &str)
        -> Result<(), StoreError>;

    async fn update_message_status(
        &self,
        id: &MessageId,
        status: MessageStatus,
    ) -> Result<(), StoreError>;

    async fn update_conversation_title(
        &self,
        id: &ConversationId,
        title: &str,
    ) -> Result<(), StoreError>;

    async fn get_file(&self, id: &FileId) -> Result<Option<ProjectFile>, StoreError>;

    async fn list_files(&self, project_id: &ProjectId) -> Result<Vec<ProjectFile>, StoreError>;

    /// Creates each file independently; a name already taken in the folder
    /// is reported in its entry rather than failing the batch.
    async fn create_files(
        &self,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
        files: &[NewFile],
    ) -> Result<Vec<FileCreation>, StoreError>;

    async fn create_folder(
        &self,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
        name: &str,
    ) -> Result<ProjectFile, StoreError>;

    async fn rename_file(&self, id: &FileId, new_name: &str) -> Result<(), StoreError>;

    /// Folders take their descendants with them. Returns rows removed.
    async fn delete_files(&self, ids: &[FileId]) -> Result<usize, StoreError>;

    async fn update_file(&self, id: &FileId, content: &str) -> Result<(), StoreError>;
}
