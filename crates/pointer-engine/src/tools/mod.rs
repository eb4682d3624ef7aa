//! Project-scoped tools the coding agent calls.
//!
//! Calls arrive as a tool name plus loosely-typed JSON. [`ToolInvocation::parse`]
//! turns them into one of a closed set of typed variants; anything that does
//! not decode or validate becomes an `Error: …` tool result instead of a
//! failure of the turn.

mod files;
pub mod scrape;
pub mod truncate;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use pointer_core::ids::{FileId, ProjectId};
use pointer_core::messages::ToolCallBlock;
use pointer_core::tools::{ToolDefinition, ToolOutput};
use pointer_store::{NewFile, ProjectStore, StoreError};

use crate::workflow::{StepContext, StepError, WorkflowError};

pub use scrape::{extract_urls, FirecrawlFetcher, HttpPageFetcher, PageFetcher};
pub use truncate::{truncate_output, DEFAULT_MAX_OUTPUT};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("file not found: {0}")]
    FileNotFound(FileId),

    #[error("No valid files found for the provided IDs. Use listFiles to get valid fileIDs.")]
    NoValidFiles,

    #[error("access denied: {0} belongs to another project")]
    CrossProject(String),

    #[error("{0} is not a folder")]
    NotAFolder(FileId),

    #[error("{0} is a folder")]
    IsAFolder(FileId),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFilesArgs {
    pub file_ids: Vec<FileId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFilesArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<FileId>,
    pub files: Vec<NewFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<FileId>,
    /// A single name or a `/`-separated path.
    #[serde(alias = "path")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameFileArgs {
    pub file_id: FileId,
    pub new_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFilesArgs {
    pub file_ids: Vec<FileId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFileArgs {
    pub file_id: FileId,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeUrlsArgs {
    pub urls: Vec<String>,
}

/// One decoded tool call.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "tool", content = "args")]
pub enum ToolInvocation {
    ListFiles(ListFilesArgs),
    ReadFiles(ReadFilesArgs),
    CreateFiles(CreateFilesArgs),
    CreateFolder(CreateFolderArgs),
    RenameFile(RenameFileArgs),
    DeleteFiles(DeleteFilesArgs),
    UpdateFile(UpdateFileArgs),
    ScrapeUrls(ScrapeUrlsArgs),
}

fn decode<T: serde::de::DeserializeOwned>(name: &str, args: &Value) -> Result<T, ToolError> {
    let args = if args.is_null() { json!({}) } else { args.clone() };
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(format!("{name}: {e}")))
}

fn require(ok: bool, message: &str) -> Result<(), ToolError> {
    if ok {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments(message.to_string()))
    }
}

fn valid_name(name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && !name.contains('/') && name != "." && name != ".."
}

impl ToolInvocation {
    /// Decode and validate a raw call.
    pub fn parse(name: &str, args: &Value) -> Result<Self, ToolError> {
        let invocation = match name {
            "listFiles" => Self::ListFiles(decode(name, args)?),
            "readFiles" => Self::ReadFiles(decode(name, args)?),
            "createFiles" => Self::CreateFiles(decode(name, args)?),
            "createFolder" => Self::CreateFolder(decode(name, args)?),
            "renameFile" => Self::RenameFile(decode(name, args)?),
            "deleteFiles" => Self::DeleteFiles(decode(name, args)?),
            "updateFile" => Self::UpdateFile(decode(name, args)?),
            "scrapeUrls" => Self::ScrapeUrls(decode(name, args)?),
            other => return Err(ToolError::UnknownTool(other.to_string())),
        };
        invocation.validate()?;
        Ok(invocation)
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::ListFiles(_) => "listFiles",
            Self::ReadFiles(_) => "readFiles",
            Self::CreateFiles(_) => "createFiles",
            Self::CreateFolder(_) => "createFolder",
            Self::RenameFile(_) => "renameFile",
            Self::DeleteFiles(_) => "deleteFiles",
            Self::UpdateFile(_) => "updateFile",
            Self::ScrapeUrls(_) => "scrapeUrls",
        }
    }

    fn step_name(&self) -> &'static str {
        match self {
            Self::ListFiles(_) => "list-files",
            Self::ReadFiles(_) => "read-files",
            Self::CreateFiles(_) => "create-files",
            Self::CreateFolder(_) => "create-folder",
            Self::RenameFile(_) => "rename-file",
            Self::DeleteFiles(_) => "delete-files",
            Self::UpdateFile(_) => "update-file",
            Self::ScrapeUrls(_) => "scrape-urls",
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateFiles(_)
                | Self::CreateFolder(_)
                | Self::RenameFile(_)
                | Self::DeleteFiles(_)
                | Self::UpdateFile(_)
        )
    }

    fn validate(&self) -> Result<(), ToolError> {
        match self {
            Self::ListFiles(_) => Ok(()),
            Self::ReadFiles(a) => {
                require(!a.file_ids.is_empty(), "fileIds must not be empty")?;
                require(
                    a.file_ids.iter().all(|id| !id.as_str().trim().is_empty()),
                    "fileIds must not contain empty ids",
                )
            }
            Self::CreateFiles(a) => {
                require(!a.files.is_empty(), "files must not be empty")?;
                require(
                    a.files.iter().all(|f| valid_name(&f.name)),
                    "every file needs a non-empty name without '/'",
                )
            }
            Self::CreateFolder(a) => require(
                a.name.split('/').any(|s| !s.trim().is_empty())
                    && a.name.split('/').all(|s| s != "." && s != ".."),
                "name must be a non-empty folder name or path",
            ),
            Self::RenameFile(a) => {
                require(!a.file_id.as_str().is_empty(), "fileId must not be empty")?;
                require(valid_name(&a.new_name), "newName must be non-empty and contain no '/'")
            }
            Self::DeleteFiles(a) => require(!a.file_ids.is_empty(), "fileIds must not be empty"),
            Self::UpdateFile(a) => require(!a.file_id.as_str().is_empty(), "fileId must not be empty"),
            Self::ScrapeUrls(a) => {
                require(!a.urls.is_empty(), "urls must not be empty")?;
                match a.urls.iter().find(|u| !scrape::is_http_url(u)) {
                    Some(bad) => Err(ToolError::InvalidArguments(format!(
                        "not an http(s) url: {bad}"
                    ))),
                    None => Ok(()),
                }
            }
        }
    }

    /// Journal key derived from the call's content, e.g. `create-files:1f0c…`.
    pub fn step_key(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = format!("{:x}", Sha256::digest(&canonical));
        format!("{}:{}", self.step_name(), &digest[..16])
    }
}

/// The tool set bound to one project.
#[derive(Clone)]
pub struct ProjectTools {
    store: Arc<dyn ProjectStore>,
    fetcher: Arc<dyn PageFetcher>,
    project_id: ProjectId,
    timeout: Duration,
    max_output: usize,
}

impl ProjectTools {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        fetcher: Arc<dyn PageFetcher>,
        project_id: ProjectId,
    ) -> Self {
        Self {
            store,
            fetcher,
            project_id,
            timeout: DEFAULT_TOOL_TIMEOUT,
            max_output: DEFAULT_MAX_OUTPUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Schemas advertised to the model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        definitions()
    }

    /// Resolve one tool call to the text the agent sees next round.
    #[instrument(skip(self, step, call), fields(turn_id = %step.turn_id(), tool = %call.name))]
    pub async fn invoke(
        &self,
        step: &StepContext,
        call: &ToolCallBlock,
    ) -> Result<ToolOutput, WorkflowError> {
        let invocation = match ToolInvocation::parse(&call.name, &call.arguments) {
            Ok(invocation) => invocation,
            Err(e) => {
                warn!(error = %e, "rejected tool call");
                return Ok(ToolOutput::error(e));
            }
        };

        let key = invocation.step_key();
        let invocation = &invocation;
        let result = step
            .run(&key, move || async move {
                match tokio::time::timeout(self.timeout, self.execute(invocation)).await {
                    Err(_) => Err(StepError::retriable(format!(
                        "{} timed out after {}s",
                        invocation.wire_name(),
                        self.timeout.as_secs()
                    ))),
                    Ok(Ok(output)) => Ok(output),
                    Ok(Err(ToolError::Store(e))) if e.is_transient() => Err(StepError::from(e)),
                    Ok(Err(e)) => Ok(ToolOutput::error(e)),
                }
            })
            .await;

        let output = match result {
            Ok(output) => output,
            Err(WorkflowError::StepFailed { message, .. } | WorkflowError::NonRetriable(message)) => {
                ToolOutput::error(message)
            }
            Err(e) => return Err(e),
        };
        debug!(is_error = output.is_error, bytes = output.content.len(), "tool finished");

        Ok(ToolOutput {
            content: truncate_output(&output.content, self.max_output),
            is_error: output.is_error,
        })
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        match invocation {
            ToolInvocation::ListFiles(a) => self.list_files(a).await,
            ToolInvocation::ReadFiles(a) => self.read_files(a).await,
            ToolInvocation::CreateFiles(a) => self.create_files(a).await,
            ToolInvocation::CreateFolder(a) => self.create_folder(a).await,
            ToolInvocation::RenameFile(a) => self.rename_file(a).await,
            ToolInvocation::DeleteFiles(a) => self.delete_files(a).await,
            ToolInvocation::UpdateFile(a) => self.update_file(a).await,
            ToolInvocation::ScrapeUrls(a) => self.scrape_urls(a).await,
        }
    }

    async fn scrape_urls(&self, args: &ScrapeUrlsArgs) -> Result<ToolOutput, ToolError> {
        let pages = join_all(args.urls.iter().map(|url| self.fetcher.fetch_page(url))).await;
        let results: Vec<(String, Option<String>)> = args.urls.iter().cloned().zip(pages).collect();
        Ok(ToolOutput::ok(scrape::render_docs(&results)))
    }
}

fn tool(name: &str, description: &str, parameters_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters_schema,
    }
}

pub fn definitions() -> Vec<ToolDefinition> {
    let id_list = json!({"type": "array", "items": {"type": "string"}, "minItems": 1});
    vec![
        tool(
            "listFiles",
            "List every file and folder in the current project with its id, name, type and parentId.",
            json!({
                "type": "object",
                "properties": {
                    "projectId": {"type": "string", "description": "Defaults to the current project"}
                }
            }),
        ),
        tool(
            "readFiles",
            "Read the content of files by id.",
            json!({
                "type": "object",
                "required": ["fileIds"],
                "properties": {"fileIds": id_list.clone()}
            }),
        ),
        tool(
            "createFiles",
            "Create one or more files in a folder (root when parentId is omitted).",
            json!({
                "type": "object",
                "required": ["files"],
                "properties": {
                    "parentId": {"type": "string"},
                    "files": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "required": ["name", "content"],
                            "properties": {
                                "name": {"type": "string"},
                                "content": {"type": "string"}
                            }
                        }
                    }
                }
            }),
        ),
        tool(
            "createFolder",
            "Create a folder. A path like 'src/components' creates missing intermediate folders.",
            json!({
                "type": "object",
                "required": ["name"],
                "properties": {
                    "parentId": {"type": "string"},
                    "name": {"type": "string"}
                }
            }),
        ),
        tool(
            "renameFile",
            "Rename a file or folder.",
            json!({
                "type": "object",
                "required": ["fileId", "newName"],
                "properties": {
                    "fileId": {"type": "string"},
                    "newName": {"type": "string"}
                }
            }),
        ),
        tool(
            "deleteFiles",
            "Delete files or folders by id. Folders are deleted with their contents.",
            json!({
                "type": "object",
                "required": ["fileIds"],
                "properties": {"fileIds": id_list}
            }),
        ),
        tool(
            "updateFile",
            "Replace the full content of a file.",
            json!({
                "type": "object",
                "required": ["fileId", "content"],
                "properties": {
                    "fileId": {"type": "string"},
                    "content": {"type": "string"}
                }
            }),
        ),
        tool(
            "scrapeUrls",
            "Fetch external pages, such as documentation, and return their readable text.",
            json!({
                "type": "object",
                "required": ["urls"],
                "properties": {
                    "urls": {"type": "array", "items": {"type": "string"}, "minItems": 1}
                }
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pointer_core::ids::{MessageId, ToolCallId};
    use pointer_core::signals::MessageSent;
    use pointer_store::{Database, SqliteProjectStore, StepRepo, TurnRepo};
    use tokio_util::sync::CancellationToken;

    use crate::workflow::RetryPolicy;

    struct StaticFetcher;

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch_page(&self, url: &str) -> Option<String> {
            url.contains("ok").then(|| format!("page at {url}"))
        }
    }

    struct Fixture {
        store: SqliteProjectStore,
        tools: ProjectTools,
        step: StepContext,
        db: Database,
    }

    fn fixture() -> Fixture {
        let db = Database::in_memory().unwrap();
        let store = SqliteProjectStore::new(db.clone());
        let project_id = store.create_project("demo").unwrap();
        let conversation = store.create_conversation(&project_id, None).unwrap();
        let event = MessageSent {
            message_id: MessageId::new(),
            conversation_id: conversation.id,
            project_id: project_id.clone(),
            user_text: "hi".into(),
        };
        TurnRepo::new(db.clone()).create_or_get(&event).unwrap();
        let step = StepContext::new(
            event.message_id,
            StepRepo::new(db.clone()),
            RetryPolicy::default(),
            CancellationToken::new(),
        );
        let tools = ProjectTools::new(Arc::new(store.clone()), Arc::new(StaticFetcher), project_id);
        Fixture { store, tools, step, db }
    }

    fn call(name: &str, args: Value) -> ToolCallBlock {
        ToolCallBlock {
            id: ToolCallId::new(),
            name: name.into(),
            arguments: args,
        }
    }

    #[test]
    fn parse_rejects_bad_input() {
        let err = ToolInvocation::parse("readFiles", &json!({"fileIds": []})).unwrap_err();
        assert!(err.to_string().contains("fileIds must not be empty"));

        let err = ToolInvocation::parse("renameFile", &json!({"fileId": "file_1"})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = ToolInvocation::parse("scrapeUrls", &json!({"urls": ["ftp://x"]})).unwrap_err();
        assert!(err.to_string().contains("not an http(s) url"));

        let err = ToolInvocation::parse("runShell", &json!({})).unwrap_err();
        assert_eq!(err.to_string(), "unknown tool: runShell");

        assert!(matches!(
            ToolInvocation::parse("listFiles", &Value::Null).unwrap(),
            ToolInvocation::ListFiles(_)
        ));
        assert!(matches!(
            ToolInvocation::parse("createFolder", &json!({"path": "src/lib"})).unwrap(),
            ToolInvocation::CreateFolder(CreateFolderArgs { ref name, .. }) if name == "src/lib"
        ));
    }

    #[test]
    fn step_key_depends_on_content() {
        let a = ToolInvocation::parse("updateFile", &json!({"fileId": "file_1", "content": "a"})).unwrap();
        let b = ToolInvocation::parse("updateFile", &json!({"fileId": "file_1", "content": "a"})).unwrap();
        let c = ToolInvocation::parse("updateFile", &json!({"fileId": "file_1", "content": "b"})).unwrap();
        assert_eq!(a.step_key(), b.step_key());
        assert_ne!(a.step_key(), c.step_key());
        assert!(a.step_key().starts_with("update-file:"));
        assert_eq!(a.step_key().len(), "update-file:".len() + 16);
        assert!(a.is_mutation());
    }

    #[test]
    fn definitions_cover_every_tool() {
        let names: Vec<String> = definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![
                "listFiles",
                "readFiles",
                "createFiles",
                "createFolder",
                "renameFile",
                "deleteFiles",
                "updateFile",
                "scrapeUrls"
            ]
        );
    }

    #[tokio::test]
    async fn invalid_arguments_become_error_text() {
        let f = fixture();
        let out = f
            .tools
            .invoke(&f.step, &call("deleteFiles", json!({"fileIds": "file_1"})))
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.starts_with("Error: invalid arguments: deleteFiles:"));
    }

    #[tokio::test]
    async fn mutation_is_not_reapplied_on_replay() {
        let f = fixture();
        let args = json!({"files": [{"name": "a.ts", "content": "export {}"}]});
        let first = f.tools.invoke(&f.step, &call("createFiles", args.clone())).await.unwrap();
        assert!(!first.is_error, "{}", first.content);

        // A re-driven turn issues the same call under the same key.
        let replay = StepContext::new(
            f.step.turn_id().clone(),
            StepRepo::new(f.db.clone()),
            RetryPolicy::default(),
            CancellationToken::new(),
        );
        let second = f.tools.invoke(&replay, &call("createFiles", args)).await.unwrap();
        assert_eq!(second, first);

        let files = f.store.list_files(f.tools.project_id()).await.unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn other_project_is_rejected() {
        let f = fixture();
        let other = f.store.create_project("other").unwrap();
        let out = f
            .tools
            .invoke(&f.step, &call("listFiles", json!({"projectId": other.as_str()})))
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("belongs to another project"));
    }

    #[tokio::test]
    async fn scrape_reports_failures_inline() {
        let f = fixture();
        let out = f
            .tools
            .invoke(
                &f.step,
                &call("scrapeUrls", json!({"urls": ["https://ok.dev/a", "https://down.dev"]})),
            )
            .await
            .unwrap();
        assert!(!out.is_error);
        assert!(out.content.contains("<doc url=\"https://ok.dev/a\">\npage at https://ok.dev/a\n</doc>"));
        assert!(out.content.contains("Error: could not fetch https://down.dev"));
    }

    #[tokio::test]
    async fn oversized_output_is_truncated() {
        let f = fixture();
        let big = "x".repeat(500);
        let created = f
            .tools
            .invoke(&f.step, &call("createFiles", json!({"files": [{"name": "big.txt", "content": big}]})))
            .await
            .unwrap();
        let id: Vec<Value> = serde_json::from_str(&created.content).unwrap();
        let file_id = id[0]["fileId"].as_str().unwrap();

        let out = f
            .tools
            .clone()
            .with_max_output(64)
            .invoke(&f.step, &call("readFiles", json!({"fileIds": [file_id]})))
            .await
            .unwrap();
        assert!(out.content.contains("[truncated:"));
    }
}
