use serde::Serialize;
use tracing::debug;

use pointer_core::domain::{FileKind, ProjectFile};
use pointer_core::ids::{FileId, ProjectId};
use pointer_core::tools::ToolOutput;
use pointer_store::StoreError;

use super::{
    CreateFilesArgs, CreateFolderArgs, DeleteFilesArgs, ListFilesArgs, ProjectTools,
    ReadFilesArgs, RenameFileArgs, ToolError, UpdateFileArgs,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileEntry<'a> {
    id: &'a FileId,
    name: &'a str,
    #[serde(rename = "type")]
    kind: FileKind,
    parent_id: Option<&'a FileId>,
}

#[derive(Serialize)]
struct FileContent<'a> {
    id: &'a FileId,
    name: &'a str,
    content: &'a str,
}

impl ProjectTools {
    fn check_project(&self, project_id: Option<&ProjectId>) -> Result<(), ToolError> {
        match project_id {
            Some(id) if *id != self.project_id => Err(ToolError::CrossProject(format!("project {id}"))),
            _ => Ok(()),
        }
    }

    /// Look a file up, rejecting ids owned by another project.
    async fn owned_file(&self, id: &FileId) -> Result<Option<ProjectFile>, ToolError> {
        match self.store.get_file(id).await? {
            Some(file) if file.project_id != self.project_id => {
                Err(ToolError::CrossProject(format!("file {id}")))
            }
            other => Ok(other),
        }
    }

    async fn require_file(&self, id: &FileId) -> Result<ProjectFile, ToolError> {
        self.owned_file(id)
            .await?
            .ok_or_else(|| ToolError::FileNotFound(id.clone()))
    }

    async fn require_folder(&self, id: Option<&FileId>) -> Result<(), ToolError> {
        let Some(id) = id else {
            return Ok(());
        };
        if !self.require_file(id).await?.is_folder() {
            return Err(ToolError::NotAFolder(id.clone()));
        }
        Ok(())
    }

    pub(super) async fn list_files(&self, args: &ListFilesArgs) -> Result<ToolOutput, ToolError> {
        self.check_project(args.project_id.as_ref())?;
        let files = self.store.list_files(&self.project_id).await?;
        let entries: Vec<FileEntry<'_>> = files
            .iter()
            .map(|f| FileEntry {
                id: &f.id,
                name: &f.name,
                kind: f.kind,
                parent_id: f.parent_id.as_ref(),
            })
            .collect();
        Ok(ToolOutput::ok(serde_json::to_string(&entries)?))
    }

    pub(super) async fn read_files(&self, args: &ReadFilesArgs) -> Result<ToolOutput, ToolError> {
        let mut found = Vec::with_capacity(args.file_ids.len());
        for id in &args.file_ids {
            match self.owned_file(id).await? {
                Some(file) if !file.is_folder() => found.push(file),
                Some(_) => debug!(file_id = %id, "skipping folder"),
                None => debug!(file_id = %id, "skipping unknown file"),
            }
        }
        if found.is_empty() {
            return Err(ToolError::NoValidFiles);
        }

        let contents: Vec<FileContent<'_>> = found
            .iter()
            .map(|f| FileContent {
                id: &f.id,
                name: &f.name,
                content: f.content.as_deref().unwrap_or_default(),
            })
            .collect();
        Ok(ToolOutput::ok(serde_json::to_string(&contents)?))
    }

    pub(super) async fn create_files(&self, args: &CreateFilesArgs) -> Result<ToolOutput, ToolError> {
        self.check_project(args.project_id.as_ref())?;
        self.require_folder(args.parent_id.as_ref()).await?;
        let created = self
            .store
            .create_files(&self.project_id, args.parent_id.as_ref(), &args.files)
            .await?;
        Ok(ToolOutput::ok(serde_json::to_string(&created)?))
    }

    /// Nested paths reuse intermediate folders that already exist.
    pub(super) async fn create_folder(&self, args: &CreateFolderArgs) -> Result<ToolOutput, ToolError> {
        self.check_project(args.project_id.as_ref())?;
        self.require_folder(args.parent_id.as_ref()).await?;

        let segments: Vec<&str> = args
            .name
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        let Some((last, intermediate)) = segments.split_last() else {
            return Err(ToolError::InvalidArguments("name must not be empty".into()));
        };

        let mut parent = args.parent_id.clone();
        if !intermediate.is_empty() {
            let existing = self.store.list_files(&self.project_id).await?;
            for segment in intermediate {
                let reuse = existing
                    .iter()
                    .find(|f| f.is_folder() && f.parent_id == parent && f.name == *segment)
                    .map(|f| f.id.clone());
                let id = match reuse {
                    Some(id) => id,
                    None => {
                        self.store
                            .create_folder(&self.project_id, parent.as_ref(), segment)
                            .await?
                            .id
                    }
                };
                parent = Some(id);
            }
        }

        let path = segments.join("/");
        let folder = match self
            .store
            .create_folder(&self.project_id, parent.as_ref(), last)
            .await
        {
            Ok(folder) => folder,
            Err(StoreError::Conflict(_)) => {
                return Err(ToolError::Conflict(format!("'{path}' already exists")))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(ToolOutput::ok(format!(
            "Created folder '{path}' with id {}",
            folder.id
        )))
    }

    pub(super) async fn rename_file(&self, args: &RenameFileArgs) -> Result<ToolOutput, ToolError> {
        let file = self.require_file(&args.file_id).await?;
        let new_name = args.new_name.trim();
        match self.store.rename_file(&file.id, new_name).await {
            Ok(()) => Ok(ToolOutput::ok(format!(
                "Renamed '{}' to '{new_name}'",
                file.name
            ))),
            Err(StoreError::Conflict(_)) => Err(ToolError::Conflict(format!(
                "'{new_name}' already exists in the same folder"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub(super) async fn delete_files(&self, args: &DeleteFilesArgs) -> Result<ToolOutput, ToolError> {
        let mut targets = Vec::with_capacity(args.file_ids.len());
        let mut names = Vec::with_capacity(args.file_ids.len());
        let mut missing = Vec::new();
        for id in &args.file_ids {
            match self.owned_file(id).await? {
                Some(file) => {
                    names.push(file.name);
                    targets.push(file.id);
                }
                None => missing.push(id.as_str()),
            }
        }
        if targets.is_empty() {
            return Err(ToolError::FileNotFound(args.file_ids[0].clone()));
        }

        let removed = self.store.delete_files(&targets).await?;
        let mut summary = format!("Deleted {removed} item(s): {}", names.join(", "));
        if !missing.is_empty() {
            summary.push_str(&format!("\nSkipped unknown ids: {}", missing.join(", ")));
        }
        Ok(ToolOutput::ok(summary))
    }

    pub(super) async fn update_file(&self, args: &UpdateFileArgs) -> Result<ToolOutput, ToolError> {
        let file = self.require_file(&args.file_id).await?;
        if file.is_folder() {
            return Err(ToolError::IsAFolder(file.id));
        }
        self.store.update_file(&file.id, &args.content).await?;
        Ok(ToolOutput::ok(format!(
            "Updated '{}' ({} bytes)",
            file.name,
            args.content.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};

    use pointer_store::{Database, ProjectStore, SqliteProjectStore};

    use super::*;
    use crate::tools::{HttpPageFetcher, ToolInvocation};

    fn setup() -> (SqliteProjectStore, ProjectTools) {
        let store = SqliteProjectStore::new(Database::in_memory().unwrap());
        let project_id = store.create_project("site").unwrap();
        let tools = ProjectTools::new(
            Arc::new(store.clone()),
            Arc::new(HttpPageFetcher::default()),
            project_id,
        );
        (store, tools)
    }

    async fn run(tools: &ProjectTools, name: &str, args: Value) -> Result<ToolOutput, ToolError> {
        let invocation = ToolInvocation::parse(name, &args)?;
        tools.execute(&invocation).await
    }

    async fn create(tools: &ProjectTools, name: &str, content: &str) -> FileId {
        let out = run(tools, "createFiles", json!({"files": [{"name": name, "content": content}]}))
            .await
            .unwrap();
        let created: Vec<Value> = serde_json::from_str(&out.content).unwrap();
        FileId::from_raw(created[0]["fileId"].as_str().unwrap())
    }

    #[tokio::test]
    async fn list_reports_folders_first() {
        let (_, tools) = setup();
        create(&tools, "index.html", "<html></html>").await;
        run(&tools, "createFolder", json!({"name": "src"})).await.unwrap();

        let out = run(&tools, "listFiles", json!({})).await.unwrap();
        let entries: Vec<Value> = serde_json::from_str(&out.content).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["name"], "src");
        assert_eq!(entries[0]["type"], "folder");
        assert_eq!(entries[1]["name"], "index.html");
        assert_eq!(entries[1]["parentId"], Value::Null);
    }

    #[tokio::test]
    async fn read_skips_unknown_ids() {
        let (_, tools) = setup();
        let id = create(&tools, "a.ts", "export const a = 1;").await;

        let out = run(&tools, "readFiles", json!({"fileIds": [id.as_str(), "file_missing"]}))
            .await
            .unwrap();
        let files: Vec<Value> = serde_json::from_str(&out.content).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["content"], "export const a = 1;");

        let err = run(&tools, "readFiles", json!({"fileIds": ["file_missing"]}))
            .await
            .unwrap_err();
        assert_eq!(
            ToolOutput::error(err).content,
            "Error: No valid files found for the provided IDs. Use listFiles to get valid fileIDs."
        );
    }

    #[tokio::test]
    async fn rename_unknown_file_is_not_found() {
        let (_, tools) = setup();
        let err = run(&tools, "renameFile", json!({"fileId": "file_nope", "newName": "b.ts"}))
            .await
            .unwrap_err();
        assert!(ToolOutput::error(err).content.starts_with("Error: file not found"));

        let id = create(&tools, "a.ts", "").await;
        let out = run(&tools, "renameFile", json!({"fileId": id.as_str(), "newName": "b.ts"}))
            .await
            .unwrap();
        assert_eq!(out.content, "Renamed 'a.ts' to 'b.ts'");
    }

    #[tokio::test]
    async fn rename_onto_sibling_conflicts() {
        let (_, tools) = setup();
        let a = create(&tools, "a.ts", "").await;
        create(&tools, "b.ts", "").await;
        let err = run(&tools, "renameFile", json!({"fileId": a.as_str(), "newName": "b.ts"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Conflict(_)));
    }

    #[tokio::test]
    async fn foreign_file_is_rejected() {
        let (store, tools) = setup();
        let other = store.create_project("other").unwrap();
        let created = store
            .create_files(
                &other,
                None,
                &[pointer_store::NewFile {
                    name: "secret.env".into(),
                    content: "KEY=1".into(),
                }],
            )
            .await
            .unwrap();
        let foreign = created[0].file_id.clone().unwrap();

        for (name, args) in [
            ("readFiles", json!({"fileIds": [foreign.as_str()]})),
            ("updateFile", json!({"fileId": foreign.as_str(), "content": "x"})),
            ("deleteFiles", json!({"fileIds": [foreign.as_str()]})),
            ("renameFile", json!({"fileId": foreign.as_str(), "newName": "x"})),
        ] {
            let err = run(&tools, name, args).await.unwrap_err();
            assert!(matches!(err, ToolError::CrossProject(_)), "{name}: {err}");
        }
        assert_eq!(
            store.get_file(&foreign).await.unwrap().unwrap().content.as_deref(),
            Some("KEY=1")
        );
    }

    #[tokio::test]
    async fn nested_folder_reuses_existing_parents() {
        let (store, tools) = setup();
        run(&tools, "createFolder", json!({"name": "src"})).await.unwrap();
        let out = run(&tools, "createFolder", json!({"path": "src/components/ui"}))
            .await
            .unwrap();
        assert!(out.content.starts_with("Created folder 'src/components/ui' with id file_"));

        let files = store.list_files(tools.project_id()).await.unwrap();
        assert_eq!(files.iter().filter(|f| f.name == "src").count(), 1);
        assert_eq!(files.len(), 3);

        let err = run(&tools, "createFolder", json!({"name": "src"})).await.unwrap_err();
        assert_eq!(err.to_string(), "'src' already exists");
    }

    #[tokio::test]
    async fn create_into_file_parent_fails() {
        let (_, tools) = setup();
        let file = create(&tools, "a.ts", "").await;
        let err = run(
            &tools,
            "createFiles",
            json!({"parentId": file.as_str(), "files": [{"name": "b.ts", "content": ""}]}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::NotAFolder(_)));
    }

    #[tokio::test]
    async fn delete_folder_removes_contents() {
        let (store, tools) = setup();
        let out = run(&tools, "createFolder", json!({"name": "lib"})).await.unwrap();
        let folder_id = FileId::from_raw(out.content.rsplit(' ').next().unwrap());
        run(
            &tools,
            "createFiles",
            json!({"parentId": folder_id.as_str(), "files": [
                {"name": "a.ts", "content": "a"},
                {"name": "b.ts", "content": "b"}
            ]}),
        )
        .await
        .unwrap();

        let out = run(&tools, "deleteFiles", json!({"fileIds": [folder_id.as_str(), "file_gone"]}))
            .await
            .unwrap();
        assert!(out.content.starts_with("Deleted 3 item(s): lib"));
        assert!(out.content.contains("Skipped unknown ids: file_gone"));
        assert!(store.list_files(tools.project_id()).await.unwrap().is_empty());

        let err = run(&tools, "deleteFiles", json!({"fileIds": ["file_gone"]}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn update_rejects_folders() {
        let (store, tools) = setup();
        let out = run(&tools, "createFolder", json!({"name": "assets"})).await.unwrap();
        let folder_id = out.content.rsplit(' ').next().unwrap().to_string();
        let err = run(&tools, "updateFile", json!({"fileId": folder_id, "content": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::IsAFolder(_)));

        let id = create(&tools, "main.rs", "fn main() {}").await;
        run(&tools, "updateFile", json!({"fileId": id.as_str(), "content": "fn main() { run() }"}))
            .await
            .unwrap();
        let file = store.get_file(&id).await.unwrap().unwrap();
        assert_eq!(file.content.as_deref(), Some("fn main() { run() }"));
    }
}
