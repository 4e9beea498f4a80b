//! Per-project workspace directories under the projects root.
//!
//! Every project owns `<projects-root>/<project-id>`, a git repository that
//! agents mutate through plans. Provisioning either initializes an empty
//! repo or clones a remote.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::errors::CoreError;
use crate::models::WorkspaceSettings;

pub mod git;
pub mod mutator;

pub fn workspace_path(projects_root: &Path, project_id: i64) -> PathBuf {
    projects_root.join(project_id.to_string())
}

pub fn ensure_workspace(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create workspace {}", path.display()))
}

/// Provision a project workspace according to `repo_option` ("init" by
/// default, or "clone" with a remote URL) and return the settings to persist.
pub async fn setup_project_workspace(
    projects_root: &Path,
    project_id: i64,
    repo_option: Option<&str>,
    repo_url: Option<&str>,
) -> Result<WorkspaceSettings, CoreError> {
    let option = repo_option
        .map(|o| o.trim().to_lowercase())
        .filter(|o| !o.is_empty())
        .unwrap_or_else(|| "init".to_string());

    let path = workspace_path(projects_root, project_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create projects root {}", parent.display()))?;
    }

    let url = repo_url.map(str::trim).filter(|u| !u.is_empty());
    match option.as_str() {
        "clone" => {
            let url = url.ok_or(CoreError::CloneUrlRequired)?;
            git::clone_repo(url, &path).await?;
        }
        _ => {
            ensure_workspace(&path)?;
            git::init_repo(&path)?;
        }
    }

    Ok(WorkspaceSettings {
        workspace_path: path.to_string_lossy().into_owned(),
        repo_type: Some(option),
        repo_url: url.map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn workspace_path_joins_project_id() {
        let path = workspace_path(Path::new("data/projects"), 42);
        assert_eq!(path, PathBuf::from("data/projects/42"));
    }

    #[tokio::test]
    async fn setup_init_creates_git_repo() {
        let root = tempdir().unwrap();
        let settings = setup_project_workspace(root.path(), 7, None, None)
            .await
            .unwrap();
        assert_eq!(settings.repo_type.as_deref(), Some("init"));
        assert!(settings.repo_url.is_none());
        assert!(root.path().join("7").join(".git").exists());
    }

    #[tokio::test]
    async fn setup_clone_without_url_is_rejected() {
        let root = tempdir().unwrap();
        let err = setup_project_workspace(root.path(), 8, Some("clone"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::CloneUrlRequired));
        assert!(!root.path().join("8").exists());
    }

    #[tokio::test]
    async fn setup_clone_onto_existing_dir_is_rejected() {
        let root = tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("9")).unwrap();
        let err = setup_project_workspace(root.path(), 9, Some("clone"), Some("u://r"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::WorkspaceExists(_)));
    }
}
