//! Version-control adapter for project workspaces.
//!
//! Local repository work (init, status, stage, commit) goes through libgit2;
//! network operations (clone, push) shell out to the `git` binary so the
//! user's credential helpers apply.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use git2::{IndexAddOption, Repository, Signature, StatusOptions};
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

const COMMIT_SUBJECT_LIMIT: usize = 72;

/// Outcome of one commit attempt against a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    pub commit_id: String,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    pub pushed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_error: Option<String>,
}

#[derive(Debug)]
pub enum CommitOutcome {
    /// Tree was clean (or the directory is not a repository); nothing done.
    NoChange,
    Committed(CommitResult),
}

pub fn init_repo(path: &Path) -> Result<()> {
    Repository::init(path)
        .with_context(|| format!("git init failed in {}", path.display()))?;
    Ok(())
}

pub async fn clone_repo(repo_url: &str, path: &Path) -> Result<(), CoreError> {
    if path.exists() {
        return Err(CoreError::WorkspaceExists(path.display().to_string()));
    }

    let output = tokio::process::Command::new("git")
        .args(["clone", repo_url])
        .arg(path)
        .output()
        .await
        .context("failed to run git clone")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CoreError::Other(anyhow!(
            "git clone failed: {}",
            stderr.trim()
        )));
    }
    Ok(())
}

/// Stage everything, commit, and push to origin when one is configured.
///
/// A push failure does not fail the commit; it is recorded on the result so
/// callers can surface it as a note.
pub async fn commit_workspace_changes(
    workspace: &Path,
    message: &str,
) -> Result<CommitOutcome> {
    if !workspace.join(".git").exists() {
        return Ok(CommitOutcome::NoChange);
    }

    // Scoped so every libgit2 handle (not `Send`) is dropped before the
    // `.await` below; otherwise the enclosing future can't be sent across
    // threads to `tokio::spawn`.
    let (commit_id, branch, remote) = {
        let repo = Repository::open(workspace)
            .with_context(|| format!("failed to open repository {}", workspace.display()))?;

        if is_tree_clean(&repo)? {
            return Ok(CommitOutcome::NoChange);
        }

        let mut index = repo.index().context("failed to read index")?;
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .context("git add failed")?;
        index.write().context("failed to write index")?;

        let tree_id = index.write_tree().context("failed to write tree")?;
        let tree = repo.find_tree(tree_id)?;
        let sig = Signature::now("crewroom", "crewroom@localhost")?;
        let subject = sanitize_commit_message(message);

        // Unborn branch means this is the initial commit.
        let head = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let commit_id = match head {
            Some(parent) => repo.commit(Some("HEAD"), &sig, &sig, &subject, &tree, &[&parent])?,
            None => repo.commit(Some("HEAD"), &sig, &sig, &subject, &tree, &[])?,
        };

        let branch = repo
            .head()
            .ok()
            .and_then(|h| h.shorthand().map(str::to_string))
            .unwrap_or_default();
        let remote = repo
            .find_remote("origin")
            .ok()
            .and_then(|r| r.url().map(str::to_string));

        (commit_id.to_string(), branch, remote)
    };

    let mut result = CommitResult {
        commit_id,
        branch: branch.clone(),
        remote: remote.clone(),
        pushed: false,
        push_error: None,
    };

    if remote.is_some() && !branch.is_empty() {
        match push_to_origin(workspace, &branch).await {
            Ok(()) => result.pushed = true,
            Err(e) => result.push_error = Some(e.to_string()),
        }
    }

    Ok(CommitOutcome::Committed(result))
}

fn is_tree_clean(repo: &Repository) -> Result<bool> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(true).recurse_untracked_dirs(true);
    let statuses = repo
        .statuses(Some(&mut opts))
        .context("git status failed")?;
    Ok(statuses.is_empty())
}

async fn push_to_origin(workspace: &Path, branch: &str) -> Result<()> {
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(workspace)
        .args(["push", "origin", branch])
        .output()
        .await
        .context("failed to run git push")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("git push failed: {}", stderr.trim()));
    }
    Ok(())
}

/// Trim a commit message to a single subject line of at most 72 characters,
/// ellipsizing longer ones.
pub fn sanitize_commit_message(msg: &str) -> String {
    let trimmed = msg.trim();
    if trimmed.is_empty() {
        return "Automated workspace update".to_string();
    }
    let first = trimmed.lines().next().unwrap_or("").trim();
    let chars: Vec<char> = first.chars().collect();
    if chars.len() > COMMIT_SUBJECT_LIMIT {
        let mut out: String = chars[..COMMIT_SUBJECT_LIMIT - 3].iter().collect();
        out.push_str("...");
        return out;
    }
    first.to_string()
}
