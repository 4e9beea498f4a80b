//! Sandboxed application of agent plans to a project workspace.
//!
//! Every path in a plan is normalized (host prefixes stripped) and then
//! joined against the workspace with a containment check; any path that
//! resolves outside the workspace aborts the whole apply. File writes create
//! parent directories; mutations are a single first-match replacement and
//! silently skip files that no longer contain the `find` text.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

use crate::agents::plan::ActionPlan;
use crate::errors::CoreError;

/// Lexically resolve `.` and `..` components without touching the
/// filesystem, so containment can be checked before anything exists.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Join a plan path onto the workspace, refusing anything that escapes it.
pub fn secure_join(workspace: &Path, relative: &str) -> Result<PathBuf, CoreError> {
    let base = lexical_clean(workspace);
    let joined = lexical_clean(&base.join(relative));
    if !joined.starts_with(&base) {
        return Err(CoreError::PathEscape(relative.to_string()));
    }
    Ok(joined)
}

/// Clean a model-supplied path and strip any prefix that duplicates the
/// workspace root, so "data/projects/3/src/app.ts" written by a confused
/// model still lands at "src/app.ts". Returns `None` for empty paths.
pub fn normalize_plan_path(workspace: &Path, candidate: &str) -> Option<String> {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return None;
    }

    let clean_workspace = lexical_clean(workspace);
    let clean_candidate = lexical_clean(Path::new(trimmed));

    if let Ok(rel) = clean_candidate.strip_prefix(&clean_workspace) {
        if !rel.as_os_str().is_empty() {
            return Some(rel.to_string_lossy().into_owned());
        }
    }

    // A path that nests the workspace's final segment somewhere inside it
    // (e.g. an absolute host path) is trimmed to the part after it.
    if let Some(base_segment) = clean_workspace.file_name() {
        let marker = format!(
            "{}{}{}",
            std::path::MAIN_SEPARATOR,
            base_segment.to_string_lossy(),
            std::path::MAIN_SEPARATOR
        );
        let candidate_str = clean_candidate.to_string_lossy();
        if let Some(idx) = candidate_str.find(&marker) {
            let rest = &candidate_str[idx + marker.len()..];
            if !rest.is_empty() {
                return Some(rest.to_string());
            }
        }
    }

    let stripped = clean_candidate
        .to_string_lossy()
        .trim_start_matches(std::path::MAIN_SEPARATOR)
        .to_string();
    Some(stripped)
}

/// Apply a plan to the workspace. Returns the human-readable summary.
pub fn apply_plan(
    workspace: &Path,
    agent_display: &str,
    plan: &ActionPlan,
) -> Result<String, CoreError> {
    let mut files_written = 0usize;
    let mut mutations_applied = 0usize;

    for file in &plan.files {
        let clean_path = match normalize_plan_path(workspace, &file.path) {
            Some(p) => p,
            None => continue,
        };
        let abs_path = secure_join(workspace, &clean_path)?;

        if let Some(parent) = abs_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to prepare directory for {}", file.path))
                .map_err(CoreError::Other)?;
        }

        let overwrite = file.overwrite.unwrap_or(true);
        if !overwrite && abs_path.exists() {
            continue;
        }

        std::fs::write(&abs_path, &file.content)
            .with_context(|| format!("failed to write file {}", file.path))
            .map_err(CoreError::Other)?;
        files_written += 1;
    }

    for mutation in &plan.mutations {
        if mutation.path.is_empty() || mutation.find.is_empty() {
            continue;
        }
        let clean_path = match normalize_plan_path(workspace, &mutation.path) {
            Some(p) => p,
            None => continue,
        };
        let abs_path = secure_join(workspace, &clean_path)?;

        let original = std::fs::read_to_string(&abs_path)
            .with_context(|| format!("failed to read {} for mutation", mutation.path))
            .map_err(CoreError::Other)?;
        if !original.contains(&mutation.find) {
            continue;
        }

        let updated = original.replacen(&mutation.find, &mutation.replace, 1);
        std::fs::write(&abs_path, updated)
            .with_context(|| format!("failed to apply mutation to {}", mutation.path))
            .map_err(CoreError::Other)?;
        mutations_applied += 1;
    }

    let mut summary = format!(
        "{} updated workspace (files={}, mutations={})",
        agent_display, files_written, mutations_applied
    );
    if !plan.notes.is_empty() {
        summary.push_str("; notes: ");
        summary.push_str(&plan.notes.join("; "));
    }
    Ok(summary)
}
