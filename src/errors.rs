//! Typed errors for the orchestration core.
//!
//! Policy failures (dialog resolution, path sandboxing, workspace
//! provisioning) get their own variants so callers can map them to the right
//! HTTP status; everything else travels as `anyhow::Error` context chains.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("dialog already resolved")]
    DialogAlreadyResolved,

    #[error("dialog {0} not found")]
    DialogNotFound(i64),

    #[error("selected option required")]
    OptionRequired,

    #[error("invalid option selected")]
    InvalidOption,

    #[error("path {0} escapes workspace")]
    PathEscape(String),

    #[error("workspace {0} already exists")]
    WorkspaceExists(String),

    #[error("repo_url is required when repo_option is 'clone'")]
    CloneUrlRequired,

    #[error("prompt required")]
    PromptRequired,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// Whether the caller supplied bad input (as opposed to the server
    /// failing). Drives the 4xx/5xx split in the API layer.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Self::DialogAlreadyResolved
                | Self::DialogNotFound(_)
                | Self::OptionRequired
                | Self::InvalidOption
                | Self::WorkspaceExists(_)
                | Self::CloneUrlRequired
                | Self::PromptRequired
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_errors_are_bad_requests() {
        assert!(CoreError::DialogAlreadyResolved.is_bad_request());
        assert!(CoreError::OptionRequired.is_bad_request());
        assert!(CoreError::CloneUrlRequired.is_bad_request());
    }

    #[test]
    fn internal_errors_are_not_bad_requests() {
        let err = CoreError::Other(anyhow::anyhow!("disk on fire"));
        assert!(!err.is_bad_request());
        assert!(!CoreError::PathEscape("../x".into()).is_bad_request());
    }

    #[test]
    fn path_escape_names_the_offender() {
        let err = CoreError::PathEscape("../../etc/passwd".into());
        assert!(err.to_string().contains("../../etc/passwd"));
    }
}
