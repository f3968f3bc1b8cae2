//! Git stage error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::error::{Effect, Transience};

/// Errors from alignment and publication.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SyncError {
    #[error("failed to open repository at {0}: {1}")]
    OpenRepo(PathBuf, #[source] git2::Error),

    #[error("failed to clone {url}: {source}")]
    Clone {
        url: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to fetch from remote: {0}")]
    Fetch(#[source] git2::Error),

    #[error(
        "branch {branch:?} has {local_only} local commit(s) the remote lacks and the rebase \
         failed; resolve manually in the working copy ({source})"
    )]
    DivergedNeedsManual {
        branch: String,
        local_only: usize,
        #[source]
        source: git2::Error,
    },

    #[error("staged path {path:?} escapes the target subtree {subtree:?}")]
    ScopeViolation { path: String, subtree: String },

    #[error("push rejected (non-fast-forward)")]
    NonFastForward,

    #[error("failed to push: {0}")]
    Push(#[source] git2::Error),

    #[error("push rejected: {message}")]
    PushRejected { message: String },

    #[error("failed to create commit: {0}")]
    Commit(#[source] git2::Error),

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
}

impl SyncError {
    /// Whether retrying this stage may succeed.
    pub fn transience(&self) -> Transience {
        match self {
            SyncError::Clone { .. }
            | SyncError::Fetch(_)
            | SyncError::NonFastForward
            | SyncError::Push(_)
            | SyncError::PushRejected { .. } => Transience::Retryable,

            SyncError::OpenRepo(_, _)
            | SyncError::DivergedNeedsManual { .. }
            | SyncError::ScopeViolation { .. }
            | SyncError::Commit(_)
            | SyncError::Git(_) => Transience::Permanent,
        }
    }

    /// What we know about side effects when this error is returned.
    pub fn effect(&self) -> Effect {
        match self {
            // Push-phase errors occur after a local commit was created.
            SyncError::NonFastForward | SyncError::Push(_) | SyncError::PushRejected { .. } => {
                Effect::Some
            }

            // A failed clone may leave a partial directory behind.
            SyncError::Clone { .. } => Effect::Unknown,

            // Low-level git2 errors can happen at any phase.
            SyncError::Git(_) => Effect::Unknown,

            // Everything else fails before committing.
            _ => Effect::None,
        }
    }
}
