//! Git operations: remote alignment and snapshot publication.

use std::path::Path;

use git2::Repository;

pub mod align;
pub mod error;
pub mod publish;

pub use align::{AlignOutcome, align};
pub use error::SyncError;
pub use publish::{Idle, SnapshotDiff, SnapshotProcess, push_with_retry};

/// Credential chain for fetch/clone/push: ssh-agent, then the configured
/// git credential helper, then defaults.
pub(crate) fn remote_callbacks(cfg: Option<git2::Config>) -> git2::RemoteCallbacks<'static> {
    let mut callbacks = git2::RemoteCallbacks::new();
    callbacks.credentials(move |url, username_from_url, allowed| {
        if allowed.is_ssh_key()
            && let Some(user) = username_from_url
        {
            return git2::Cred::ssh_key_from_agent(user);
        }
        if allowed.is_user_pass_plaintext()
            && let Some(ref cfg) = cfg
            && let Ok(cred) = git2::Cred::credential_helper(cfg, url, username_from_url)
        {
            return Ok(cred);
        }
        git2::Cred::default()
    });
    callbacks
}

/// Open the working copy, cloning it from the remote on first use.
///
/// An opened repository without an `origin` remote gets one pointing at the
/// configured URL; an existing `origin` is left as it stands.
pub fn open_or_clone(
    workdir: &Path,
    remote_url: &str,
    retries: u32,
) -> Result<Repository, SyncError> {
    if workdir.join(".git").exists() {
        let repo = Repository::open(workdir)
            .map_err(|err| SyncError::OpenRepo(workdir.to_path_buf(), err))?;
        if repo.find_remote("origin").is_err() {
            repo.remote("origin", remote_url)?;
        }
        return Ok(repo);
    }

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let cfg = git2::Config::open_default().ok();
        let mut fetch_options = git2::FetchOptions::new();
        fetch_options.remote_callbacks(remote_callbacks(cfg));
        match git2::build::RepoBuilder::new()
            .fetch_options(fetch_options)
            .clone(remote_url, workdir)
        {
            Ok(repo) => {
                tracing::info!(workdir = %workdir.display(), "cloned working copy");
                return Ok(repo);
            }
            Err(err) if attempt <= retries => {
                tracing::warn!(attempt, error = %err, "clone failed, retrying");
            }
            Err(err) => {
                return Err(SyncError::Clone {
                    url: remote_url.to_string(),
                    source: err,
                });
            }
        }
    }
}
