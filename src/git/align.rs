//! Remote alignment.
//!
//! Brings the local branch into a known relationship with its remote
//! counterpart before anything touches the working tree: fetch, classify
//! with ahead/behind counts, then fast-forward, hard-reset, or rebase per
//! the configured policy. Any failure here aborts the run before mirroring
//! starts (fail before mutate).

use git2::{Oid, Repository};

use crate::config::{AlignPolicy, CommitterConfig, RepoConfig};

use super::SyncError;
use super::remote_callbacks;

/// What alignment did to the local branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlignOutcome {
    /// Local head already equals the remote head.
    UpToDate,
    /// The remote has no such branch yet; the first publish creates it.
    RemoteAbsent,
    /// Local branch did not exist and was created at the remote tip.
    LocalInitialized { to: Oid },
    /// Local was a strict ancestor and was advanced to the remote tip.
    FastForwarded { to: Oid },
    /// Local is strictly ahead (remote is an ancestor); the next push
    /// fast-forwards the remote. Happens after commit-only runs.
    LocalAhead { commits: usize },
    /// Local divergence was discarded (reset policy).
    Reset { to: Oid },
    /// Local-only commits were replayed onto the remote tip.
    Rebased { onto: Oid, replayed: usize },
}

impl AlignOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlignOutcome::UpToDate => "up-to-date",
            AlignOutcome::RemoteAbsent => "remote-absent",
            AlignOutcome::LocalInitialized { .. } => "initialized",
            AlignOutcome::FastForwarded { .. } => "fast-forwarded",
            AlignOutcome::LocalAhead { .. } => "local-ahead",
            AlignOutcome::Reset { .. } => "reset",
            AlignOutcome::Rebased { .. } => "rebased",
        }
    }
}

/// Align the local branch with `origin/<branch>`.
///
/// Idempotent when already aligned. Never force-pushes, never auto-resolves
/// rebase conflicts: real local work surfaces as
/// [`SyncError::DivergedNeedsManual`].
pub fn align(
    repo: &Repository,
    repo_cfg: &RepoConfig,
    committer: &CommitterConfig,
) -> Result<AlignOutcome, SyncError> {
    let branch = repo_cfg.branch.as_str();
    let refname = format!("refs/heads/{branch}");
    let remote_ref = format!("refs/remotes/origin/{branch}");

    fetch_with_retry(repo, branch, repo_cfg.retries)?;

    let local_oid = repo.refname_to_id(&refname).ok();
    let remote_oid = repo.refname_to_id(&remote_ref).ok();

    match (local_oid, remote_oid) {
        (_, None) => {
            // Nothing to reconcile against; make sure HEAD is on our
            // branch so the first commit lands there.
            repo.set_head(&refname)?;
            if local_oid.is_some() {
                checkout_force(repo)?;
            }
            Ok(AlignOutcome::RemoteAbsent)
        }
        (None, Some(remote)) => {
            repo.reference(&refname, remote, true, "confgit: initialize from remote")?;
            repo.set_head(&refname)?;
            checkout_force(repo)?;
            Ok(AlignOutcome::LocalInitialized { to: remote })
        }
        (Some(local), Some(remote)) => {
            repo.set_head(&refname)?;
            if local == remote {
                return Ok(AlignOutcome::UpToDate);
            }

            let (ahead, behind) = repo.graph_ahead_behind(local, remote)?;
            if ahead == 0 {
                fast_forward(repo, &refname, remote)?;
                return Ok(AlignOutcome::FastForwarded { to: remote });
            }
            if behind == 0 {
                // Remote is an ancestor: nothing to reconcile, the push
                // fast-forwards it. Commit-only runs land here.
                return Ok(AlignOutcome::LocalAhead { commits: ahead });
            }

            match repo_cfg.policy {
                AlignPolicy::Reset => {
                    hard_reset(repo, remote)?;
                    tracing::info!(
                        branch,
                        discarded = ahead,
                        "reset policy discarded local commits"
                    );
                    Ok(AlignOutcome::Reset { to: remote })
                }
                AlignPolicy::Rebase => {
                    match rebase_onto(repo, &refname, &remote_ref, committer) {
                        Ok(replayed) => Ok(AlignOutcome::Rebased {
                            onto: remote,
                            replayed,
                        }),
                        // The ahead count decides the fallback: only a run
                        // with no real local work may degrade to reset.
                        Err(source) if ahead == 0 => {
                            hard_reset(repo, remote)?;
                            tracing::warn!(branch, error = %source, "rebase failed with no local commits, reset instead");
                            Ok(AlignOutcome::Reset { to: remote })
                        }
                        Err(source) => Err(SyncError::DivergedNeedsManual {
                            branch: branch.to_string(),
                            local_only: ahead,
                            source,
                        }),
                    }
                }
            }
        }
    }
}

/// Fetch the branch from origin, re-attempting immediately up to `retries`
/// times on transient failure.
pub(crate) fn fetch_with_retry(
    repo: &Repository,
    branch: &str,
    retries: u32,
) -> Result<(), SyncError> {
    let refspec = format!("refs/heads/{branch}");
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let mut remote = repo.find_remote("origin")?;
        let cfg = repo.config().ok();
        let mut fetch_options = git2::FetchOptions::new();
        fetch_options.remote_callbacks(remote_callbacks(cfg));
        match remote.fetch(&[refspec.as_str()], Some(&mut fetch_options), None) {
            Ok(()) => return Ok(()),
            // The remote exists but has no such branch yet (fresh mirror
            // repo); alignment proceeds against an absent remote head.
            Err(err) if err.code() == git2::ErrorCode::NotFound => {
                tracing::debug!(branch, "remote branch not found, treating as absent");
                return Ok(());
            }
            Err(err) if attempt <= retries => {
                tracing::warn!(attempt, error = %err, "fetch failed, retrying");
            }
            Err(err) => return Err(SyncError::Fetch(err)),
        }
    }
}

fn fast_forward(repo: &Repository, refname: &str, to: Oid) -> Result<(), SyncError> {
    repo.reference(refname, to, true, "confgit: fast-forward")?;
    repo.set_head(refname)?;
    checkout_force(repo)?;
    Ok(())
}

fn hard_reset(repo: &Repository, to: Oid) -> Result<(), SyncError> {
    let object = repo.find_object(to, None)?;
    repo.reset(&object, git2::ResetType::Hard, None)?;
    Ok(())
}

fn checkout_force(repo: &Repository) -> Result<(), SyncError> {
    let mut builder = git2::build::CheckoutBuilder::new();
    builder.force();
    repo.checkout_head(Some(&mut builder))?;
    Ok(())
}

/// Replay local-only commits onto the remote tip. On any failure the rebase
/// is aborted so the working copy is left on the original head.
fn rebase_onto(
    repo: &Repository,
    refname: &str,
    upstream_ref: &str,
    committer: &CommitterConfig,
) -> Result<usize, git2::Error> {
    let branch_ref = repo.find_reference(refname)?;
    let local = repo.reference_to_annotated_commit(&branch_ref)?;
    let upstream_reference = repo.find_reference(upstream_ref)?;
    let upstream = repo.reference_to_annotated_commit(&upstream_reference)?;
    let sig = git2::Signature::now(&committer.name, &committer.email)?;

    let mut rebase = repo.rebase(Some(&local), Some(&upstream), None, None)?;
    let mut replayed = 0usize;
    let mut failure: Option<git2::Error> = None;

    while let Some(operation) = rebase.next() {
        if let Err(err) = operation {
            failure = Some(err);
            break;
        }
        match repo.index() {
            Ok(index) if index.has_conflicts() => {
                failure = Some(git2::Error::from_str("rebase produced conflicts"));
                break;
            }
            Ok(_) => {}
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
        match rebase.commit(None, &sig, None) {
            Ok(_) => replayed += 1,
            // Patch already present upstream: nothing to commit, keep going.
            Err(err) if err.code() == git2::ErrorCode::Applied => {}
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    match failure {
        None => {
            rebase.finish(Some(&sig))?;
            Ok(replayed)
        }
        Some(err) => {
            let _ = rebase.abort();
            Err(err)
        }
    }
}
