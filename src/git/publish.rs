//! Snapshot publication typestate machine.
//!
//! Idle → Staged → Committed, each transition consuming `self`, so a commit
//! cannot happen before staging and a push cannot happen before a commit.
//!
//! Key invariants:
//! - Staging is scoped to the target subtree pathspec, and the HEAD→index
//!   diff is re-checked afterwards: any staged path outside the subtree
//!   aborts the run before a commit exists.
//! - An empty staged diff never becomes a commit.
//! - Push is a separate, optional step with its own retry loop; a rejected
//!   push is never forced.

use std::cell::RefCell;
use std::path::Path;

use git2::{IndexAddOption, Oid, Repository, Signature};

use crate::config::CommitterConfig;

use super::SyncError;
use super::remote_callbacks;

// =============================================================================
// Phase markers
// =============================================================================

/// Initial phase - ready to stage.
pub struct Idle;

/// Staged phase - index updated, diff computed and scope-checked.
pub struct Staged {
    pub diff: SnapshotDiff,
    parent: Option<Oid>,
}

/// Committed phase - commit created on the current branch.
pub struct Committed {
    pub commit_oid: Oid,
}

/// Kind of change for one staged path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

/// A single staged change, tracked for the commit message and report.
#[derive(Clone, Debug)]
pub struct ChangedPath {
    pub path: String,
    pub kind: ChangeKind,
}

/// Summary of the staged diff.
#[derive(Default, Clone, Debug)]
pub struct SnapshotDiff {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub insertions: usize,
    pub deletions: usize,
    pub details: Vec<ChangedPath>,
}

impl SnapshotDiff {
    const MAX_DETAILED_CHANGES: usize = 5;

    pub fn is_empty(&self) -> bool {
        self.added + self.updated + self.removed == 0
    }

    pub fn files_changed(&self) -> usize {
        self.added + self.updated + self.removed
    }

    /// Commit message: count subject, plus a per-path body when the change
    /// is small enough to enumerate.
    pub fn to_commit_message(&self, subtree: &str) -> String {
        let subject = self.to_count_message(subtree);
        if self.details.is_empty() || self.files_changed() > Self::MAX_DETAILED_CHANGES {
            return subject;
        }

        let body: Vec<String> = self
            .details
            .iter()
            .map(|change| {
                let verb = match change.kind {
                    ChangeKind::Added => "added",
                    ChangeKind::Updated => "updated",
                    ChangeKind::Removed => "removed",
                };
                format!("{verb} {}", change.path)
            })
            .collect();
        format!("{subject}\n\n{}", body.join("\n"))
    }

    fn to_count_message(&self, subtree: &str) -> String {
        let mut parts = Vec::new();
        if self.added > 0 {
            parts.push(format!("+{} added", self.added));
        }
        if self.updated > 0 {
            parts.push(format!("~{} updated", self.updated));
        }
        if self.removed > 0 {
            parts.push(format!("-{} removed", self.removed));
        }
        if parts.is_empty() {
            format!("confgit({subtree}): no changes")
        } else {
            format!("confgit({subtree}): {}", parts.join(", "))
        }
    }
}

// =============================================================================
// SnapshotProcess - the typestate machine
// =============================================================================

/// Publication process with typestate-enforced phases.
///
/// Use `SnapshotProcess::new()` to start, then chain transitions:
/// ```ignore
/// let staged = SnapshotProcess::new(subtree).stage(&repo)?;
/// if !staged.phase.diff.is_empty() {
///     let committed = staged.commit(&repo, &committer)?;
///     committed.push(&repo, &branch, retries)?;
/// }
/// ```
pub struct SnapshotProcess<Phase> {
    pub subtree: String,
    pub phase: Phase,
}

impl SnapshotProcess<Idle> {
    pub fn new(subtree: impl Into<String>) -> Self {
        SnapshotProcess {
            subtree: subtree.into(),
            phase: Idle,
        }
    }

    /// Stage the target subtree and transition to Staged.
    ///
    /// Rejects the run if the resulting index differs from HEAD anywhere
    /// outside the subtree, which also catches staged leftovers from a
    /// foreign `git add` in the working copy.
    pub fn stage(self, repo: &Repository) -> Result<SnapshotProcess<Staged>, SyncError> {
        let mut index = repo.index()?;
        index.add_all([self.subtree.as_str()], IndexAddOption::DEFAULT, None)?;
        index.update_all([self.subtree.as_str()], None)?;

        let (head_tree, parent) = match repo.head() {
            Ok(head) => {
                let commit = head.peel_to_commit()?;
                (Some(commit.tree()?), Some(commit.id()))
            }
            Err(_) => (None, None),
        };

        let diff = repo.diff_tree_to_index(head_tree.as_ref(), Some(&index), None)?;

        let mut snapshot = SnapshotDiff::default();
        for delta in diff.deltas() {
            let path = delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !path_in_subtree(&path, &self.subtree) {
                return Err(SyncError::ScopeViolation {
                    path,
                    subtree: self.subtree,
                });
            }
            let kind = match delta.status() {
                git2::Delta::Added | git2::Delta::Copied => {
                    snapshot.added += 1;
                    ChangeKind::Added
                }
                git2::Delta::Deleted => {
                    snapshot.removed += 1;
                    ChangeKind::Removed
                }
                _ => {
                    snapshot.updated += 1;
                    ChangeKind::Updated
                }
            };
            snapshot.details.push(ChangedPath { path, kind });
        }

        if let Ok(stats) = diff.stats() {
            snapshot.insertions = stats.insertions();
            snapshot.deletions = stats.deletions();
        }

        index.write()?;

        Ok(SnapshotProcess {
            subtree: self.subtree,
            phase: Staged {
                diff: snapshot,
                parent,
            },
        })
    }
}

impl SnapshotProcess<Staged> {
    /// Commit the staged snapshot, transition to Committed.
    ///
    /// Callers must skip this when the diff is empty; committing an empty
    /// diff would produce a no-op commit, which the run contract forbids.
    pub fn commit(
        self,
        repo: &Repository,
        committer: &CommitterConfig,
    ) -> Result<SnapshotProcess<Committed>, SyncError> {
        let Staged { diff, parent } = self.phase;

        let mut index = repo.index()?;
        let tree_oid = index.write_tree().map_err(SyncError::Commit)?;
        let tree = repo.find_tree(tree_oid)?;

        let sig =
            Signature::now(&committer.name, &committer.email).map_err(SyncError::Commit)?;
        let message = diff.to_commit_message(&self.subtree);

        let parents: Vec<_> = match parent {
            Some(oid) => vec![repo.find_commit(oid)?],
            None => vec![],
        };
        let parent_refs: Vec<_> = parents.iter().collect();

        let commit_oid = repo
            .commit(Some("HEAD"), &sig, &sig, &message, &tree, &parent_refs)
            .map_err(SyncError::Commit)?;

        Ok(SnapshotProcess {
            subtree: self.subtree,
            phase: Committed { commit_oid },
        })
    }
}

impl SnapshotProcess<Committed> {
    pub fn commit_oid(&self) -> Oid {
        self.phase.commit_oid
    }

    /// Push the branch to origin, completing the publication.
    pub fn push(&self, repo: &Repository, branch: &str, retries: u32) -> Result<(), SyncError> {
        push_with_retry(repo, branch, retries)
    }
}

/// Push `refs/heads/<branch>` to origin, re-attempting immediately up to
/// `retries` times on transient failure. Never forces.
pub fn push_with_retry(repo: &Repository, branch: &str, retries: u32) -> Result<(), SyncError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match push_once(repo, branch) {
            Ok(()) => return Ok(()),
            Err(err) if err.transience().is_retryable() && attempt <= retries => {
                tracing::warn!(attempt, error = %err, "push failed, retrying");
            }
            Err(err) => return Err(err),
        }
    }
}

fn push_once(repo: &Repository, branch: &str) -> Result<(), SyncError> {
    let mut remote = repo.find_remote("origin")?;
    let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");

    let push_error: RefCell<Option<String>> = RefCell::new(None);
    {
        let cfg = repo.config().ok();
        let mut callbacks = remote_callbacks(cfg);
        callbacks.push_update_reference(|_ref_name, status| {
            if let Some(msg) = status {
                *push_error.borrow_mut() = Some(msg.to_string());
            }
            Ok(())
        });

        let mut push_options = git2::PushOptions::new();
        push_options.remote_callbacks(callbacks);

        if let Err(err) = remote.push(&[refspec.as_str()], Some(&mut push_options)) {
            let msg = err.to_string();
            if msg.contains("non-fast-forward")
                || msg.contains("fetch first")
                || msg.contains("cannot lock ref")
                || msg.contains("failed to update ref")
            {
                return Err(SyncError::NonFastForward);
            }
            return Err(SyncError::Push(err));
        }
    }

    if let Some(message) = push_error.into_inner() {
        if message.contains("non-fast-forward") || message.contains("fetch first") {
            return Err(SyncError::NonFastForward);
        }
        return Err(SyncError::PushRejected { message });
    }

    Ok(())
}

/// Component-wise prefix check; `hosts/gw1x` is not under `hosts/gw1`.
fn path_in_subtree(path: &str, subtree: &str) -> bool {
    Path::new(path).starts_with(Path::new(subtree))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_in_subtree_is_component_wise() {
        assert!(path_in_subtree("hosts/gw1/etc/rc.conf", "hosts/gw1"));
        assert!(path_in_subtree("hosts/gw1", "hosts/gw1"));
        assert!(!path_in_subtree("hosts/gw1x/etc/rc.conf", "hosts/gw1"));
        assert!(!path_in_subtree("etc/rc.conf", "hosts/gw1"));
    }

    #[test]
    fn count_message_formats() {
        let diff = SnapshotDiff {
            added: 2,
            updated: 1,
            removed: 0,
            ..SnapshotDiff::default()
        };
        assert_eq!(
            diff.to_commit_message("hosts/gw1"),
            "confgit(hosts/gw1): +2 added, ~1 updated"
        );

        let diff = SnapshotDiff {
            removed: 3,
            ..SnapshotDiff::default()
        };
        assert_eq!(
            diff.to_commit_message("hosts/gw1"),
            "confgit(hosts/gw1): -3 removed"
        );

        let diff = SnapshotDiff::default();
        assert_eq!(
            diff.to_commit_message("hosts/gw1"),
            "confgit(hosts/gw1): no changes"
        );
    }

    #[test]
    fn detailed_message_lists_paths() {
        let diff = SnapshotDiff {
            added: 1,
            updated: 1,
            removed: 0,
            insertions: 2,
            deletions: 1,
            details: vec![
                ChangedPath {
                    path: "hosts/gw1/etc/rc.conf".to_string(),
                    kind: ChangeKind::Added,
                },
                ChangedPath {
                    path: "hosts/gw1/etc/pf.conf".to_string(),
                    kind: ChangeKind::Updated,
                },
            ],
        };
        let message = diff.to_commit_message("hosts/gw1");
        assert!(message.starts_with("confgit(hosts/gw1): +1 added, ~1 updated"));
        assert!(message.contains("added hosts/gw1/etc/rc.conf"));
        assert!(message.contains("updated hosts/gw1/etc/pf.conf"));
    }

    #[test]
    fn large_diffs_fall_back_to_counts() {
        let details: Vec<ChangedPath> = (0..8)
            .map(|i| ChangedPath {
                path: format!("hosts/gw1/etc/file{i}"),
                kind: ChangeKind::Added,
            })
            .collect();
        let diff = SnapshotDiff {
            added: 8,
            details,
            ..SnapshotDiff::default()
        };
        let message = diff.to_commit_message("hosts/gw1");
        assert_eq!(message, "confgit(hosts/gw1): +8 added");
    }
}
