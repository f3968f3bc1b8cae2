//! The snapshot pass: lock → align → mirror → stage → commit → push.
//!
//! Strictly sequential; each stage only runs if the previous one succeeded,
//! and alignment always precedes any working-tree mutation.

use std::time::{Instant, SystemTime};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::Result;
use crate::config::Config;
use crate::git::{self, SnapshotProcess};
use crate::lock::RunLock;
use crate::mirror::{self, ExcludeSet, MirrorStats};
use crate::report::RunReport;

#[derive(Clone, Copy, Debug, Default)]
pub struct RunOptions {
    /// Align and mirror, compute the diff, but never commit or push.
    pub dry_run: bool,
    /// Commit-only maintenance mode, overriding the config's push flag.
    pub no_push: bool,
}

pub fn run(config: &Config, opts: RunOptions) -> Result<RunReport> {
    let clock = Instant::now();
    let started_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string());

    config.validate()?;

    let lock = RunLock::acquire(
        &config.effective_lock_path(),
        wall_ms(),
        env!("CARGO_PKG_VERSION"),
    )?;
    lock.guard_signals()?;
    tracing::debug!(path = %lock.path().display(), "lock acquired");

    let repo = git::open_or_clone(&config.repo.workdir, &config.repo.remote, config.repo.retries)?;

    let alignment = git::align(&repo, &config.repo, &config.committer)?;
    tracing::info!(
        branch = %config.repo.branch,
        outcome = alignment.as_str(),
        "remote alignment complete"
    );

    let exclude = ExcludeSet::from_patterns(&config.mirror.exclude);
    let subtree_root = config.repo.workdir.join(&config.repo.target_subtree);
    let mut mirror_stats = MirrorStats::default();
    for source in &config.sources {
        let dest = subtree_root.join(source.dest_name()?);
        let stats = mirror::mirror_tree(&source.path, &dest, &exclude)?;
        tracing::info!(
            source = %source.path.display(),
            copied = stats.files_copied,
            deleted = stats.files_deleted,
            "source mirrored"
        );
        mirror_stats.absorb(stats);
    }

    let staged = SnapshotProcess::new(config.repo.target_subtree.clone()).stage(&repo)?;
    let diff = staged.phase.diff.clone();

    let push_enabled = config.repo.push && !opts.no_push && !opts.dry_run;
    let mut commit = None;
    let mut pushed = false;
    if diff.is_empty() {
        tracing::info!("no changes since last snapshot");
        // A commit-only maintenance run may have left local commits behind;
        // a push-enabled run drains them even with nothing new to commit.
        if push_enabled && matches!(alignment, git::AlignOutcome::LocalAhead { .. }) {
            git::push_with_retry(&repo, &config.repo.branch, config.repo.retries)?;
            tracing::info!(branch = %config.repo.branch, "pushed pending local commits");
            pushed = true;
        }
    } else if opts.dry_run {
        tracing::info!(files = diff.files_changed(), "dry-run: skipping commit");
    } else {
        let committed = staged.commit(&repo, &config.committer)?;
        let oid = committed.commit_oid();
        tracing::info!(commit = %oid, files = diff.files_changed(), "snapshot committed");
        commit = Some(oid.to_string());

        if push_enabled {
            committed.push(&repo, &config.repo.branch, config.repo.retries)?;
            tracing::info!(branch = %config.repo.branch, "pushed to origin");
            pushed = true;
        } else {
            tracing::info!("push disabled, commit kept local");
        }
    }

    lock.release()?;

    Ok(RunReport {
        started_at,
        duration_ms: clock.elapsed().as_millis() as u64,
        dry_run: opts.dry_run,
        alignment: alignment.as_str(),
        sources: config.sources.len(),
        mirror: mirror_stats,
        staged_files: diff.files_changed(),
        insertions: diff.insertions,
        deletions: diff.deletions,
        commit,
        pushed,
    })
}

fn wall_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
