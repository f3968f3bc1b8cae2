//! Delete-extraneous directory mirroring.
//!
//! Converges a destination tree to match a source tree: new and changed
//! files are copied, entries missing from the source are removed. The
//! source is authoritative. Excluded names are neither copied nor deleted,
//! and non-regular files (sockets, fifos, devices) are always skipped.
//!
//! Mirroring is not transactional. An interrupted run leaves a partial
//! destination which the next run converges again.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::error::{Effect, Transience};

/// Exclusion rules: exact entry names plus `*suffix` patterns.
#[derive(Clone, Debug, Default)]
pub struct ExcludeSet {
    names: BTreeSet<String>,
    suffixes: Vec<String>,
}

impl ExcludeSet {
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut names = BTreeSet::new();
        let mut suffixes = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            if let Some(suffix) = pattern.strip_prefix('*') {
                if !suffix.is_empty() {
                    suffixes.push(suffix.to_string());
                }
            } else {
                names.insert(pattern.to_string());
            }
        }
        Self { names, suffixes }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.names.contains(name) || self.suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }

    fn excludes_entry(&self, entry: &walkdir::DirEntry) -> bool {
        entry
            .file_name()
            .to_str()
            .map(|name| self.matches(name))
            .unwrap_or(false)
    }

    /// True if any path component matches. The deletion walk yields entries
    /// contents-first, where `filter_entry` cannot prune a directory before
    /// its children, so each entry is checked against its full path.
    fn excludes_rel_path(&self, rel: &Path) -> bool {
        rel.components().any(|component| {
            component
                .as_os_str()
                .to_str()
                .map(|name| self.matches(name))
                .unwrap_or(false)
        })
    }
}

/// Per-run mirror statistics, aggregated across sources.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct MirrorStats {
    pub files_copied: usize,
    pub files_deleted: usize,
    pub dirs_created: usize,
    pub bytes_written: u64,
}

impl MirrorStats {
    pub fn absorb(&mut self, other: MirrorStats) {
        self.files_copied += other.files_copied;
        self.files_deleted += other.files_deleted;
        self.dirs_created += other.dirs_created;
        self.bytes_written += other.bytes_written;
    }
}

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("source directory missing: {0}")]
    SourceMissing(PathBuf),

    #[error("failed to walk {path:?}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to copy to {path:?}: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove {path:?}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MirrorError {
    pub fn transience(&self) -> Transience {
        match self {
            MirrorError::SourceMissing(_) => Transience::Permanent,
            _ => Transience::Unknown,
        }
    }

    pub fn effect(&self) -> Effect {
        // Mirroring mutates the working tree in place; on error we cannot
        // say how far it got.
        Effect::Unknown
    }
}

/// Converge `dest` to match `src`.
pub fn mirror_tree(
    src: &Path,
    dest: &Path,
    exclude: &ExcludeSet,
) -> Result<MirrorStats, MirrorError> {
    let src_meta = fs::symlink_metadata(src)
        .map_err(|_| MirrorError::SourceMissing(src.to_path_buf()))?;
    if !src_meta.is_dir() {
        return Err(MirrorError::SourceMissing(src.to_path_buf()));
    }

    let mut stats = MirrorStats::default();
    if !dest.exists() {
        fs::create_dir_all(dest).map_err(|source| MirrorError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        stats.dirs_created += 1;
    }

    copy_pass(src, dest, exclude, &mut stats)?;
    delete_pass(src, dest, exclude, &mut stats)?;
    Ok(stats)
}

fn copy_pass(
    src: &Path,
    dest: &Path,
    exclude: &ExcludeSet,
    stats: &mut MirrorStats,
) -> Result<(), MirrorError> {
    let walker = WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !exclude.excludes_entry(entry));

    for entry in walker {
        let entry = entry.map_err(|source| MirrorError::Walk {
            path: src.to_path_buf(),
            source,
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir yields paths under its root");
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if !target.is_dir() {
                replace_with_dir(&target)?;
                stats.dirs_created += 1;
            }
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else if file_type.is_file() {
            let meta = entry.metadata().map_err(|source| MirrorError::Walk {
                path: entry.path().to_path_buf(),
                source,
            })?;
            if needs_copy(&meta, &target) {
                copy_file(entry.path(), &target, &meta, stats)?;
            }
        } else {
            // Sockets, fifos, devices: never snapshot these.
            tracing::debug!(path = %entry.path().display(), "skipping non-regular file");
        }
    }
    Ok(())
}

fn delete_pass(
    src: &Path,
    dest: &Path,
    exclude: &ExcludeSet,
    stats: &mut MirrorStats,
) -> Result<(), MirrorError> {
    let walker = WalkDir::new(dest).min_depth(1).contents_first(true);

    for entry in walker {
        let entry = entry.map_err(|source| MirrorError::Walk {
            path: dest.to_path_buf(),
            source,
        })?;
        let rel = entry
            .path()
            .strip_prefix(dest)
            .expect("walkdir yields paths under its root");
        if exclude.excludes_rel_path(rel) {
            continue;
        }
        if fs::symlink_metadata(src.join(rel)).is_ok() {
            continue;
        }

        if entry.file_type().is_dir() {
            // contents_first means children went first; a leftover here
            // holds excluded entries, which we must not delete.
            if let Err(err) = fs::remove_dir(entry.path()) {
                tracing::debug!(
                    path = %entry.path().display(),
                    error = %err,
                    "leaving non-empty extraneous directory"
                );
            }
        } else {
            fs::remove_file(entry.path()).map_err(|source| MirrorError::Remove {
                path: entry.path().to_path_buf(),
                source,
            })?;
            stats.files_deleted += 1;
        }
    }
    Ok(())
}

/// Size or mtime mismatch means copy. A false positive re-copies identical
/// bytes, which staging later discards as unchanged.
fn needs_copy(src_meta: &fs::Metadata, dest: &Path) -> bool {
    let dest_meta = match fs::symlink_metadata(dest) {
        Ok(meta) => meta,
        Err(_) => return true,
    };
    if !dest_meta.is_file() {
        return true;
    }
    if dest_meta.len() != src_meta.len() {
        return true;
    }
    match (src_meta.modified(), dest_meta.modified()) {
        (Ok(a), Ok(b)) => a != b,
        _ => true,
    }
}

fn copy_file(
    src: &Path,
    dest: &Path,
    src_meta: &fs::Metadata,
    stats: &mut MirrorStats,
) -> Result<(), MirrorError> {
    if let Ok(existing) = fs::symlink_metadata(dest)
        && !existing.is_file()
    {
        remove_any(dest, existing.is_dir())?;
    }
    if let Some(parent) = dest.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|source| MirrorError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let bytes = fs::copy(src, dest).map_err(|source| MirrorError::Copy {
        path: dest.to_path_buf(),
        source,
    })?;
    carry_mtime(src_meta, dest);

    stats.files_copied += 1;
    stats.bytes_written += bytes;
    Ok(())
}

/// Propagate the source mtime so the next run's change detection holds.
fn carry_mtime(src_meta: &fs::Metadata, dest: &Path) {
    if let Ok(mtime) = src_meta.modified()
        && let Ok(file) = fs::OpenOptions::new().write(true).open(dest)
    {
        let _ = file.set_modified(mtime);
    }
}

fn copy_symlink(src: &Path, dest: &Path) -> Result<(), MirrorError> {
    let link_target = fs::read_link(src).map_err(|source| MirrorError::Io {
        path: src.to_path_buf(),
        source,
    })?;

    if let Ok(existing) = fs::symlink_metadata(dest) {
        if existing.file_type().is_symlink()
            && fs::read_link(dest).map(|t| t == link_target).unwrap_or(false)
        {
            return Ok(());
        }
        remove_any(dest, existing.is_dir())?;
    }

    if let Some(parent) = dest.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|source| MirrorError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(&link_target, dest).map_err(|source| MirrorError::Copy {
        path: dest.to_path_buf(),
        source,
    })?;
    #[cfg(not(unix))]
    {
        let _ = link_target;
        tracing::warn!(path = %dest.display(), "symlinks unsupported on this platform, skipping");
    }
    Ok(())
}

fn replace_with_dir(target: &Path) -> Result<(), MirrorError> {
    if let Ok(existing) = fs::symlink_metadata(target) {
        remove_any(target, existing.is_dir())?;
    }
    fs::create_dir_all(target).map_err(|source| MirrorError::Io {
        path: target.to_path_buf(),
        source,
    })
}

fn remove_any(path: &Path, is_dir: bool) -> Result<(), MirrorError> {
    let result = if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|source| MirrorError::Remove {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn set_mtime(path: &Path, when: SystemTime) {
        let file = fs::OpenOptions::new().write(true).open(path).expect("open");
        file.set_modified(when).expect("set mtime");
    }

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, contents).expect("write");
    }

    fn default_excludes() -> ExcludeSet {
        ExcludeSet::from_patterns(&[".git", "*.sock", "*.db", "*.swp"])
    }

    #[test]
    fn exclude_set_matches_names_and_suffixes() {
        let set = default_excludes();
        assert!(set.matches(".git"));
        assert!(set.matches("pf.db"));
        assert!(set.matches("api.sock"));
        assert!(!set.matches("rc.conf"));
        assert!(!set.matches("git"));
    }

    #[test]
    fn mirror_copies_new_files_and_dirs() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dest = tmp.path().join("dest");
        write(&src.join("rc.conf"), "hostname=a");
        write(&src.join("pf/pf.conf"), "block all");

        let stats = mirror_tree(&src, &dest, &default_excludes()).expect("mirror");

        assert_eq!(fs::read_to_string(dest.join("rc.conf")).unwrap(), "hostname=a");
        assert_eq!(fs::read_to_string(dest.join("pf/pf.conf")).unwrap(), "block all");
        assert_eq!(stats.files_copied, 2);
        assert!(stats.bytes_written > 0);
    }

    #[test]
    fn mirror_is_idempotent_when_unchanged() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dest = tmp.path().join("dest");
        write(&src.join("rc.conf"), "hostname=a");

        mirror_tree(&src, &dest, &default_excludes()).expect("first");
        let stats = mirror_tree(&src, &dest, &default_excludes()).expect("second");

        assert_eq!(stats.files_copied, 0);
        assert_eq!(stats.files_deleted, 0);
    }

    #[test]
    fn mirror_recopies_changed_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dest = tmp.path().join("dest");
        write(&src.join("rc.conf"), "hostname=a");
        mirror_tree(&src, &dest, &default_excludes()).expect("first");

        write(&src.join("rc.conf"), "hostname=b");
        set_mtime(
            &src.join("rc.conf"),
            SystemTime::now() + Duration::from_secs(5),
        );
        let stats = mirror_tree(&src, &dest, &default_excludes()).expect("second");

        assert_eq!(stats.files_copied, 1);
        assert_eq!(fs::read_to_string(dest.join("rc.conf")).unwrap(), "hostname=b");
    }

    #[test]
    fn mirror_deletes_extraneous_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dest = tmp.path().join("dest");
        write(&src.join("keep.conf"), "keep");
        write(&dest.join("stale.conf"), "stale");
        write(&dest.join("old/nested.conf"), "old");

        let stats = mirror_tree(&src, &dest, &default_excludes()).expect("mirror");

        assert!(dest.join("keep.conf").exists());
        assert!(!dest.join("stale.conf").exists());
        assert!(!dest.join("old").exists());
        assert_eq!(stats.files_deleted, 2);
    }

    #[test]
    fn excluded_entries_are_neither_copied_nor_deleted() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dest = tmp.path().join("dest");
        write(&src.join("rc.conf"), "a");
        write(&src.join("state.db"), "binary");
        write(&src.join(".git/config"), "vcs");
        write(&dest.join("local.db"), "keep me");

        mirror_tree(&src, &dest, &default_excludes()).expect("mirror");

        assert!(!dest.join("state.db").exists());
        assert!(!dest.join(".git").exists());
        assert!(dest.join("local.db").exists());
    }

    #[test]
    fn contents_of_excluded_dest_dirs_survive_deletion() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dest = tmp.path().join("dest");
        write(&src.join("rc.conf"), "a");
        // An excluded directory in the destination, absent from the source:
        // nothing under it may be deleted.
        write(&dest.join(".git/config"), "vcs");
        write(&dest.join(".git/objects/ab"), "blob");

        mirror_tree(&src, &dest, &default_excludes()).expect("mirror");

        assert!(dest.join(".git/config").exists());
        assert!(dest.join(".git/objects/ab").exists());
    }

    #[cfg(unix)]
    #[test]
    fn mirror_recreates_symlinks() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dest = tmp.path().join("dest");
        write(&src.join("real.conf"), "x");
        fs::create_dir_all(&src).expect("mkdir");
        std::os::unix::fs::symlink("real.conf", src.join("alias.conf")).expect("symlink");

        mirror_tree(&src, &dest, &default_excludes()).expect("mirror");

        let link = fs::read_link(dest.join("alias.conf")).expect("read link");
        assert_eq!(link, PathBuf::from("real.conf"));
    }

    #[test]
    fn missing_source_is_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = mirror_tree(
            &tmp.path().join("nope"),
            &tmp.path().join("dest"),
            &default_excludes(),
        )
        .expect_err("missing source");
        assert!(matches!(err, MirrorError::SourceMissing(_)));
    }
}
