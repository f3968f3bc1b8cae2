//! Configuration schema.
//!
//! One `Config` is loaded at startup and passed by reference into each
//! stage; nothing reads configuration globally after that.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Effect, Transience};

mod load;
mod merge;

pub use load::{load, user_config_path, write_default_config};
pub use merge::{apply_env_overrides, merge_layer};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub repo: RepoConfig,
    pub sources: Vec<SourceDir>,
    pub mirror: MirrorSettings,
    pub committer: CommitterConfig,
    pub lock: LockConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Startup validation: runs before the lock is taken, so a bad config
    /// never mutates anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repo.remote.trim().is_empty() {
            return Err(ConfigError::MissingKey("repo.remote"));
        }
        if self.repo.branch.trim().is_empty() {
            return Err(ConfigError::MissingKey("repo.branch"));
        }
        if self.repo.workdir.as_os_str().is_empty() {
            return Err(ConfigError::MissingKey("repo.workdir"));
        }
        validate_subtree(&self.repo.target_subtree)?;
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        for source in &self.sources {
            if source.path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidSource {
                    path: source.path.clone(),
                    reason: "empty path".into(),
                });
            }
            if !source.path.is_dir() {
                return Err(ConfigError::SourceMissing(source.path.clone()));
            }
            let dest = source.dest_name()?;
            if dest.contains('/') || dest == ".." || dest == "." {
                return Err(ConfigError::InvalidSource {
                    path: source.path.clone(),
                    reason: format!("destination {dest:?} must be a plain directory name"),
                });
            }
        }
        if self.committer.name.trim().is_empty() || self.committer.email.trim().is_empty() {
            return Err(ConfigError::MissingKey("committer.name/email"));
        }
        Ok(())
    }

    pub fn effective_lock_path(&self) -> PathBuf {
        self.lock
            .path
            .clone()
            .unwrap_or_else(crate::paths::default_lock_path)
    }
}

fn validate_subtree(subtree: &str) -> Result<(), ConfigError> {
    if subtree.trim().is_empty() {
        return Err(ConfigError::MissingKey("repo.target_subtree"));
    }
    if subtree.starts_with('/') {
        return Err(ConfigError::InvalidSubtree {
            subtree: subtree.to_string(),
            reason: "must be relative to the working copy".into(),
        });
    }
    if subtree.split('/').any(|part| part == ".." || part == ".git") {
        return Err(ConfigError::InvalidSubtree {
            subtree: subtree.to_string(),
            reason: "must not traverse upward or into .git".into(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Remote URL the working copy tracks.
    pub remote: String,
    pub branch: String,
    /// Local working copy; cloned from the remote if absent.
    pub workdir: PathBuf,
    /// Subtree of the repository this host is allowed to touch.
    pub target_subtree: String,
    pub policy: AlignPolicy,
    pub push: bool,
    /// Immediate re-attempts for fetch/push before giving up.
    pub retries: u32,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            remote: String::new(),
            branch: "main".to_string(),
            workdir: PathBuf::new(),
            target_subtree: String::new(),
            policy: AlignPolicy::default(),
            push: true,
            retries: 3,
        }
    }
}

/// How local and remote branch state are reconciled before mirroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignPolicy {
    /// Discard local divergence, hard-reset to the remote tip.
    Reset,
    /// Replay local-only commits onto the remote tip; abort on conflict.
    #[default]
    Rebase,
}

impl AlignPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            AlignPolicy::Reset => "reset",
            AlignPolicy::Rebase => "rebase",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDir {
    /// Directory to snapshot.
    pub path: PathBuf,
    /// Destination name under the target subtree; defaults to the source's
    /// final path component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
}

impl SourceDir {
    pub fn dest_name(&self) -> Result<String, ConfigError> {
        if let Some(dest) = &self.dest {
            return Ok(dest.clone());
        }
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.to_string())
            .ok_or_else(|| ConfigError::InvalidSource {
                path: self.path.clone(),
                reason: "cannot derive destination name, set `dest` explicitly".into(),
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorSettings {
    /// Entry names and `*suffix` patterns never copied or deleted.
    pub exclude: Vec<String>,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            exclude: default_exclude(),
        }
    }
}

pub fn default_exclude() -> Vec<String> {
    [
        ".git", ".hg", ".svn", "*.sock", "*.pid", "*.db", "*.sqlite", "*.swp", "*.tmp", "*.bak",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitterConfig {
    pub name: String,
    pub email: String,
}

impl Default for CommitterConfig {
    fn default() -> Self {
        Self {
            name: "confgit".to_string(),
            email: "confgit@localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LockConfig {
    /// Lock file path; defaults under the data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    pub filter: Option<String>,
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Compact,
            filter: None,
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    pub format: LogFormat,
    pub rotation: LogRotation,
    pub retention_max_age_days: Option<u64>,
    pub retention_max_files: Option<usize>,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            format: LogFormat::Json,
            rotation: LogRotation::Daily,
            retention_max_age_days: Some(14),
            retention_max_files: Some(10),
        }
    }
}

// =============================================================================
// Layer (file contents before defaults are applied)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConfigLayer {
    pub repo: RepoConfigOverride,
    pub sources: Vec<SourceDir>,
    pub mirror: MirrorSettingsOverride,
    pub committer: CommitterConfigOverride,
    pub lock: LockConfig,
    pub logging: LoggingConfigOverride,
}

impl ConfigLayer {
    pub fn apply_to(&self, target: &mut Config) {
        self.repo.apply_to(&mut target.repo);
        if !self.sources.is_empty() {
            target.sources = self.sources.clone();
        }
        if let Some(exclude) = &self.mirror.exclude {
            target.mirror.exclude = exclude.clone();
        }
        self.committer.apply_to(&mut target.committer);
        if let Some(path) = &self.lock.path {
            target.lock.path = Some(path.clone());
        }
        self.logging.apply_to(&mut target.logging);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RepoConfigOverride {
    pub remote: Option<String>,
    pub branch: Option<String>,
    pub workdir: Option<PathBuf>,
    pub target_subtree: Option<String>,
    pub policy: Option<AlignPolicy>,
    pub push: Option<bool>,
    pub retries: Option<u32>,
}

impl RepoConfigOverride {
    pub fn apply_to(&self, target: &mut RepoConfig) {
        if let Some(remote) = &self.remote {
            target.remote = remote.clone();
        }
        if let Some(branch) = &self.branch {
            target.branch = branch.clone();
        }
        if let Some(workdir) = &self.workdir {
            target.workdir = workdir.clone();
        }
        if let Some(subtree) = &self.target_subtree {
            target.target_subtree = subtree.clone();
        }
        if let Some(policy) = self.policy {
            target.policy = policy;
        }
        if let Some(push) = self.push {
            target.push = push;
        }
        if let Some(retries) = self.retries {
            target.retries = retries;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MirrorSettingsOverride {
    pub exclude: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CommitterConfigOverride {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl CommitterConfigOverride {
    pub fn apply_to(&self, target: &mut CommitterConfig) {
        if let Some(name) = &self.name {
            target.name = name.clone();
        }
        if let Some(email) = &self.email {
            target.email = email.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfigOverride {
    pub stdout: Option<bool>,
    pub stdout_format: Option<LogFormat>,
    pub filter: Option<String>,
    pub file: Option<FileLoggingConfigOverride>,
}

impl LoggingConfigOverride {
    pub fn apply_to(&self, target: &mut LoggingConfig) {
        if let Some(stdout) = self.stdout {
            target.stdout = stdout;
        }
        if let Some(format) = self.stdout_format {
            target.stdout_format = format;
        }
        if let Some(filter) = &self.filter {
            target.filter = Some(filter.clone());
        }
        if let Some(file) = &self.file {
            file.apply_to(&mut target.file);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileLoggingConfigOverride {
    pub enabled: Option<bool>,
    pub dir: Option<PathBuf>,
    pub format: Option<LogFormat>,
    pub rotation: Option<LogRotation>,
    pub retention_max_age_days: Option<u64>,
    pub retention_max_files: Option<usize>,
}

impl FileLoggingConfigOverride {
    pub fn apply_to(&self, target: &mut FileLoggingConfig) {
        if let Some(enabled) = self.enabled {
            target.enabled = enabled;
        }
        if let Some(dir) = &self.dir {
            target.dir = Some(dir.clone());
        }
        if let Some(format) = self.format {
            target.format = format;
        }
        if let Some(rotation) = self.rotation {
            target.rotation = rotation;
        }
        if let Some(days) = self.retention_max_age_days {
            target.retention_max_age_days = Some(days);
        }
        if let Some(files) = self.retention_max_files {
            target.retention_max_files = Some(files);
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    MissingKey(&'static str),

    #[error("no source directories configured")]
    NoSources,

    #[error("invalid target subtree {subtree:?}: {reason}")]
    InvalidSubtree { subtree: String, reason: String },

    #[error("source directory does not exist: {0}")]
    SourceMissing(PathBuf),

    #[error("invalid source {path:?}: {reason}")]
    InvalidSource { path: PathBuf, reason: String },

    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("config file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("failed to write {path:?}: {reason}")]
    Write { path: PathBuf, reason: String },
}

impl ConfigError {
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        // Configuration is validated before any mutation.
        Effect::None
    }
}
