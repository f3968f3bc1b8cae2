use std::fs;
use std::path::{Path, PathBuf};

use super::{Config, ConfigError, ConfigLayer, apply_env_overrides, merge_layer};

/// Default user config location.
pub fn user_config_path() -> PathBuf {
    crate::paths::config_dir().join("confgit.toml")
}

/// Load the configuration: defaults, then the config file (an explicit
/// `--config` path replaces the user file entirely), then environment
/// overrides. Read once; callers pass the result by reference.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let layer = match explicit {
        Some(path) => Some(read_layer(path, true)?),
        None => read_layer_opt(&user_config_path())?,
    };
    let mut config = merge_layer(layer);
    apply_env_overrides(&mut config);
    Ok(config)
}

fn read_layer_opt(path: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    read_layer(path, false).map(Some)
}

fn read_layer(path: &Path, required: bool) -> Result<ConfigLayer, ConfigError> {
    if required && !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write the commented skeleton for `confgit init`. Refuses to overwrite.
pub fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Err(ConfigError::AlreadyExists(path.to_path_buf()));
    }
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            reason: format!("failed to create {}: {e}", dir.display()),
        })?;
    }
    atomic_write(path, DEFAULT_CONFIG.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let dir = path.parent().ok_or_else(|| ConfigError::Write {
        path: path.to_path_buf(),
        reason: "config path missing parent directory".to_string(),
    })?;
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ConfigError::Write {
        path: path.to_path_buf(),
        reason: format!("failed to create temp file in {}: {e}", dir.display()),
    })?;
    fs::write(temp.path(), data).map_err(|e| ConfigError::Write {
        path: path.to_path_buf(),
        reason: format!("failed to write temp file: {e}"),
    })?;
    temp.persist(path).map_err(|e| ConfigError::Write {
        path: path.to_path_buf(),
        reason: format!("failed to persist: {e}"),
    })?;
    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# confgit configuration
#
# Snapshot the listed source directories into <workdir>/<target_subtree>/
# and commit the result. Run `confgit run --dry-run --report` to preview.

[repo]
remote = ""                    # e.g. "git@git.example.net:ops/configs.git"
branch = "main"
workdir = ""                   # local clone, e.g. "/var/db/confgit/configs"
target_subtree = ""            # e.g. "hosts/gw1.example.net"
policy = "rebase"              # "rebase" (default) or "reset"
push = true
retries = 3

# One entry per directory to snapshot. `dest` defaults to the final path
# component of `path`.
[[sources]]
path = "/etc"
dest = "etc"

#[[sources]]
#path = "/usr/local/etc"
#dest = "local-etc"

[committer]
name = "confgit"
email = "confgit@localhost"

[mirror]
# Entry names and *suffix patterns never copied or deleted.
exclude = [".git", ".hg", ".svn", "*.sock", "*.pid", "*.db", "*.sqlite", "*.swp", "*.tmp", "*.bak"]

[lock]
# path = "/var/run/confgit.lock"

[logging]
stdout = true
stdout_format = "compact"      # "compact", "pretty", or "json"

[logging.file]
enabled = false
# dir = "/var/log/confgit"
format = "json"
rotation = "daily"
retention_max_age_days = 14
retention_max_files = 10
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_skeleton_parses_as_layer() {
        let layer: ConfigLayer = toml::from_str(DEFAULT_CONFIG).expect("skeleton parses");
        assert_eq!(layer.repo.branch.as_deref(), Some("main"));
        assert_eq!(layer.sources.len(), 1);
        assert_eq!(layer.sources[0].dest.as_deref(), Some("etc"));
    }

    #[test]
    fn explicit_config_must_exist() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let missing = tmp.path().join("nope.toml");
        let err = load(Some(&missing)).expect_err("missing explicit config");
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn explicit_config_roundtrip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("confgit.toml");
        fs::write(
            &path,
            r#"
[repo]
remote = "file:///srv/git/configs.git"
branch = "snapshots"
workdir = "/var/db/confgit/work"
target_subtree = "hosts/fw0"
policy = "reset"
push = false
retries = 5

[[sources]]
path = "/etc"
"#,
        )
        .expect("write config");

        let config = load(Some(&path)).expect("load");
        assert_eq!(config.repo.branch, "snapshots");
        assert_eq!(config.repo.policy, super::super::AlignPolicy::Reset);
        assert!(!config.repo.push);
        assert_eq!(config.repo.retries, 5);
        assert_eq!(config.sources.len(), 1);
        // Unset sections fall back to defaults.
        assert_eq!(config.committer.name, "confgit");
        assert!(!config.mirror.exclude.is_empty());
    }

    #[test]
    fn write_default_config_refuses_overwrite() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("confgit.toml");

        write_default_config(&path).expect("first write");
        let err = write_default_config(&path).expect_err("second write must fail");
        assert!(matches!(err, ConfigError::AlreadyExists(_)));
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("confgit.toml");
        fs::write(&path, "repo = \"not a table\"").expect("write");
        let err = load(Some(&path)).expect_err("parse failure");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
