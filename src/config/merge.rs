use std::path::PathBuf;

use super::{Config, ConfigLayer};

pub fn merge_layer(layer: Option<ConfigLayer>) -> Config {
    let mut config = Config::default();
    if let Some(layer) = layer {
        layer.apply_to(&mut config);
    }
    config
}

/// Environment overrides applied after the file layer. Cron deployments use
/// these to vary a shared config per host without editing it.
pub fn apply_env_overrides(config: &mut Config) {
    apply_env_overrides_inner(config, |key| std::env::var(key).ok());
}

fn apply_env_overrides_inner(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(raw) = var("CONFGIT_REMOTE") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.repo.remote = trimmed.to_string();
        }
    }

    if let Some(raw) = var("CONFGIT_BRANCH") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.repo.branch = trimmed.to_string();
        }
    }

    if let Some(raw) = var("CONFGIT_LOCK_PATH") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.lock.path = Some(PathBuf::from(trimmed));
        }
    }

    if var("CONFGIT_NO_PUSH").is_some() {
        config.repo.push = false;
    }
}
