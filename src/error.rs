use thiserror::Error;

use crate::config::ConfigError;
use crate::git::SyncError;
use crate::lock::LockError;
use crate::mirror::MirrorError;
use crate::upgrade::UpgradeError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What we know about side effects when an error is returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    /// Definitely no side effects occurred.
    None,
    /// Side effects definitely occurred (locally or remotely).
    Some,
    /// We don't know if side effects occurred.
    Unknown,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Some => "some",
            Effect::Unknown => "unknown",
        }
    }
}

/// Crate-level convenience error.
///
/// A thin wrapper over the per-stage errors; each stage classifies its own
/// variants.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error(transparent)]
    Upgrade(#[from] UpgradeError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Config(e) => e.transience(),
            Error::Lock(e) => e.transience(),
            Error::Sync(e) => e.transience(),
            Error::Mirror(e) => e.transience(),
            Error::Upgrade(e) => e.transience(),
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            Error::Config(e) => e.effect(),
            Error::Lock(e) => e.effect(),
            Error::Sync(e) => e.effect(),
            Error::Mirror(e) => e.effect(),
            Error::Upgrade(e) => e.effect(),
        }
    }
}
