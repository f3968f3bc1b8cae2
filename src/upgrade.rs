//! Self-update subcommand.
//!
//! Fully isolated from the snapshot run path. Downloads the latest release
//! asset for this platform, verifies its SHA-256 against the published
//! checksum asset, then atomically replaces the installed binary.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::{Effect, Transience};

const RELEASE_URL: &str = "https://api.github.com/repos/delightful-ai/confgit/releases/latest";
const USER_AGENT: &str = "confgit-upgrade";

#[derive(Debug, Clone)]
pub struct UpgradeOutcome {
    pub updated: bool,
    pub from_version: String,
    pub to_version: String,
    pub install_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
struct ReleaseInfo {
    tag_name: String,
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("failed to reach release endpoint: {0}")]
    Http(String),

    #[error("failed to parse release info: {0}")]
    BadRelease(String),

    #[error("no prebuilt asset for platform {platform}")]
    MissingAsset { platform: String },

    #[error("release is missing checksum asset {asset}")]
    MissingChecksum { asset: String },

    #[error("checksum mismatch for {asset}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        asset: String,
        expected: String,
        actual: String,
    },

    #[error("archive missing confgit binary")]
    MissingBinary,

    #[error("unsupported platform {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("failed to install to {path:?}: {reason}")]
    Install { path: PathBuf, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpgradeError {
    pub fn transience(&self) -> Transience {
        match self {
            UpgradeError::Http(_) => Transience::Retryable,
            UpgradeError::Install { .. } | UpgradeError::Io(_) => Transience::Unknown,
            _ => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            // The atomic rename either happened or it didn't.
            UpgradeError::Install { .. } => Effect::Unknown,
            _ => Effect::None,
        }
    }
}

/// Check for and optionally install the latest release.
pub fn run_upgrade(check_only: bool) -> Result<UpgradeOutcome, UpgradeError> {
    let current = env!("CARGO_PKG_VERSION").to_string();
    let release = fetch_latest_release()?;
    let latest = normalize_version(&release.tag_name).to_string();
    let install_path = resolve_install_path()?;

    if !is_newer_version(&latest, &current) || check_only {
        return Ok(UpgradeOutcome {
            updated: false,
            from_version: current,
            to_version: latest,
            install_path,
        });
    }

    let platform = detect_platform()?;
    let asset_name = format!("confgit-{platform}.tar.gz");
    let asset = release
        .assets
        .iter()
        .find(|asset| asset.name == asset_name)
        .ok_or_else(|| UpgradeError::MissingAsset {
            platform: platform.to_string(),
        })?;
    let checksum_name = format!("{asset_name}.sha256");
    let checksum_asset = release
        .assets
        .iter()
        .find(|a| a.name == checksum_name)
        .ok_or_else(|| UpgradeError::MissingChecksum {
            asset: checksum_name.clone(),
        })?;

    let archive = download_asset(asset)?;
    let expected = fetch_checksum(checksum_asset)?;
    verify_checksum(archive.path(), &asset.name, &expected)?;

    let binary = extract_binary(archive.path())?;
    install_binary(binary.as_ref(), &install_path)?;

    Ok(UpgradeOutcome {
        updated: true,
        from_version: current,
        to_version: latest,
        install_path,
    })
}

fn fetch_latest_release() -> Result<ReleaseInfo, UpgradeError> {
    if let Ok(path) = std::env::var("CONFGIT_UPGRADE_RELEASE_JSON") {
        let contents = fs::read_to_string(&path)?;
        return serde_json::from_str(&contents).map_err(|e| UpgradeError::BadRelease(e.to_string()));
    }

    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(15))
        .build();
    let resp = agent
        .get(RELEASE_URL)
        .set("User-Agent", USER_AGENT)
        .call()
        .map_err(|e| UpgradeError::Http(e.to_string()))?;
    let mut body = String::new();
    resp.into_reader()
        .read_to_string(&mut body)
        .map_err(|e| UpgradeError::Http(e.to_string()))?;
    serde_json::from_str(&body).map_err(|e| UpgradeError::BadRelease(e.to_string()))
}

fn detect_platform() -> Result<&'static str, UpgradeError> {
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    match (os, arch) {
        ("macos", "aarch64" | "arm64") => Ok("aarch64-apple-darwin"),
        ("linux", "x86_64" | "amd64") => Ok("x86_64-unknown-linux-gnu"),
        ("linux", "aarch64") => Ok("aarch64-unknown-linux-gnu"),
        ("freebsd", "x86_64") => Ok("x86_64-unknown-freebsd"),
        _ => Err(UpgradeError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        }),
    }
}

fn download_asset(asset: &ReleaseAsset) -> Result<tempfile::NamedTempFile, UpgradeError> {
    let archive = tempfile::NamedTempFile::new()?;

    if let Ok(dir) = std::env::var("CONFGIT_UPGRADE_ASSET_DIR") {
        let src = PathBuf::from(dir).join(&asset.name);
        fs::copy(&src, archive.path())?;
        return Ok(archive);
    }

    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(60))
        .build();
    let resp = agent
        .get(&asset.browser_download_url)
        .set("User-Agent", USER_AGENT)
        .call()
        .map_err(|e| UpgradeError::Http(e.to_string()))?;
    let mut reader = resp.into_reader();
    let mut file = fs::File::create(archive.path())?;
    std::io::copy(&mut reader, &mut file)?;
    Ok(archive)
}

fn fetch_checksum(asset: &ReleaseAsset) -> Result<String, UpgradeError> {
    let raw = if let Ok(dir) = std::env::var("CONFGIT_UPGRADE_ASSET_DIR") {
        fs::read_to_string(PathBuf::from(dir).join(&asset.name))?
    } else {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(15))
            .build();
        agent
            .get(&asset.browser_download_url)
            .set("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| UpgradeError::Http(e.to_string()))?
            .into_string()
            .map_err(|e| UpgradeError::Http(e.to_string()))?
    };
    parse_checksum(&raw).ok_or_else(|| UpgradeError::BadRelease(format!(
        "unparseable checksum asset {}",
        asset.name
    )))
}

/// Accepts both a bare digest and the `sha256sum` "digest  filename" form.
fn parse_checksum(raw: &str) -> Option<String> {
    let token = raw.split_whitespace().next()?;
    let token = token.to_ascii_lowercase();
    if token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(token)
    } else {
        None
    }
}

fn verify_checksum(path: &Path, asset: &str, expected: &str) -> Result<(), UpgradeError> {
    let actual = sha256_file(path)?;
    if actual != expected {
        return Err(UpgradeError::ChecksumMismatch {
            asset: asset.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

fn sha256_file(path: &Path) -> Result<String, UpgradeError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    Ok(hex)
}

fn extract_binary(archive_path: &Path) -> Result<tempfile::TempPath, UpgradeError> {
    let archive = fs::File::open(archive_path)?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(archive));
    let temp_bin = tempfile::NamedTempFile::new()?;
    let temp_path = temp_bin.into_temp_path();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;
        if path.file_name().and_then(|s| s.to_str()) == Some("confgit") {
            entry.unpack(&temp_path)?;
            return Ok(temp_path);
        }
    }
    Err(UpgradeError::MissingBinary)
}

fn resolve_install_path() -> Result<PathBuf, UpgradeError> {
    if let Ok(path) = std::env::var("CONFGIT_UPGRADE_INSTALL_PATH") {
        return Ok(PathBuf::from(path));
    }
    std::env::current_exe().map_err(UpgradeError::Io)
}

fn install_binary(src: &Path, dest: &Path) -> Result<(), UpgradeError> {
    let dir = dest.parent().ok_or_else(|| UpgradeError::Install {
        path: dest.to_path_buf(),
        reason: "install path missing parent directory".to_string(),
    })?;
    fs::create_dir_all(dir).map_err(|e| UpgradeError::Install {
        path: dest.to_path_buf(),
        reason: format!("failed to create {}: {e}", dir.display()),
    })?;

    let temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| UpgradeError::Install {
        path: dest.to_path_buf(),
        reason: format!("failed to create temp file: {e}"),
    })?;
    fs::copy(src, temp.path()).map_err(|e| UpgradeError::Install {
        path: dest.to_path_buf(),
        reason: format!("failed to copy binary: {e}"),
    })?;
    set_executable(temp.path()).map_err(|e| UpgradeError::Install {
        path: dest.to_path_buf(),
        reason: format!("failed to set permissions: {e}"),
    })?;
    temp.persist(dest).map_err(|e| UpgradeError::Install {
        path: dest.to_path_buf(),
        reason: format!("failed to persist: {e}"),
    })?;
    Ok(())
}

fn set_executable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

fn normalize_version(tag: &str) -> &str {
    tag.trim_start_matches('v')
}

fn is_newer_version(latest: &str, current: &str) -> bool {
    if latest == current {
        return false;
    }
    match (parse_version(latest), parse_version(current)) {
        (Some(l), Some(c)) => l > c,
        _ => latest != current,
    }
}

fn parse_version(s: &str) -> Option<(u64, u64, u64)> {
    let mut parts = s.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor, patch))
}
