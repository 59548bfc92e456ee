//! Adapter configuration.
//!
//! Settings come from `LFS_S3_*` environment variables (git-lfs passes
//! the agent's environment through) or from a JSON file. Unset fields
//! take the defaults below.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use lfs_s3_compression::Catalog;
use lfs_s3_remote::{PART_SIZE, S3Config};
use lfs_s3_transfer::EngineConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::AdapterError;

/// Where downloads land before git-lfs moves them into its object store.
///
/// Only right for a plain checkout run from the work tree root.
/// [`AdapterConfig::from_env`] asks git for the real location when
/// `LFS_S3_DOWNLOAD_DIR` is not set.
pub const DEFAULT_DOWNLOAD_DIR: &str = ".git/lfs/tmp";

/// Adapter configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub bucket: String,
    /// Custom S3 endpoint (MinIO, R2, ...).
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    #[serde(skip_serializing)]
    pub secret_access_key: Option<String>,
    /// Key prefix for every object.
    pub root_path: String,
    /// Upload variant name; defaults to the catalog's first entry.
    pub compression: Option<String>,
    /// Delete copies under other variants after a new upload.
    pub delete_other_variants: bool,
    pub force_path_style: bool,
    pub part_size: usize,
    pub concurrency: usize,
    pub download_dir: PathBuf,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            endpoint: None,
            region: None,
            access_key_id: None,
            secret_access_key: None,
            root_path: String::new(),
            compression: None,
            delete_other_variants: false,
            force_path_style: false,
            part_size: PART_SIZE,
            concurrency: 1,
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
        }
    }
}

impl fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("root_path", &self.root_path)
            .field("compression", &self.compression)
            .field("delete_other_variants", &self.delete_other_variants)
            .field("force_path_style", &self.force_path_style)
            .field("part_size", &self.part_size)
            .field("concurrency", &self.concurrency)
            .field("download_dir", &self.download_dir)
            .finish()
    }
}

impl AdapterConfig {
    /// Reads the configuration from `LFS_S3_*` environment variables.
    ///
    /// Without `LFS_S3_DOWNLOAD_DIR`, downloads go to the `tmp` directory
    /// of the repository's LFS storage as git reports it, which covers
    /// linked worktrees, submodules and a custom `lfs.storage`.
    pub fn from_env() -> Result<Self, AdapterError> {
        let lookup = |name: &str| std::env::var(name).ok();
        let mut config = Self::from_lookup(lookup)?;
        if lookup("LFS_S3_DOWNLOAD_DIR").is_none_or(|v| v.trim().is_empty()) {
            if let Some(dir) = git_download_dir() {
                config.download_dir = dir;
            }
        }
        Ok(config)
    }

    /// Builds a configuration from `lookup`, which maps a variable name to
    /// its value. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AdapterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("LFS_S3_BUCKET") {
            config.bucket = v;
        }
        config.endpoint = get("LFS_S3_ENDPOINT");
        config.region = get("LFS_S3_REGION");
        config.access_key_id = get("LFS_S3_ACCESS_KEY_ID");
        config.secret_access_key = get("LFS_S3_SECRET_ACCESS_KEY");
        if let Some(v) = get("LFS_S3_ROOT_PATH") {
            config.root_path = v;
        }
        config.compression = get("LFS_S3_COMPRESSION");
        if let Some(v) = get("LFS_S3_DELETE_OTHER_VARIANTS") {
            config.delete_other_variants = parse_bool("LFS_S3_DELETE_OTHER_VARIANTS", &v)?;
        }
        if let Some(v) = get("LFS_S3_PATH_STYLE") {
            config.force_path_style = parse_bool("LFS_S3_PATH_STYLE", &v)?;
        }
        if let Some(v) = get("LFS_S3_PART_SIZE") {
            config.part_size = parse_usize("LFS_S3_PART_SIZE", &v)?;
        }
        if let Some(v) = get("LFS_S3_CONCURRENCY") {
            config.concurrency = parse_usize("LFS_S3_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("LFS_S3_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(v);
        }

        Ok(config)
    }

    /// Loads a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, AdapterError> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Checks that the settings can produce a working engine.
    pub fn validate(&self, catalog: &Catalog) -> Result<(), AdapterError> {
        if self.bucket.trim().is_empty() {
            return Err(AdapterError::Config("bucket must be set".into()));
        }
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(AdapterError::Config(
                "access key id and secret access key must be set together".into(),
            ));
        }
        if let Some(name) = &self.compression {
            if catalog.get(name).is_none() {
                return Err(AdapterError::Config(format!(
                    "unknown compression {name:?}; expected one of {}",
                    catalog.names().join(", ")
                )));
            }
        }
        if self.part_size == 0 {
            return Err(AdapterError::Config("part size must be positive".into()));
        }
        if self.concurrency == 0 {
            return Err(AdapterError::Config("concurrency must be positive".into()));
        }
        Ok(())
    }

    /// Settings for the S3 store.
    pub fn s3_config(&self) -> S3Config {
        S3Config {
            bucket: self.bucket.clone(),
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            force_path_style: self.force_path_style,
            part_size: self.part_size,
            concurrency: self.concurrency,
        }
    }

    /// Settings for the transfer engine.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            root_path: self.root_path.clone(),
            upload_variant: self.compression.clone(),
            delete_other_variants: self.delete_other_variants,
        }
    }
}

/// The LFS temp directory for a repository whose common git directory is
/// `git_dir`. A relative `lfs_storage` is taken relative to `git_dir`.
pub fn lfs_tmp_dir(git_dir: &Path, lfs_storage: Option<&str>) -> PathBuf {
    match lfs_storage.map(str::trim).filter(|s| !s.is_empty()) {
        Some(storage) => git_dir.join(storage).join("tmp"),
        None => git_dir.join("lfs").join("tmp"),
    }
}

/// Asks git where the current repository keeps its LFS objects.
fn git_download_dir() -> Option<PathBuf> {
    let git_dir = git_output(&["rev-parse", "--git-common-dir"])?;
    // Exits non-zero when the key is unset.
    let storage = git_output(&["config", "--get", "lfs.storage"]);
    let dir = lfs_tmp_dir(Path::new(&git_dir), storage.as_deref());
    debug!(dir = %dir.display(), "download directory from git");
    Some(dir)
}

fn git_output(args: &[&str]) -> Option<String> {
    let output = match Command::new("git").args(args).output() {
        Ok(output) => output,
        Err(e) => {
            debug!(?args, error = %e, "git not available");
            return None;
        }
    };
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn parse_bool(name: &str, value: &str) -> Result<bool, AdapterError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AdapterError::Config(format!(
            "{name}: expected a boolean, got {other:?}"
        ))),
    }
}

fn parse_usize(name: &str, value: &str) -> Result<usize, AdapterError> {
    value
        .trim()
        .parse()
        .map_err(|e| AdapterError::Config(format!("{name}: {e}")))
}
