//! Layered settings for duopane.
//!
//! Sources, lowest priority first:
//!
//! 1. built-in defaults,
//! 2. a configuration file (TOML, YAML or JSON, picked by extension),
//! 3. `DUOPANE_` environment variables, with `__` separating nested keys
//!    (`DUOPANE_CACHE__TTL_SECS=30`).

pub mod error;

use crate::error::{ErrorKind, Result};
use duopane_storage::{CacheConfig, Storage};
use duopane_transfer::TransferOptions;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "DUOPANE_";
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheSettings,
    pub transfer: TransferSettings,
    /// Object store connection. Remote paths are unavailable without one.
    pub remote: Option<RemoteSettings>,
    /// Where archive members get extracted. Defaults to the system temporary
    /// directory.
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}
impl Default for CacheSettings {
    fn default() -> Self {
        Self { ttl_secs: default_ttl_secs(), max_entries: default_max_entries() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}
impl Default for TransferSettings {
    fn default() -> Self {
        Self { chunk_size: default_chunk_size(), progress_interval_ms: default_progress_interval_ms() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Custom endpoint for S3-compatible services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    pub key_id: String,
    pub key_secret: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_ttl_secs() -> u64 {
    duopane_storage::cache::DEFAULT_TTL.as_secs()
}
fn default_max_entries() -> usize {
    duopane_storage::cache::DEFAULT_MAX_ENTRIES
}
fn default_chunk_size() -> usize {
    duopane_storage::COPY_CHUNK_SIZE
}
fn default_progress_interval_ms() -> u64 {
    duopane_transfer::DEFAULT_PROGRESS_INTERVAL.as_millis() as u64
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_concurrency() -> usize {
    100
}

impl Settings {
    /// Platform configuration file, e.g. `~/.config/duopane/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "duopane").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load from the platform configuration file (when present) and the
    /// environment.
    pub fn load() -> Result<Self> {
        let path = Self::default_path().filter(|path| path.is_file());
        Self::extract(Self::figment(path.as_deref()))
    }

    /// Load from an explicit file, which must exist, and the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            exn::bail!(ErrorKind::Load(format!("{} does not exist", path.display())));
        }
        Self::extract(Self::figment(Some(path)))
    }

    /// The provider stack behind [`load()`](Self::load), for callers that
    /// want to merge in their own sources.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = file {
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let settings: Settings = figment.extract().map_err(|e| ErrorKind::Load(e.to_string()))?;
        settings.validate()?;
        tracing::debug!(remote = settings.remote.is_some(), "configuration loaded");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.ttl_secs == 0 {
            exn::bail!(ErrorKind::Invalid("cache.ttl_secs must be positive".into()));
        }
        if self.cache.max_entries == 0 {
            exn::bail!(ErrorKind::Invalid("cache.max_entries must be positive".into()));
        }
        if self.transfer.chunk_size == 0 {
            exn::bail!(ErrorKind::Invalid("transfer.chunk_size must be positive".into()));
        }
        if let Some(remote) = &self.remote {
            if remote.key_id.is_empty() || remote.key_secret.is_empty() {
                exn::bail!(ErrorKind::Invalid("remote credentials are incomplete".into()));
            }
            if remote.region.is_empty() {
                exn::bail!(ErrorKind::Invalid("remote.region must not be empty".into()));
            }
            if remote.concurrency == 0 {
                exn::bail!(ErrorKind::Invalid("remote.concurrency must be positive".into()));
            }
        }
        Ok(())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::from(self.cache.clone())
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions::from(self.transfer.clone())
    }

    /// Assemble a [`Storage`] from these settings.
    pub fn build_storage(&self) -> Result<Storage> {
        let mut builder = Storage::builder().cache_config(self.cache_config());
        if let Some(dir) = &self.temp_dir {
            builder = builder.temp_dir(dir);
        }
        if let Some(remote) = &self.remote {
            builder = builder.object_store(object_store(remote)?);
        }
        Ok(builder.build())
    }
}

impl From<CacheSettings> for CacheConfig {
    fn from(settings: CacheSettings) -> Self {
        CacheConfig { ttl: Duration::from_secs(settings.ttl_secs), max_entries: settings.max_entries }
    }
}

impl From<TransferSettings> for TransferOptions {
    fn from(settings: TransferSettings) -> Self {
        TransferOptions {
            chunk_size: settings.chunk_size,
            progress_interval: Duration::from_millis(settings.progress_interval_ms),
        }
    }
}

#[cfg(feature = "s3")]
fn object_store(remote: &RemoteSettings) -> Result<std::sync::Arc<dyn duopane_storage::store::ObjectStore>> {
    use duopane_storage::store::{S3Config, S3Store};
    let store = S3Store::new(S3Config {
        endpoint: remote.endpoint.clone(),
        region: remote.region.clone(),
        key_id: remote.key_id.clone(),
        key_secret: remote.key_secret.clone(),
        concurrency: remote.concurrency,
    });
    Ok(std::sync::Arc::new(store))
}

#[cfg(not(feature = "s3"))]
fn object_store(_remote: &RemoteSettings) -> Result<std::sync::Arc<dyn duopane_storage::store::ObjectStore>> {
    exn::bail!(ErrorKind::Invalid("remote storage is configured but S3 support was not compiled in".into()))
}
