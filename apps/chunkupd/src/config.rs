//! Daemon configuration.
//!
//! Read as TOML from `$CHUNKUP_CONFIG`, or `chunkupd.toml` in the working
//! directory. A missing file means defaults. `UPLOADS_DIR`, `COMPLETED_DIR`
//! and `CHUNK_SIZE` override the file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chunkup_protocol::constants::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use chunkup_upload_service::ServiceConfig;
use serde::{Deserialize, Serialize};

const CONFIG_ENV: &str = "CHUNKUP_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "chunkupd.toml";

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the WebSocket server binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Chunks live in `<data_dir>/uploads`, session metadata in
    /// `<data_dir>/sessions`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_completed_dir")]
    pub completed_dir: PathBuf,

    /// Chunk size handed to new sessions, in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Idle time after which a session is evicted.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// How often the eviction sweep runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Catalog file kept by the completion notifier.
    #[serde(default = "default_metadata_store")]
    pub metadata_store: PathBuf,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8765))
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_completed_dir() -> PathBuf {
    PathBuf::from("./completed")
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    600
}

fn default_metadata_store() -> PathBuf {
    PathBuf::from("./data/metadata_store.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            data_dir: default_data_dir(),
            completed_dir: default_completed_dir(),
            chunk_size: default_chunk_size(),
            session_ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            metadata_store: default_metadata_store(),
        }
    }
}

impl Config {
    /// Loads configuration from the default location plus the environment.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path(|key| std::env::var(key).ok());
        let mut config = Self::from_file(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`, falling back to defaults if it does not exist.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration read");
        Ok(config)
    }

    /// Applies `UPLOADS_DIR`, `COMPLETED_DIR` and `CHUNK_SIZE` overrides.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(dir) = lookup("UPLOADS_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("COMPLETED_DIR") {
            self.completed_dir = PathBuf::from(dir);
        }
        if let Some(size) = lookup("CHUNK_SIZE") {
            self.chunk_size = size
                .trim()
                .parse()
                .with_context(|| format!("CHUNK_SIZE is not a byte count: {size:?}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.chunk_size > 0, "chunk_size must be positive");
        anyhow::ensure!(
            self.chunk_size <= MAX_CHUNK_SIZE,
            "chunk_size {} exceeds the largest frame-sized chunk ({MAX_CHUNK_SIZE} bytes)",
            self.chunk_size
        );
        anyhow::ensure!(
            self.sweep_interval_secs > 0,
            "sweep_interval_secs must be positive"
        );
        Ok(())
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            data_dir: self.data_dir.clone(),
            completed_dir: self.completed_dir.clone(),
            chunk_size: self.chunk_size,
            session_ttl: Duration::from_secs(self.session_ttl_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn config_path(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}
