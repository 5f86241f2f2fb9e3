//! Relay configuration.
//!
//! Read from TOML at `$DRIVERELAY_CONFIG`, or `~/.config/driverelay/relay.toml`
//! when unset. A missing file means defaults. Environment variables override
//! the file:
//!
//! | Variable | Field |
//! |---|---|
//! | `DRIVE_FOLDER_ID` | `folder_id` |
//! | `DRIVE_ACCESS_TOKEN` | `access_token` |
//! | `DRIVE_UPLOAD_URL` | `upload_url` |
//! | `PORT` | `port` |
//! | `DRIVERELAY_CHUNK_SIZE` | `chunk_size` |
//! | `DRIVERELAY_MAX_CONCURRENT` | `max_concurrent` |
//! | `DRIVERELAY_PROGRESS_INTERVAL_SECS` | `progress_interval_secs` |
//! | `DRIVERELAY_PROGRESS_MIN_BYTES` | `progress_min_bytes` |

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};
use driverelay_drive::DEFAULT_UPLOAD_URL;
use driverelay_relay::RelaySettings;
use driverelay_transfer::{DEFAULT_CHUNK_SIZE, aligned_chunk_size};
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Destination Drive folder.
    #[serde(default)]
    pub folder_id: String,

    /// OAuth bearer token for the Drive API.
    #[serde(default)]
    pub access_token: String,

    #[serde(default = "default_upload_url")]
    pub upload_url: String,

    /// Liveness endpoint port. No endpoint when unset.
    #[serde(default)]
    pub port: Option<u16>,

    /// Bytes read from a file per chunk, rounded down to a multiple of 256 KiB.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Transfers uploading at the same time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Minimum seconds between two progress updates of one transfer.
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,

    /// Also emit a progress update once this many bytes moved since the last
    /// one, even inside the interval.
    #[serde(default)]
    pub progress_min_bytes: Option<u64>,
}

fn default_upload_url() -> String {
    DEFAULT_UPLOAD_URL.into()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_concurrent() -> usize {
    1
}

fn default_progress_interval() -> u64 {
    2
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            folder_id: String::new(),
            access_token: String::new(),
            upload_url: default_upload_url(),
            port: None,
            chunk_size: default_chunk_size(),
            max_concurrent: default_max_concurrent(),
            progress_interval_secs: default_progress_interval(),
            progress_min_bytes: None,
        }
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("folder_id", &self.folder_id)
            .field("access_token", &"<redacted>")
            .field("upload_url", &self.upload_url)
            .field("port", &self.port)
            .field("chunk_size", &self.chunk_size)
            .field("max_concurrent", &self.max_concurrent)
            .field("progress_interval_secs", &self.progress_interval_secs)
            .field("progress_min_bytes", &self.progress_min_bytes)
            .finish()
    }
}

impl RelayConfig {
    /// Loads the file, applies the process environment and validates.
    pub fn load() -> anyhow::Result<Self> {
        let path = match std::env::var_os("DRIVERELAY_CONFIG") {
            Some(p) => PathBuf::from(p),
            None => config_path(),
        };
        let mut config = Self::from_file(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()
    }

    /// Reads `path`, or returns defaults if it does not exist.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration file loaded");
        Ok(config)
    }

    /// Overrides fields from environment variables. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("DRIVE_FOLDER_ID") {
            self.folder_id = v;
        }
        if let Some(v) = var("DRIVE_ACCESS_TOKEN") {
            self.access_token = v;
        }
        if let Some(v) = var("DRIVE_UPLOAD_URL") {
            self.upload_url = v;
        }
        if let Some(v) = var("PORT") {
            self.port = Some(parse("PORT", &v)?);
        }
        if let Some(v) = var("DRIVERELAY_CHUNK_SIZE") {
            self.chunk_size = parse("DRIVERELAY_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = var("DRIVERELAY_MAX_CONCURRENT") {
            self.max_concurrent = parse("DRIVERELAY_MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = var("DRIVERELAY_PROGRESS_INTERVAL_SECS") {
            self.progress_interval_secs = parse("DRIVERELAY_PROGRESS_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = var("DRIVERELAY_PROGRESS_MIN_BYTES") {
            self.progress_min_bytes = Some(parse("DRIVERELAY_PROGRESS_MIN_BYTES", &v)?);
        }
        Ok(())
    }

    /// Checks required fields and normalizes sizes.
    pub fn validate(mut self) -> anyhow::Result<Self> {
        if self.folder_id.trim().is_empty() {
            bail!("DRIVE_FOLDER_ID is required");
        }
        if self.access_token.trim().is_empty() {
            bail!("DRIVE_ACCESS_TOKEN is required");
        }
        self.chunk_size = aligned_chunk_size(self.chunk_size);
        self.max_concurrent = self.max_concurrent.max(1);
        Ok(self)
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            folder_id: self.folder_id.clone(),
            max_concurrent: self.max_concurrent,
            progress_interval: Some(Duration::from_secs(self.progress_interval_secs)),
            progress_min_bytes: self.progress_min_bytes.filter(|&n| n > 0),
        }
    }
}

fn parse<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid {key}: {value:?}"))
}

fn config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("driverelay")
        .join("relay.toml")
}
