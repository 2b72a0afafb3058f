//! File configuration.
//!
//! ```toml
//! heartbeat_interval_secs = 30
//!
//! [[bots]]
//! cookie = "SESSDATA=...; bili_jct=...; DedeUserID=..."
//! room_ids = [1, 21452505]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DanmakuError, Result};

pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_RECONNECT_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// One identity and the rooms it listens to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotConfig {
    /// Raw cookie string. Empty listens anonymously.
    #[serde(default)]
    pub cookie: String,
    #[serde(default)]
    pub room_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bots: Vec<BotConfig>,
    pub heartbeat_interval_secs: u64,
    pub reconnect_interval_secs: u64,
    pub connect_timeout_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bots: Vec::new(),
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            reconnect_interval_secs: DEFAULT_RECONNECT_INTERVAL_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// `<config dir>/blive/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("blive").join("config.toml"))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DanmakuError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| DanmakuError::config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_secs == 0 {
            return Err(DanmakuError::config("heartbeat_interval_secs must be positive"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(DanmakuError::config("connect_timeout_secs must be positive"));
        }
        if let Some(idx) = self.bots.iter().position(|b| b.room_ids.is_empty()) {
            return Err(DanmakuError::config(format!("bots[{idx}] has no room_ids")));
        }
        Ok(())
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            reconnect_interval: Duration::from_secs(self.reconnect_interval_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Timing knobs for a single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    pub reconnect_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Config::default().session()
    }
}
