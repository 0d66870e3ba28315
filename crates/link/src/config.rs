// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Messaging layer configuration.
//!
//! Configuration is read from a TOML file (by default
//! `<config dir>/beacon/config.toml`). Every field has a default, so an empty
//! file or a missing section is valid:
//!
//! ```toml
//! [relay]
//! url = "ws://localhost:7890"
//!
//! [reconnect]
//! initial_delay_ms = 1000
//! max_delay_ms = 30000
//! max_attempts = 10
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bcn_core::{ChannelId, DEFAULT_MAX_MESSAGE_SIZE};

use crate::error::{Error, Result};

const CONFIG_DIR_NAME: &str = "beacon";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub reconnect: ReconnectConfig,
    pub dispatch: DispatchConfig,
    pub sync: SyncConfig,
    pub emergency: EmergencyConfig,
}

/// Relay endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// WebSocket URL of the relay (`ws://` or `wss://`).
    pub url: String,
    /// Upper bound on any single request to the relay, in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig { url: "ws://localhost:7890".to_string(), request_timeout_ms: 10_000 }
    }
}

impl RelayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first automatic reconnect, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on the delay between attempts, in milliseconds.
    pub max_delay_ms: u64,
    /// Automatic attempts before giving up until the next manual connect.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig { initial_delay_ms: 1_000, max_delay_ms: 30_000, max_attempts: 10 }
    }
}

/// Outbound queue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Messages published concurrently per drain batch.
    pub batch_size: usize,
    /// Pause between drain batches, in milliseconds.
    pub batch_pause_ms: u64,
    /// Publish attempts per message before it is reported as failed.
    pub max_attempts: u32,
    /// Size limit for channels without registered metadata, in bytes.
    pub default_max_message_size: usize,
    /// Delay before retrying messages re-queued while connected, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            batch_size: 10,
            batch_pause_ms: 50,
            max_attempts: 5,
            default_max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            retry_delay_ms: 1_000,
        }
    }
}

impl DispatchConfig {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Offline reconciliation settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Periodic reconciliation interval while connected. 0 = only on connect.
    pub interval_secs: u64,
    /// Unsynced entities older than this are marked failed. Unset = keep forever.
    pub entity_ttl_secs: Option<u64>,
}

impl SyncConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }

    pub fn entity_ttl(&self) -> Option<Duration> {
        self.entity_ttl_secs.map(Duration::from_secs)
    }
}

/// Emergency broadcast settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyConfig {
    /// Channels used when the relay advertises no emergency channels.
    pub fallback_channels: Vec<ChannelId>,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        EmergencyConfig {
            fallback_channels: vec![ChannelId::from("global-broadcast"), ChannelId::from("alerts")],
        }
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Load configuration from the default path, falling back to defaults if absent.
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Config::default()),
        }
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would make the layer misbehave.
    pub fn validate(&self) -> Result<()> {
        let url = &self.relay.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "invalid relay url '{url}': must start with ws:// or wss://"
            )));
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err(Error::Config("reconnect.initial_delay_ms must be positive".into()));
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(Error::Config(
                "reconnect.max_delay_ms must not be below reconnect.initial_delay_ms".into(),
            ));
        }
        if self.dispatch.batch_size == 0 {
            return Err(Error::Config("dispatch.batch_size must be positive".into()));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(Error::Config("dispatch.max_attempts must be positive".into()));
        }
        if self.emergency.fallback_channels.is_empty() {
            return Err(Error::Config("emergency.fallback_channels must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
