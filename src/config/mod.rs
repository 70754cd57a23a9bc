//! Configuration management for the amplifier gateway
//!
//! Handles loading, parsing, validation and hot-reloading of the YAML
//! configuration file.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::fs;

use crate::device::Credentials;

pub use watcher::ConfigWatcher;

/// Port of the control-surface API unless configured
pub const DEFAULT_API_PORT: u16 = 8125;

/// Accepted range of the metering interval, in milliseconds
pub const METERING_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 50..=99_999;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    pub device: DeviceConfig,
    #[serde(default)]
    pub metering: MeteringConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Amplifier connection settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// IP address, optionally with `:port`
    pub host: String,
    /// Static token sent in the `token` header
    pub token: String,
    #[serde(default)]
    pub amp_type: AmpType,
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl DeviceConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials::for_host(&self.host, self.token.clone())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Supported amplifier models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum AmpType {
    #[default]
    #[serde(rename = "UMA04_POE")]
    Uma04Poe,
}

impl AmpType {
    pub fn label(self) -> &'static str {
        match self {
            AmpType::Uma04Poe => "UMA04/POE",
        }
    }

    /// Number of independently addressable outputs
    pub fn channels(self) -> u8 {
        match self {
            AmpType::Uma04Poe => 4,
        }
    }
}

/// Periodic refresh of channel state
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MeteringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metering_interval")]
    pub interval_ms: u64,
}

impl MeteringConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_metering_interval(),
        }
    }
}

/// Optional synchronizers
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FeaturesConfig {
    #[serde(default)]
    pub delay: bool,
}

/// HTTP/WebSocket front end
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_yaml(&contents).with_context(|| format!("Invalid config file: {}", path))
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        let host = self.device.host.trim();
        if host.is_empty() {
            anyhow::bail!("device.host cannot be empty");
        }
        if host.parse::<IpAddr>().is_err() && host.parse::<SocketAddr>().is_err() {
            anyhow::bail!("device.host '{}' is not an IP address or IP:port", host);
        }
        if self.device.token.trim().is_empty() {
            anyhow::bail!("device.token cannot be empty");
        }
        if self.device.probe_interval_ms < 50 {
            anyhow::bail!(
                "device.probe_interval_ms must be at least 50 (got {})",
                self.device.probe_interval_ms
            );
        }
        if self.device.request_timeout_ms == 0 {
            anyhow::bail!("device.request_timeout_ms must be positive");
        }

        if !METERING_INTERVAL_RANGE.contains(&self.metering.interval_ms) {
            anyhow::bail!(
                "metering.interval_ms {} is outside {}..={}",
                self.metering.interval_ms,
                METERING_INTERVAL_RANGE.start(),
                METERING_INTERVAL_RANGE.end()
            );
        }

        if self.api.enabled && self.api.port == 0 {
            anyhow::bail!("api.port cannot be 0");
        }

        Ok(())
    }

    /// Channel count of the configured amplifier
    pub fn channels(&self) -> u8 {
        self.device.amp_type.channels()
    }
}

fn default_true() -> bool { true }
fn default_probe_interval() -> u64 { 500 }
fn default_request_timeout() -> u64 { 2000 }
fn default_metering_interval() -> u64 { 5000 }
fn default_api_port() -> u16 { DEFAULT_API_PORT }
