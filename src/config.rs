//! Agent configuration loaded from a TOML file.
//!
//! The file lives at `$FEEDAGENT_CONFIG` or, failing that, at
//! `<config dir>/feedagent/agent.toml`. A missing file is written out with defaults so the
//! operator has something to edit. The defaults carry no credentials, so validation rejects
//! them until the file has been filled in.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_ENV: &str = "FEEDAGENT_CONFIG";
const CONFIG_DIR: &str = "feedagent";
const CONFIG_FILE: &str = "agent.toml";

const PLAIN_PORT: u16 = 1883;
const TLS_PORT: u16 = 8883;
const MIN_KEEP_ALIVE_SECS: u64 = 5;

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub wifi: WifiConfig,
    pub broker: BrokerConfig,
    pub timing: TimingConfig,
    pub buffer: BufferConfig,
}

/// Station credentials and the association retry bound.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
    /// Network interface the station runs on
    pub interface: String,
    /// Hotspot connection to bring down before joining as a client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_point_connection: Option<String>,
    pub max_attempts: u32,
    pub retry_interval_secs: u64,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            interface: "wlan0".to_string(),
            access_point_connection: None,
            max_attempts: 20,
            retry_interval_secs: 3,
        }
    }
}

impl WifiConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    /// Defaults to 1883, or 8883 when `tls` is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub username: String,
    pub key: String,
    pub feed: String,
    /// Encrypted transport. Costs noticeably more memory than plain TCP.
    pub tls: bool,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "io.adafruit.com".to_string(),
            port: None,
            username: String::new(),
            key: String::new(),
            feed: "Temperature".to_string(),
            tls: false,
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
        }
    }
}

impl BrokerConfig {
    pub fn port(&self) -> u16 {
        match (self.port, self.tls) {
            (Some(port), _) => port,
            (None, true) => TLS_PORT,
            (None, false) => PLAIN_PORT,
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub publish_period_ms: u64,
    pub tick_ms: u64,
    /// Upper bound for one inbound check
    pub inbound_poll_budget_ms: u64,
    pub startup_delay_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            publish_period_ms: 10_000,
            tick_ms: 500,
            inbound_poll_budget_ms: 50,
            startup_delay_secs: 10,
        }
    }
}

impl TimingConfig {
    pub fn publish_period(&self) -> Duration {
        Duration::from_millis(self.publish_period_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn inbound_poll_budget(&self) -> Duration {
        Duration::from_millis(self.inbound_poll_budget_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BufferConfig {
    pub path: PathBuf,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data_file.txt"),
        }
    }
}

impl AgentConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AgentConfig =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse agent config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.wifi.ssid.trim().is_empty() {
            return Err(eyre!("wifi.ssid must not be empty"));
        }
        if self.wifi.interface.trim().is_empty() {
            return Err(eyre!("wifi.interface must not be empty"));
        }
        if self.wifi.max_attempts == 0 {
            return Err(eyre!("wifi.max_attempts must be at least 1"));
        }
        if self.broker.host.trim().is_empty() {
            return Err(eyre!("broker.host must not be empty"));
        }
        if self.broker.username.trim().is_empty() {
            return Err(eyre!("broker.username must not be empty"));
        }
        if self.broker.feed.trim().is_empty() {
            return Err(eyre!("broker.feed must not be empty"));
        }
        if self.broker.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(eyre!(
                "broker.keep_alive_secs must be at least {}",
                MIN_KEEP_ALIVE_SECS
            ));
        }
        if self.timing.tick_ms == 0 {
            return Err(eyre!("timing.tick_ms must be greater than zero"));
        }
        if self.timing.publish_period_ms < self.timing.tick_ms {
            return Err(eyre!(
                "timing.publish_period_ms ({}) is shorter than timing.tick_ms ({})",
                self.timing.publish_period_ms,
                self.timing.tick_ms
            ));
        }
        if self.timing.inbound_poll_budget_ms >= self.timing.tick_ms {
            warn!(
                "Inbound poll budget of {}ms is not shorter than the {}ms tick",
                self.timing.inbound_poll_budget_ms, self.timing.tick_ms
            );
        }
        Ok(())
    }
}

/// Resolves the config file location.
pub fn config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    let mut path = dirs::config_dir().ok_or_else(|| eyre!("No config directory available"))?;
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    Ok(path)
}

/// Loads the config from `path`, writing a default file first if none exists.
pub async fn load_or_create(path: &Path) -> Result<AgentConfig> {
    if !tokio::fs::try_exists(path)
        .await
        .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
    {
        warn!(
            "Config file {} does not exist, writing defaults",
            path.display()
        );
        ensure_default_config(path).await?;
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    debug!("Read {} bytes of config from {}", content.len(), path.display());

    let config = AgentConfig::from_toml(&content)?;
    info!("Loaded agent config from {}", path.display());
    Ok(config)
}

async fn ensure_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
    }

    let content = toml::to_string_pretty(&AgentConfig::default())
        .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
    tokio::fs::write(path, content)
        .await
        .map_err(|e| eyre!("Failed to write default config file: {}", e))?;
    Ok(())
}
