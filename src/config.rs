use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Broker address, credentials and client-id prefix for one (re)connect.
///
/// Callers may change it between a disconnect and the next connect; the
/// session only reads it at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub server_host: String,
    #[serde(default = "default_port")]
    pub server_port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_host: default_host(),
            server_port: default_port(),
            username: default_username(),
            password: default_password(),
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl ConnectionConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_host.trim().is_empty() {
            bail!("MQTT server host cannot be empty");
        }
        if self.server_port == 0 {
            bail!("MQTT server port cannot be 0");
        }
        if self.client_id_prefix.trim().is_empty() {
            bail!("MQTT client id prefix cannot be empty");
        }
        if self.connect_timeout_secs == 0 {
            bail!("Connect timeout must be at least one second");
        }
        Ok(())
    }
}

/// Settings for the timer-driven sensor simulator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    /// Half-open range `[min, max)` for simulated temperature
    #[serde(default = "default_temperature_range")]
    pub temperature_range: (i32, i32),
    /// Half-open range `[min, max)` for simulated humidity
    #[serde(default = "default_humidity_range")]
    pub humidity_range: (i32, i32),
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_interval(),
            temperature_range: default_temperature_range(),
            humidity_range: default_humidity_range(),
        }
    }
}

/// Caller-driven reconnect settings. The session itself never retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_delay_ms: default_base_delay(),
            max_delay_secs: default_max_delay(),
            max_attempts: None,
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mqtt: ConnectionConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_username() -> String {
    "siot".to_string()
}

fn default_password() -> String {
    "dfrobot".to_string()
}

fn default_client_id_prefix() -> String {
    "MyClient".to_string()
}

fn default_keep_alive() -> u64 {
    15
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    1000
}

fn default_temperature_range() -> (i32, i32) {
    (10, 30)
}

fn default_humidity_range() -> (i32, i32) {
    (10, 85)
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    60
}

fn default_jitter() -> f64 {
    0.1
}

impl AppConfig {
    /// Get the default config directory path (~/.config/iotv-link/)
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("iotv-link")
    }

    /// Get the default config file path (~/.config/iotv-link/config.toml)
    pub fn default_path() -> PathBuf {
        Self::default_dir().join("config.toml")
    }

    /// Find config file using fallback chain:
    /// 1. If explicit path provided, use it
    /// 2. If ./iotv-link.toml exists in current directory, use it
    /// 3. Otherwise use ~/.config/iotv-link/config.toml
    pub fn find_config_path(explicit_path: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit_path {
            return path.to_path_buf();
        }

        let local_config = PathBuf::from("iotv-link.toml");
        if local_config.exists() {
            return local_config;
        }

        Self::default_path()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: AppConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Load the config if the file exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.mqtt.validate()?;

        let sim = &self.simulator;
        if sim.interval_ms == 0 {
            bail!("Simulator interval cannot be 0");
        }
        if sim.temperature_range.0 >= sim.temperature_range.1 {
            bail!(
                "Invalid temperature range: {:?}",
                sim.temperature_range
            );
        }
        if sim.humidity_range.0 >= sim.humidity_range.1 {
            bail!("Invalid humidity range: {:?}", sim.humidity_range);
        }

        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            bail!("Reconnect jitter must be between 0.0 and 1.0");
        }
        Ok(())
    }
}
