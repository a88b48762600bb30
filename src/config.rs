use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::{Display, EnumString};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root URL of the hosted Space, without a trailing slash
    pub base_url: String,

    /// Endpoint name exposed by the Space
    pub api_name: String,

    /// Path prefix of the queue-style call API
    pub call_prefix: String,

    /// Which wire protocol the endpoint speaks
    pub protocol: Protocol,

    /// TCP/TLS connect timeout for every request
    pub connect_timeout_secs: u64,

    /// Optional caller-side limit on a whole exchange. The client itself never times out.
    pub exchange_timeout_secs: Option<u64>,

    /// Queue overlapping submissions so history order equals submission order
    pub serialize_exchanges: bool,

    /// UI preferences
    pub ui: UiConfig,

    /// spacechat home directory
    #[serde(skip)]
    pub home: PathBuf,
}

/// Wire protocol spoken by the remote endpoint
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Protocol {
    /// Two-phase: create a job, then follow its event stream
    Queue,
    /// Single blocking request against `/api/predict`
    Predict,
}

/// UI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub show_timestamps: bool,
    pub assistant_name: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            show_timestamps: false,
            assistant_name: "Assistant".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("~"))
            .join(".spacechat");

        Config {
            base_url: "https://amalsp-medbrain-ai.hf.space".to_string(),
            api_name: "predict".to_string(),
            call_prefix: "/gradio_api/call".to_string(),
            protocol: Protocol::Queue,
            connect_timeout_secs: 10,
            exchange_timeout_secs: None,
            serialize_exchanges: true,
            ui: UiConfig::default(),
            home,
        }
    }
}

impl Config {
    /// Load configuration from `~/.spacechat/config.toml`, then apply
    /// `SPACECHAT_*` environment overrides
    pub fn load() -> Result<Self> {
        let home = dirs::home_dir()
            .context("Could not find home directory")?
            .join(".spacechat");

        let mut config = Self::load_from(&home.join("config.toml"))?;
        config.home = home;
        config.apply_env(|key| std::env::var(key).ok())?;

        Ok(config)
    }

    /// Load a config file, falling back to defaults when it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.normalize();

        Ok(config)
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup("SPACECHAT_BASE_URL") {
            self.base_url = base_url;
        }
        if let Some(api_name) = lookup("SPACECHAT_API_NAME") {
            self.api_name = api_name;
        }
        if let Some(protocol) = lookup("SPACECHAT_PROTOCOL") {
            self.protocol = protocol
                .parse()
                .with_context(|| format!("Unknown protocol '{}' in SPACECHAT_PROTOCOL", protocol))?;
        }
        self.normalize();

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.home).context("Failed to create .spacechat directory")?;

        let config_path = self.config_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(config_path)
    }

    pub fn config_path(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn exchange_timeout(&self) -> Option<Duration> {
        self.exchange_timeout_secs.map(Duration::from_secs)
    }

    fn normalize(&mut self) {
        while self.base_url.ends_with('/') {
            self.base_url.pop();
        }
        if !self.call_prefix.is_empty() && !self.call_prefix.starts_with('/') {
            self.call_prefix.insert(0, '/');
        }
        while self.call_prefix.ends_with('/') {
            self.call_prefix.pop();
        }
    }
}
