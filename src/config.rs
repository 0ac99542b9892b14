//! Settings file (`tmsync.toml`)
//!
//! ```toml
//! queue_capacity = 16
//! order = ["sys/folder", "ltm/pool", "ltm/virtual"]
//!
//! [[devices]]
//! url = "https://10.1.1.4"
//! username = "admin"
//! password_env = "BIGIP_PASSWORD"
//! insecure = true
//!
//! [retry]
//! attempts = 3
//! initial_delay_ms = 500
//! multiplier = 2.0
//!
//! [state]
//! partition = "cis-c-tenant"
//! prefix = "f5-kic_"
//! ```

use anyhow::{Context, Result, bail};
use reconcile::persist::{DEFAULT_STATE_PARTITION, DEFAULT_STATE_PREFIX};
use reconcile::{DEFAULT_QUEUE_CAPACITY, ResourceOrder, StateStore};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tmrest::RetryConfig;

use crate::paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub devices: Vec<DeviceSettings>,
    /// Kind ordering patterns, replacing the built-in order
    #[serde(default)]
    pub order: Option<Vec<String>>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub state: StateSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            order: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry: RetrySettings::default(),
            state: StateSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub url: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Environment variable holding the password
    #[serde(default)]
    pub password_env: Option<String>,
    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSettings {
    #[serde(default = "default_state_partition")]
    pub partition: String,
    #[serde(default = "default_state_prefix")]
    pub prefix: String,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            partition: default_state_partition(),
            prefix: default_state_prefix(),
        }
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_state_partition() -> String {
    DEFAULT_STATE_PARTITION.to_string()
}

fn default_state_prefix() -> String {
    DEFAULT_STATE_PREFIX.to_string()
}

impl Settings {
    /// Load settings from `path`, or from the config directory.
    ///
    /// A missing default settings file yields defaults; a missing explicit one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (paths::settings_file()?, false),
        };

        if !explicit && !path.exists() {
            log::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    /// Parse settings from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)?;
        if settings.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }
        let multiplier = settings.retry.multiplier;
        if !(multiplier.is_finite() && multiplier >= 1.0) {
            bail!("retry.multiplier must be a finite number of at least 1, got {multiplier}");
        }
        Ok(settings)
    }

    /// Kind ordering to plan with
    pub fn resource_order(&self) -> Result<ResourceOrder> {
        match &self.order {
            Some(patterns) => {
                ResourceOrder::new(patterns.as_slice()).context("Invalid order patterns")
            }
            None => Ok(ResourceOrder::default()),
        }
    }

    /// Devices to act on, all of them or the one with URL `target`
    pub fn select_devices(&self, target: Option<&str>) -> Result<Vec<&DeviceSettings>> {
        if self.devices.is_empty() {
            bail!("No devices configured. Add [[devices]] entries to tmsync.toml");
        }
        match target {
            None => Ok(self.devices.iter().collect()),
            Some(url) => {
                let url = url.trim_end_matches('/');
                let selected: Vec<_> = self
                    .devices
                    .iter()
                    .filter(|d| d.url.trim_end_matches('/') == url)
                    .collect();
                if selected.is_empty() {
                    bail!("Device not configured: {url}");
                }
                Ok(selected)
            }
        }
    }

    pub fn state_store(&self) -> StateStore {
        StateStore::new(&self.state.partition, &self.state.prefix)
    }
}

impl RetrySettings {
    pub fn to_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.attempts,
            Duration::from_millis(self.initial_delay_ms),
            self.multiplier,
        )
    }
}

impl DeviceSettings {
    /// Resolve the password, preferring `password_env`
    pub fn password(&self) -> Result<String> {
        if let Some(var) = &self.password_env {
            return std::env::var(var)
                .with_context(|| format!("Password variable {var} for {} is not set", self.url));
        }
        self.password
            .clone()
            .with_context(|| format!("No password or password_env for {}", self.url))
    }

    /// HTTP client for this device
    pub fn client(&self, retry: &RetrySettings) -> Result<tmrest::Client> {
        let password = self.password()?;
        let client = tmrest::Client::new(&self.url, &self.username, &password, self.insecure);
        Ok(client.with_retry(retry.to_config()))
    }
}

// ============================================================================
// Tests
// ============================================================================
