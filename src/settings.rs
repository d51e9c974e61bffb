//! Layered settings: built-in defaults, an optional TOML file and
//! `CTGWATCH__SECTION__KEY` environment variables.
//!
//! ```toml
//! [api]
//! base_url = "http://localhost:8080/api/v1"
//! timeout = "10s"
//!
//! [stream]
//! url = "http://localhost:3000/api/stream-sse"
//! device_id = "ctg-01"
//!
//! [watchdog]
//! heartbeat_window = "5m"
//! data_timeout = "30s"
//!
//! [reconnect]
//! initial_delay = "5s"
//! multiplier = 2.0
//! max_delay = "60s"
//! max_attempts = 3
//!
//! [dashboard]
//! widgets = ["session-info", "fetal-heart-rate", "uterine-contractions"]
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, Map};
use serde::{Deserialize, Serialize};

use crate::data::duration::serde_str;
use crate::error::{Error, Result};
use crate::policy::{ReconnectConfig, WatchdogConfig};
use crate::session::{ManagerSettings, DEFAULT_BASE_URL};

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_NAME: &str = "ctgwatch";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "CTGWATCH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    #[serde(with = "serde_str")]
    pub timeout: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Server-sent-events endpoint.
    pub url: String,
    /// Device sent with start requests and stream queries.
    pub device_id: String,
    /// Connect timeout; the stream itself has no total timeout.
    #[serde(with = "serde_str")]
    pub connect_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000/api/stream-sse".to_string(),
            device_id: "ctg-01".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    pub capacity: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            capacity: crate::data::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogSettings {
    #[serde(with = "serde_str")]
    pub heartbeat_window: Duration,
    #[serde(with = "serde_str")]
    pub data_timeout: Duration,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        let defaults = WatchdogConfig::default();
        Self {
            heartbeat_window: defaults.heartbeat_window,
            data_timeout: defaults.data_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    #[serde(with = "serde_str")]
    pub initial_delay: Duration,
    pub multiplier: f64,
    #[serde(with = "serde_str")]
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let defaults = ReconnectConfig::default();
        Self {
            initial_delay: defaults.initial_delay,
            multiplier: defaults.multiplier,
            max_delay: defaults.max_delay,
            max_attempts: defaults.max_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    /// Widget tags, top to bottom.
    pub widgets: Vec<String>,
    /// Where `e` writes the buffer.
    pub export_path: String,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            widgets: vec![
                "session-info".to_string(),
                "fetal-heart-rate".to_string(),
                "uterine-contractions".to_string(),
            ],
            export_path: "ctg_export.json".to_string(),
        }
    }
}

/// All settings of the client and dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api: ApiSettings,
    pub stream: StreamSettings,
    pub buffer: BufferSettings,
    pub watchdog: WatchdogSettings,
    pub reconnect: ReconnectSettings,
    pub dashboard: DashboardSettings,
}

impl Settings {
    /// Load settings from `path` (required) or `./ctgwatch.{toml,json,..}`
    /// (optional), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`load`](Self::load), reading environment overrides from `env`
    /// instead of the process environment when given.
    pub fn load_with_env(path: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let environment = Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("dashboard.widgets")
            .source(env);

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(Error::Config("api.base_url must not be empty".into()));
        }
        if self.stream.url.trim().is_empty() {
            return Err(Error::Config("stream.url must not be empty".into()));
        }
        if self.buffer.capacity == 0 {
            return Err(Error::Config("buffer.capacity must be at least 1".into()));
        }
        if self.watchdog.heartbeat_window.is_zero() || self.watchdog.data_timeout.is_zero() {
            return Err(Error::Config("watchdog windows must be positive".into()));
        }
        if !(self.reconnect.multiplier >= 1.0 && self.reconnect.multiplier.is_finite()) {
            return Err(Error::Config("reconnect.multiplier must be at least 1.0".into()));
        }
        if self.reconnect.max_delay < self.reconnect.initial_delay {
            return Err(Error::Config(
                "reconnect.max_delay must not be shorter than reconnect.initial_delay".into(),
            ));
        }
        Ok(())
    }

    pub fn watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig {
            heartbeat_window: self.watchdog.heartbeat_window,
            data_timeout: self.watchdog.data_timeout,
        }
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: self.reconnect.initial_delay,
            multiplier: self.reconnect.multiplier,
            max_delay: self.reconnect.max_delay,
            max_attempts: self.reconnect.max_attempts,
        }
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            device_id: self.stream.device_id.clone(),
            buffer_capacity: self.buffer.capacity,
            watchdog: self.watchdog_config(),
            reconnect: self.reconnect_config(),
        }
    }
}
