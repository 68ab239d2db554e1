//! Service configuration
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then `SESSRV_` environment overrides. It only drives bootstrap: sessions
//! added at runtime through the registry are not persisted.
//!
//! ```yaml
//! service:
//!   name: "sessrv"
//!   log_level: "info"
//!   connect_timeout_ms: 5000
//!   default_poll_interval_secs: 1.0
//!
//! sessions:
//!   - label: "PLC line 1"
//!     host: "192.168.1.100"
//!     port: 502
//!     unit_id: 1
//!     connect_on_start: true
//!     read_poll:
//!       address: 0
//!       count: 16
//!       kind: holding_register
//!       interval_secs: 2.0
//! ```

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use modlink::RegisterKind;

use crate::error::{Result, SessionError};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub sessions: Vec<SessionConfig>,
}

/// Service-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub log_level: String,
    /// Timeout for TCP connect and each wire read, in milliseconds
    pub connect_timeout_ms: u64,
    /// Poll interval used when a session's poll block omits one
    pub default_poll_interval_secs: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "sessrv".to_string(),
            log_level: "info".to_string(),
            connect_timeout_ms: 5000,
            default_poll_interval_secs: 1.0,
        }
    }
}

/// One configured device endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Display name, also the `source` field of log entries
    pub label: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    /// Connect this session during service startup
    #[serde(default)]
    pub connect_on_start: bool,
    /// Read poll to start automatically once connected
    #[serde(default)]
    pub read_poll: Option<ReadPollConfig>,
}

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

/// Auto-started read poll parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadPollConfig {
    pub address: u16,
    pub count: u16,
    pub kind: RegisterKind,
    /// Falls back to `service.default_poll_interval_secs` when omitted
    #[serde(default)]
    pub interval_secs: Option<f64>,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(SessionError::Config("Session label is empty".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(SessionError::Config(format!(
                "Session '{}' has no host",
                self.label
            )));
        }
        if self.port == 0 {
            return Err(SessionError::Config(format!(
                "Session '{}' has port 0",
                self.label
            )));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration: defaults, then the YAML file (if given), then
    /// `SESSRV_` environment variables (`SESSRV_SERVICE__LOG_LEVEL=debug`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: AppConfig = figment
            .merge(Env::prefixed("SESSRV_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for session in &self.sessions {
            session.validate()?;
        }
        Ok(())
    }
}
