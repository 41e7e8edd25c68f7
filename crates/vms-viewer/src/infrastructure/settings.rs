//! Optional TOML settings file for the headless viewer.
//!
//! Every field has a serde default, so a file only needs to name what it
//! changes:
//!
//! ```toml
//! [gateway]
//! host = "10.0.0.2"
//! port = 8080
//!
//! [server]
//! ip = "172.16.4.20"
//! port = 5100
//!
//! [reconnect]
//! max_attempts = 8
//! ```
//!
//! Command-line flags and environment variables override whatever the file
//! sets; `main.rs` applies them on top of [`ViewerSettings::to_config`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vms_core::{CameraId, Endpoint, ServerTarget};

use crate::domain::{ReconnectPolicy, ViewerConfig};

/// Error type for settings file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error reading settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse settings TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file parsed but a value is unusable.
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Settings schema ───────────────────────────────────────────────────────────

/// Top-level settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ViewerSettings {
    /// Cameras to show live when none are given on the command line.
    #[serde(default)]
    pub cameras: Vec<CameraId>,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    /// Default server target, used when none is given on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerSettings>,
}

/// Where the gateway is reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewaySettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_video_path")]
    pub video_path: String,
    #[serde(default = "default_control_path")]
    pub control_path: String,
}

/// Backoff and health-check tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSettings {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_health_check_secs")]
    pub health_check_secs: u64,
}

/// The VMS server the gateway should connect to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSettings {
    pub ip: String,
    pub port: u16,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_video_path() -> String {
    Endpoint::Video.default_path().to_string()
}
fn default_control_path() -> String {
    Endpoint::Control.default_path().to_string()
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_health_check_secs() -> u64 {
    15
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            video_path: default_video_path(),
            control_path: default_control_path(),
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            health_check_secs: default_health_check_secs(),
        }
    }
}

impl ServerSettings {
    pub fn target(&self) -> ServerTarget {
        ServerTarget::new(self.ip.clone(), self.port)
    }
}

impl ViewerSettings {
    /// Parses settings from TOML text and validates them.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`] for
    /// values the engine cannot use.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let settings: ViewerSettings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, path) in [
            ("gateway.video_path", &self.gateway.video_path),
            ("gateway.control_path", &self.gateway.control_path),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{path:?} must start with '/'"),
                });
            }
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "reconnect.base_delay_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(ConfigError::Invalid {
                field: "reconnect.max_delay_ms",
                reason: "must not be below base_delay_ms".to_string(),
            });
        }
        if self.reconnect.health_check_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "reconnect.health_check_secs",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Engine configuration described by these settings.
    pub fn to_config(&self) -> ViewerConfig {
        ViewerConfig {
            gateway_host: self.gateway.host.clone(),
            gateway_port: self.gateway.port,
            video_path: self.gateway.video_path.clone(),
            control_path: self.gateway.control_path.clone(),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
                max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
                max_attempts: self.reconnect.max_attempts,
            },
            health_check_interval: Duration::from_secs(self.reconnect.health_check_secs),
        }
    }
}

/// Loads and validates the settings file at `path`.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read, otherwise as
/// [`ViewerSettings::from_toml`].
pub fn load_settings(path: &Path) -> Result<ViewerSettings, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ViewerSettings::from_toml(&text)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
