//! Viewer configuration types.
//!
//! [`ViewerConfig`] holds every runtime setting the session engine needs: where
//! the gateway lives, which paths its two channels are served on, how hard to
//! retry after an abnormal close, and how often the health check runs.
//!
//! The struct is plain data.  Populating it from CLI arguments, environment
//! variables or a settings file is the job of `main` and
//! [`crate::infrastructure::settings`].

use std::time::Duration;

use vms_core::Endpoint;

use super::reconnect::ReconnectPolicy;

/// All runtime configuration for the session engine.
///
/// # Example
///
/// ```rust
/// use vms_core::Endpoint;
/// use vms_viewer::domain::ViewerConfig;
///
/// let cfg = ViewerConfig::default();
/// assert_eq!(cfg.endpoint_url(Endpoint::Video), "ws://127.0.0.1:8080/ws/video");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerConfig {
    /// Host of the gateway serving both channels.
    pub gateway_host: String,

    /// Port of the gateway serving both channels.
    pub gateway_port: u16,

    /// Path of the video channel (liveData text frames plus binary frames).
    pub video_path: String,

    /// Path of the control channel (playback requests and commands).
    pub control_path: String,

    /// Backoff schedule applied after an abnormal close.
    pub reconnect: ReconnectPolicy,

    /// Period of the safety-net monitor that revives channels the reconnect
    /// schedule has left closed.
    pub health_check_interval: Duration,
}

impl Default for ViewerConfig {
    /// | Field                  | Default        |
    /// |------------------------|----------------|
    /// | gateway_host           | `127.0.0.1`    |
    /// | gateway_port           | `8080`         |
    /// | video_path             | `/ws/video`    |
    /// | control_path           | `/ws/control`  |
    /// | reconnect              | 1 s / 30 s / 5 |
    /// | health_check_interval  | 15 seconds     |
    fn default() -> Self {
        Self {
            gateway_host: "127.0.0.1".to_string(),
            gateway_port: 8080,
            video_path: Endpoint::Video.default_path().to_string(),
            control_path: Endpoint::Control.default_path().to_string(),
            reconnect: ReconnectPolicy::default(),
            health_check_interval: Duration::from_secs(15),
        }
    }
}

impl ViewerConfig {
    /// Path the given endpoint is served on.
    pub fn path(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::Video => &self.video_path,
            Endpoint::Control => &self.control_path,
        }
    }

    /// Full WebSocket URL of the given endpoint: `ws://{host}:{port}{path}`.
    pub fn endpoint_url(&self, endpoint: Endpoint) -> String {
        format!(
            "ws://{}:{}{}",
            self.gateway_host,
            self.gateway_port,
            self.path(endpoint)
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_gateway_address() {
        let cfg = ViewerConfig::default();
        assert_eq!(cfg.gateway_host, "127.0.0.1");
        assert_eq!(cfg.gateway_port, 8080);
    }

    #[test]
    fn test_default_health_check_interval_is_fifteen_seconds() {
        assert_eq!(
            ViewerConfig::default().health_check_interval,
            Duration::from_secs(15)
        );
    }

    #[test]
    fn test_endpoint_urls_use_well_known_paths() {
        let cfg = ViewerConfig::default();
        assert_eq!(
            cfg.endpoint_url(Endpoint::Video),
            "ws://127.0.0.1:8080/ws/video"
        );
        assert_eq!(
            cfg.endpoint_url(Endpoint::Control),
            "ws://127.0.0.1:8080/ws/control"
        );
    }

    #[test]
    fn test_endpoint_url_reflects_overrides() {
        // Arrange
        let cfg = ViewerConfig {
            gateway_host: "10.1.2.3".to_string(),
            gateway_port: 9000,
            control_path: "/gw/control".to_string(),
            ..ViewerConfig::default()
        };

        // Act
        let url = cfg.endpoint_url(Endpoint::Control);

        // Assert
        assert_eq!(url, "ws://10.1.2.3:9000/gw/control");
    }
}
