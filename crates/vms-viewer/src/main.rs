//! VMS viewer: headless entry point.
//!
//! Connects the video and control channels of a VMS gateway, requests live
//! video (or a recording) for the given cameras and logs what arrives:
//! readiness changes, detection metadata and decoded frame summaries.
//!
//! # Usage
//!
//! ```text
//! vms-viewer [OPTIONS]
//!
//! Options:
//!   --config       <PATH>   TOML settings file
//!   --gateway-host <HOST>   Gateway hostname or IP [default: 127.0.0.1]
//!   --gateway-port <PORT>   Gateway HTTP/WebSocket port [default: 8080]
//!   --server-ip    <IP>     VMS server the gateway should reach
//!   --server-port  <PORT>   VMS server port
//!   --camera       <ID>     Camera to show (repeatable, or comma-separated)
//!   --start        <TIME>   RFC 3339 start time; switches to playback
//!   --duration     <SECS>   Playback window in seconds [default: 60]
//!   --speed        <SPEED>  Playback speed: 1x, 2x, 4x, 8x or max
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable            | Description                 |
//! |---------------------|-----------------------------|
//! | `VMS_VIEWER_CONFIG` | Settings file path          |
//! | `VMS_GATEWAY_HOST`  | Gateway host                |
//! | `VMS_GATEWAY_PORT`  | Gateway port                |
//! | `VMS_SERVER_IP`     | VMS server address          |
//! | `VMS_SERVER_PORT`   | VMS server port             |
//!
//! Precedence is command line, then environment, then settings file, then
//! built-in defaults.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use vms_core::{CameraId, ObjectDetection, PlaybackSpeed, ServerTarget};
use vms_viewer::application::{CameraFeed, FrameSink, PlaybackController, Raster, SessionManager};
use vms_viewer::domain::{SessionEvent, ViewerConfig};
use vms_viewer::infrastructure::{load_settings, ProbeBackend, ViewerSettings, WsConnector};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Headless viewer for a VMS gateway.
#[derive(Debug, Parser)]
#[command(
    name = "vms-viewer",
    about = "Headless live/playback viewer for a VMS WebSocket gateway",
    version
)]
struct Cli {
    /// TOML settings file.  Flags below override what it sets.
    #[arg(long, env = "VMS_VIEWER_CONFIG")]
    config: Option<PathBuf>,

    /// Hostname or IP address of the gateway.
    #[arg(long, env = "VMS_GATEWAY_HOST")]
    gateway_host: Option<String>,

    /// Port the gateway serves its WebSocket endpoints on.
    #[arg(long, env = "VMS_GATEWAY_PORT")]
    gateway_port: Option<u16>,

    /// Address of the VMS server, forwarded to the gateway in every request.
    #[arg(long, env = "VMS_SERVER_IP")]
    server_ip: Option<String>,

    /// Port of the VMS server.
    #[arg(long, env = "VMS_SERVER_PORT")]
    server_port: Option<u16>,

    /// Camera to show.  Repeat the flag or separate ids with commas.
    #[arg(long = "camera", value_delimiter = ',')]
    cameras: Vec<CameraId>,

    /// Start of the recording to play back (RFC 3339).  Without it the
    /// viewer shows live video.
    #[arg(long, value_parser = parse_start_time)]
    start: Option<DateTime<Utc>>,

    /// Length of the playback window in seconds.
    #[arg(long, default_value_t = 60)]
    duration: u32,

    /// Playback speed, sent once the recording is open.
    #[arg(long)]
    speed: Option<PlaybackSpeed>,
}

fn parse_start_time(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

/// What the viewer should do, after merging the CLI with the settings file.
#[derive(Debug, PartialEq)]
struct RunPlan {
    config: ViewerConfig,
    target: ServerTarget,
    cameras: Vec<CameraId>,
    playback: Option<PlaybackPlan>,
}

#[derive(Debug, PartialEq)]
struct PlaybackPlan {
    start: DateTime<Utc>,
    duration_secs: u32,
    speed: Option<PlaybackSpeed>,
}

impl Cli {
    /// Applies the command-line overrides on top of `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if no server address is known, or if no camera was
    /// selected by either source.
    fn into_plan(self, settings: ViewerSettings) -> anyhow::Result<RunPlan> {
        let mut config = settings.to_config();
        if let Some(host) = self.gateway_host {
            config.gateway_host = host;
        }
        if let Some(port) = self.gateway_port {
            config.gateway_port = port;
        }

        let server_ip = self
            .server_ip
            .or_else(|| settings.server.as_ref().map(|s| s.ip.clone()))
            .context("no VMS server address: pass --server-ip or set [server] ip")?;
        let server_port = self
            .server_port
            .or_else(|| settings.server.as_ref().map(|s| s.port))
            .context("no VMS server port: pass --server-port or set [server] port")?;

        let cameras = if self.cameras.is_empty() {
            settings.cameras
        } else {
            self.cameras
        };
        if cameras.is_empty() {
            bail!("no cameras selected: pass --camera or set cameras in the settings file");
        }

        let playback = self.start.map(|start| PlaybackPlan {
            start,
            duration_secs: self.duration,
            speed: self.speed,
        });
        if playback.is_none() && self.speed.is_some() {
            warn!("--speed has no effect without --start");
        }

        Ok(RunPlan {
            config,
            target: ServerTarget::new(server_ip, server_port),
            cameras,
            playback,
        })
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

/// Frame sink that logs a summary of every presented raster.
#[derive(Debug, Default)]
struct LogSink {
    presented: u64,
}

impl FrameSink for LogSink {
    fn present(&mut self, camera_id: CameraId, raster: &Raster, objects: &[ObjectDetection]) {
        self.presented += 1;
        debug!(
            camera_id,
            codec = ?raster.codec,
            width = raster.width,
            height = raster.height,
            bytes = raster.data.len(),
            objects = objects.len(),
            "frame"
        );
        if self.presented % 100 == 0 {
            info!(camera_id, frames = self.presented, "frames presented");
        }
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::ChannelOpened { endpoint } => info!(%endpoint, "channel open"),
        SessionEvent::ChannelClosed {
            endpoint,
            code,
            reason,
        } => info!(%endpoint, code, %reason, "channel closed"),
        SessionEvent::ServerConnection {
            endpoint,
            connected,
        } => info!(%endpoint, connected, "gateway upstream status"),
        SessionEvent::Ready {
            endpoint,
            client_key,
        } => info!(%endpoint, client_key, "channel ready"),
        SessionEvent::Error { endpoint, message } => warn!(%endpoint, %message, "session error"),
        SessionEvent::LiveData { data, .. } => debug!(
            camera_id = data.camera_id,
            objects = data.objects.len(),
            "liveData"
        ),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => load_settings(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => ViewerSettings::default(),
    };
    let plan = cli.into_plan(settings)?;

    info!(
        gateway = %format!("{}:{}", plan.config.gateway_host, plan.config.gateway_port),
        server = %plan.target,
        cameras = ?plan.cameras,
        "VMS viewer starting"
    );

    let session = SessionManager::new(plan.config, Arc::new(WsConnector));
    let _log = session.subscribe(log_event);

    session.connect_video(plan.target.clone());
    session.connect_control(plan.target);

    // Live mode: one feed per camera, each requesting and decoding its own
    // stream.  Playback mode: the recording is requested over the control
    // channel and the video channel's frames are only logged.
    let (_feeds, _frames, _controller) = match plan.playback {
        None => {
            let feeds: Vec<CameraFeed> = plan
                .cameras
                .iter()
                .map(|&camera_id| {
                    CameraFeed::attach(
                        &session,
                        camera_id,
                        Box::new(ProbeBackend),
                        Box::new(LogSink::default()),
                    )
                })
                .collect();
            (feeds, None, None)
        }
        Some(playback) => {
            let frames = session.subscribe_frames(|bytes| {
                debug!(bytes = bytes.len(), "recorded frame");
            });
            let mut controller = PlaybackController::new(session.clone());
            controller
                .open(plan.cameras, playback.start, playback.duration_secs)
                .context("opening recording")?;
            if let Some(speed) = playback.speed {
                controller
                    .set_speed(speed)
                    .context("setting playback speed")?;
            }
            (Vec::new(), Some(frames), Some(controller))
        }
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("received Ctrl+C, disconnecting");

    session.disconnect();
    // Give the writer tasks a moment to flush their close frames.
    tokio::time::sleep(Duration::from_millis(200)).await;

    info!("VMS viewer stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["vms-viewer"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("arguments should parse")
    }

    fn settings_with_server() -> ViewerSettings {
        ViewerSettings::from_toml(
            r#"
            cameras = [9]

            [server]
            ip = "172.16.4.20"
            port = 5100
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_cli_defaults() {
        let cli = parse(&[]);
        assert!(cli.config.is_none());
        assert!(cli.cameras.is_empty());
        assert!(cli.start.is_none());
        assert_eq!(cli.duration, 60);
    }

    #[test]
    fn test_cameras_accept_repeats_and_commas() {
        let cli = parse(&["--camera", "1,2", "--camera", "7"]);
        assert_eq!(cli.cameras, vec![1, 2, 7]);
    }

    #[test]
    fn test_speed_and_start_parse() {
        let cli = parse(&["--start", "2024-05-06T12:00:00+02:00", "--speed", "4x"]);
        assert_eq!(cli.speed, Some(PlaybackSpeed::X4));
        assert_eq!(
            cli.start,
            Some(Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_invalid_start_is_rejected() {
        let result = Cli::try_parse_from(["vms-viewer", "--start", "noon"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_speed_is_rejected() {
        let result = Cli::try_parse_from(["vms-viewer", "--speed", "3x"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_plan_falls_back_to_settings() {
        // Arrange
        let cli = parse(&[]);

        // Act
        let plan = cli.into_plan(settings_with_server()).unwrap();

        // Assert
        assert_eq!(plan.target, ServerTarget::new("172.16.4.20", 5100));
        assert_eq!(plan.cameras, vec![9]);
        assert_eq!(plan.config, ViewerConfig::default());
        assert!(plan.playback.is_none());
    }

    #[test]
    fn test_cli_overrides_settings() {
        // Arrange
        let cli = parse(&[
            "--gateway-host",
            "10.0.0.2",
            "--gateway-port",
            "9000",
            "--server-ip",
            "192.168.1.50",
            "--camera",
            "3",
        ]);

        // Act
        let plan = cli.into_plan(settings_with_server()).unwrap();

        // Assert
        assert_eq!(plan.config.gateway_host, "10.0.0.2");
        assert_eq!(plan.config.gateway_port, 9000);
        assert_eq!(plan.target, ServerTarget::new("192.168.1.50", 5100));
        assert_eq!(plan.cameras, vec![3]);
    }

    #[test]
    fn test_start_switches_to_playback() {
        let cli = parse(&[
            "--start",
            "2024-05-06T12:00:00Z",
            "--duration",
            "300",
            "--speed",
            "max",
        ]);

        let plan = cli.into_plan(settings_with_server()).unwrap();

        assert_eq!(
            plan.playback,
            Some(PlaybackPlan {
                start: Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap(),
                duration_secs: 300,
                speed: Some(PlaybackSpeed::Max),
            })
        );
    }

    #[test]
    fn test_missing_server_is_an_error() {
        let cli = parse(&["--camera", "1"]);
        let result = cli.into_plan(ViewerSettings::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_cameras_is_an_error() {
        let cli = parse(&["--server-ip", "10.0.0.5", "--server-port", "5100"]);
        let result = cli.into_plan(ViewerSettings::default());
        assert!(result.is_err());
    }
}
