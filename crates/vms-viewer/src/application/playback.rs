//! Transport controls for recorded video.
//!
//! [`PlaybackController`] keeps the state behind the viewer's live/playback
//! toggle, play/pause button, speed selector and seek field, and turns user
//! actions into control-channel requests.
//!
//! The session engine defers a control request until the channel is ready,
//! but it keeps only the latest one.  A speed change or play/stop issued
//! right after [`PlaybackController::open`] would replace the `playbackInfo`
//! still waiting for readiness, so the controller holds those commands itself
//! until the control channel reports ready and sends them after the
//! recording request.
//!
//! Seeking re-opens the recorded stream at the new start time with the same
//! cameras and duration.  The server has no dedicated seek command.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};
use vms_core::{CameraId, Endpoint, PlaybackControlType, PlaybackSpeed};

use crate::application::session_manager::{SessionManager, WeakSessionManager};
use crate::application::subscribers::Subscription;
use crate::domain::{SessionEvent, CLIENT_DISCONNECT_REASON};

/// Errors from playback operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaybackControllerError {
    /// The command only makes sense for recorded video.
    #[error("not in playback mode")]
    NotInPlayback,

    /// Seek was requested before any recording was opened.
    #[error("no recording selected")]
    NothingSelected,

    /// The seek target could not be parsed.
    #[error("invalid timestamp {0:?}: expected RFC 3339")]
    InvalidTimestamp(String),

    #[error("no cameras selected")]
    NoCameras,
}

/// Live view or recorded playback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViewMode {
    #[default]
    Live,
    Playback,
}

/// The recording currently open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSelection {
    pub camera_ids: Vec<CameraId>,
    pub start_time: DateTime<Utc>,
    pub duration_secs: u32,
}

/// Transport commands waiting for an unsent `playbackInfo`.
#[derive(Debug, Default)]
struct HeldCommands {
    /// A recording request is queued behind control-channel readiness.
    awaiting_open: bool,
    speed: Option<PlaybackSpeed>,
    play: Option<PlaybackControlType>,
}

impl HeldCommands {
    fn take(&mut self) -> (Option<PlaybackSpeed>, Option<PlaybackControlType>) {
        self.awaiting_open = false;
        (self.speed.take(), self.play.take())
    }
}

fn lock(held: &Mutex<HeldCommands>) -> MutexGuard<'_, HeldCommands> {
    held.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct PlaybackController {
    session: SessionManager,
    mode: ViewMode,
    playing: bool,
    speed: PlaybackSpeed,
    selection: Option<PlaybackSelection>,
    held: Arc<Mutex<HeldCommands>>,
    _events: Subscription,
}

impl PlaybackController {
    pub fn new(session: SessionManager) -> Self {
        let held = Arc::new(Mutex::new(HeldCommands::default()));
        let events = {
            let held = Arc::clone(&held);
            let weak = session.downgrade();
            session.subscribe(move |event| on_event(&held, &weak, event))
        };
        Self {
            session,
            mode: ViewMode::Live,
            playing: false,
            speed: PlaybackSpeed::default(),
            selection: None,
            held,
            _events: events,
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn speed(&self) -> PlaybackSpeed {
        self.speed
    }

    pub fn selection(&self) -> Option<&PlaybackSelection> {
        self.selection.as_ref()
    }

    /// Flips between live and playback mode.  Leaving playback stops the
    /// local play state; it does not send anything.
    pub fn toggle_mode(&mut self) -> ViewMode {
        self.mode = match self.mode {
            ViewMode::Live => ViewMode::Playback,
            ViewMode::Playback => {
                self.playing = false;
                ViewMode::Live
            }
        };
        self.mode
    }

    /// Opens a recording and switches to playback mode.
    ///
    /// # Errors
    ///
    /// [`PlaybackControllerError::NoCameras`] when `camera_ids` is empty.
    pub fn open(
        &mut self,
        camera_ids: Vec<CameraId>,
        start_time: DateTime<Utc>,
        duration_secs: u32,
    ) -> Result<(), PlaybackControllerError> {
        if camera_ids.is_empty() {
            return Err(PlaybackControllerError::NoCameras);
        }
        self.mode = ViewMode::Playback;
        self.playing = true;
        self.request_recording(camera_ids.clone(), start_time, duration_secs);
        info!(cameras = ?camera_ids, %start_time, duration_secs, "playback requested");
        self.selection = Some(PlaybackSelection {
            camera_ids,
            start_time,
            duration_secs,
        });
        Ok(())
    }

    /// Play when paused, stop when playing.  Returns the command sent.
    ///
    /// # Errors
    ///
    /// [`PlaybackControllerError::NotInPlayback`] in live mode.
    pub fn toggle_play(&mut self) -> Result<PlaybackControlType, PlaybackControllerError> {
        self.require_playback()?;
        let command = if self.playing {
            PlaybackControlType::Stop
        } else {
            PlaybackControlType::Play
        };
        self.issue(|held| held.play = Some(command), command, None);
        self.playing = !self.playing;
        Ok(command)
    }

    /// Changes the playback rate.
    ///
    /// # Errors
    ///
    /// [`PlaybackControllerError::NotInPlayback`] in live mode.
    pub fn set_speed(&mut self, speed: PlaybackSpeed) -> Result<(), PlaybackControllerError> {
        self.require_playback()?;
        self.issue(
            |held| held.speed = Some(speed),
            PlaybackControlType::Speed,
            Some(speed),
        );
        self.speed = speed;
        Ok(())
    }

    /// Re-opens the current recording at `start_time`.
    ///
    /// # Errors
    ///
    /// `NotInPlayback` in live mode, `NothingSelected` before [`open`].
    ///
    /// [`open`]: PlaybackController::open
    pub fn seek(&mut self, start_time: DateTime<Utc>) -> Result<(), PlaybackControllerError> {
        self.require_playback()?;
        let selection = self
            .selection
            .as_mut()
            .ok_or(PlaybackControllerError::NothingSelected)?;
        selection.start_time = start_time;
        let (camera_ids, duration_secs) = (selection.camera_ids.clone(), selection.duration_secs);
        self.request_recording(camera_ids, start_time, duration_secs);
        info!(%start_time, "seek");
        Ok(())
    }

    /// [`seek`](PlaybackController::seek) with an RFC 3339 timestamp string.
    pub fn seek_to(&mut self, timestamp: &str) -> Result<(), PlaybackControllerError> {
        let start_time = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|_| PlaybackControllerError::InvalidTimestamp(timestamp.to_string()))?
            .with_timezone(&Utc);
        self.seek(start_time)
    }

    /// `true` while transport commands are held behind an unsent recording
    /// request.
    pub fn has_held_commands(&self) -> bool {
        let held = lock(&self.held);
        held.speed.is_some() || held.play.is_some()
    }

    /// Sends `playbackInfo`, remembering whether it has to wait for the
    /// control channel to become ready.
    fn request_recording(
        &self,
        camera_ids: Vec<CameraId>,
        start_time: DateTime<Utc>,
        duration_secs: u32,
    ) {
        // Lock first so a Ready handled concurrently sees the flag.
        let mut held = lock(&self.held);
        held.awaiting_open = !self.session.is_ready(Endpoint::Control);
        self.session
            .request_playback(camera_ids, start_time, duration_secs);
    }

    /// Sends a transport command now, or records it with `hold` while the
    /// recording request is still waiting.
    fn issue(
        &self,
        hold: impl FnOnce(&mut HeldCommands),
        control_type: PlaybackControlType,
        speed: Option<PlaybackSpeed>,
    ) {
        let mut held = lock(&self.held);
        if held.awaiting_open {
            debug!(?control_type, "recording not requested yet; holding command");
            hold(&mut *held);
        } else {
            self.session.send_playback_control(control_type, speed);
        }
    }

    fn require_playback(&self) -> Result<(), PlaybackControllerError> {
        match self.mode {
            ViewMode::Playback => Ok(()),
            ViewMode::Live => Err(PlaybackControllerError::NotInPlayback),
        }
    }
}

fn on_event(held: &Mutex<HeldCommands>, session: &WeakSessionManager, event: &SessionEvent) {
    if event.endpoint() != Endpoint::Control {
        return;
    }
    match event {
        // The engine flushes its deferred playbackInfo before announcing
        // readiness, so held commands now queue behind it.
        SessionEvent::Ready { .. } => {
            let mut held = lock(held);
            let (speed, play) = held.take();
            let Some(session) = session.upgrade() else {
                return;
            };
            if let Some(speed) = speed {
                session.send_playback_control(PlaybackControlType::Speed, Some(speed));
            }
            if let Some(play) = play {
                session.send_playback_control(play, None);
            }
        }
        // A caller disconnect drops the engine's deferred request too.
        SessionEvent::ChannelClosed { reason, .. } if reason == CLIENT_DISCONNECT_REASON => {
            lock(held).take();
        }
        _ => {}
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ViewerConfig;
    use crate::infrastructure::mock_transport::{MockConnector, MockGateway, MockServer};
    use chrono::TimeZone;
    use std::time::Duration;
    use vms_core::{Endpoint, ServerTarget};

    async fn ready_control() -> (PlaybackController, MockGateway, MockServer) {
        let (connector, mut gateway) = MockConnector::new();
        let session = SessionManager::new(ViewerConfig::default(), connector);
        let mut status = session.watch_status(Endpoint::Control);
        session.connect_control(ServerTarget::new("10.0.0.5", 5100));
        let mut server = gateway.accept(Endpoint::Control).await.unwrap();
        let _connect = server.recv_json().await;
        server.send_ready(1);
        status.wait_for(|s| s.is_ready()).await.unwrap();
        (PlaybackController::new(session), gateway, server)
    }

    /// Control channel open but not yet ready, with the controller attached
    /// before the channel connects.
    async fn unready_control() -> (PlaybackController, SessionManager, MockGateway, MockServer) {
        let (connector, mut gateway) = MockConnector::new();
        let session = SessionManager::new(ViewerConfig::default(), connector);
        let controller = PlaybackController::new(session.clone());
        let mut status = session.watch_status(Endpoint::Control);
        session.connect_control(ServerTarget::new("10.0.0.5", 5100));
        let mut server = gateway.accept(Endpoint::Control).await.unwrap();
        let _connect = server.recv_json().await;
        status.wait_for(|s| s.is_open()).await.unwrap();
        (controller, session, gateway, server)
    }

    async fn next_json(server: &mut MockServer) -> serde_json::Value {
        tokio::time::timeout(Duration::from_secs(5), server.recv_json())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_commands_refused_in_live_mode() {
        let (mut controller, _gateway, mut server) = ready_control().await;

        assert_eq!(
            controller.toggle_play(),
            Err(PlaybackControllerError::NotInPlayback)
        );
        assert_eq!(
            controller.set_speed(PlaybackSpeed::X2),
            Err(PlaybackControllerError::NotInPlayback)
        );
        assert!(server.drain().is_empty());
    }

    #[tokio::test]
    async fn test_open_then_toggle_sends_stop_then_play() {
        // Arrange
        let (mut controller, _gateway, mut server) = ready_control().await;

        // Act
        controller.open(vec![3], start(), 120).unwrap();
        let first = controller.toggle_play().unwrap();
        let second = controller.toggle_play().unwrap();

        // Assert
        assert_eq!(first, PlaybackControlType::Stop);
        assert_eq!(second, PlaybackControlType::Play);
        let info = next_json(&mut server).await;
        assert_eq!(info["type"], "playbackInfo");
        assert_eq!(info["cameraIds"], serde_json::json!([3]));
        assert_eq!(info["duration"], 120);
        let stop = next_json(&mut server).await;
        assert_eq!(stop["controlType"], PlaybackControlType::Stop.wire_code());
        let play = next_json(&mut server).await;
        assert_eq!(play["controlType"], PlaybackControlType::Play.wire_code());
        assert!(controller.is_playing());
    }

    #[tokio::test]
    async fn test_speed_change_carries_wire_code() {
        let (mut controller, _gateway, mut server) = ready_control().await;
        controller.open(vec![1], start(), 60).unwrap();
        let _info = next_json(&mut server).await;

        controller.set_speed(PlaybackSpeed::X8).unwrap();

        let command = next_json(&mut server).await;
        assert_eq!(command["controlType"], PlaybackControlType::Speed.wire_code());
        assert_eq!(command["speed"], PlaybackSpeed::X8.wire_code());
        assert_eq!(controller.speed(), PlaybackSpeed::X8);
    }

    #[tokio::test]
    async fn test_seek_reissues_playback_info_with_same_selection() {
        // Arrange
        let (mut controller, _gateway, mut server) = ready_control().await;
        controller.open(vec![4, 5], start(), 300).unwrap();
        let _info = next_json(&mut server).await;

        // Act
        controller.seek_to("2024-05-06T12:30:00Z").unwrap();

        // Assert
        let seek = next_json(&mut server).await;
        assert_eq!(seek["type"], "playbackInfo");
        assert_eq!(seek["startTime"], "2024-05-06T12:30:00.000Z");
        assert_eq!(seek["cameraIds"], serde_json::json!([4, 5]));
        assert_eq!(seek["duration"], 300);
    }

    #[tokio::test]
    async fn test_seek_errors() {
        let (mut controller, _gateway, _server) = ready_control().await;
        controller.toggle_mode();

        assert_eq!(
            controller.seek(start()),
            Err(PlaybackControllerError::NothingSelected)
        );
        assert!(matches!(
            controller.seek_to("yesterday"),
            Err(PlaybackControllerError::InvalidTimestamp(_))
        ));
    }

    #[tokio::test]
    async fn test_leaving_playback_resets_play_state() {
        let (mut controller, _gateway, _server) = ready_control().await;
        controller.open(vec![1], start(), 60).unwrap();
        assert!(controller.is_playing());

        assert_eq!(controller.toggle_mode(), ViewMode::Live);

        assert!(!controller.is_playing());
        assert_eq!(controller.open(vec![], start(), 60), Err(PlaybackControllerError::NoCameras));
    }

    #[tokio::test]
    async fn test_speed_before_ready_follows_recording_request() {
        // Arrange
        let (mut controller, _session, _gateway, mut server) = unready_control().await;

        // Act: open and change speed before the gateway is ready
        controller.open(vec![3], start(), 60).unwrap();
        controller.set_speed(PlaybackSpeed::X4).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let before_ready = server.drain_json();
        server.send_ready(7);

        // Assert: the recording request goes first, then the speed
        assert!(before_ready.is_empty());
        let info = next_json(&mut server).await;
        assert_eq!(info["type"], "playbackInfo");
        assert_eq!(info["cameraIds"], serde_json::json!([3]));
        let speed = next_json(&mut server).await;
        assert_eq!(speed["type"], "playbackControl");
        assert_eq!(speed["controlType"], PlaybackControlType::Speed.wire_code());
        assert_eq!(speed["speed"], PlaybackSpeed::X4.wire_code());
        assert!(!controller.has_held_commands());
    }

    #[tokio::test]
    async fn test_held_commands_keep_latest_of_each_kind() {
        let (mut controller, _session, _gateway, mut server) = unready_control().await;

        controller.open(vec![1], start(), 60).unwrap();
        controller.set_speed(PlaybackSpeed::X2).unwrap();
        controller.set_speed(PlaybackSpeed::X8).unwrap();
        controller.toggle_play().unwrap();
        assert!(controller.has_held_commands());
        server.send_ready(7);

        assert_eq!(next_json(&mut server).await["type"], "playbackInfo");
        let speed = next_json(&mut server).await;
        assert_eq!(speed["speed"], PlaybackSpeed::X8.wire_code());
        let stop = next_json(&mut server).await;
        assert_eq!(stop["controlType"], PlaybackControlType::Stop.wire_code());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(server.drain_json().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_forgets_held_commands() {
        // Arrange
        let (mut controller, session, _gateway, _server) = unready_control().await;
        let (closed_tx, mut closed_rx) = tokio::sync::mpsc::unbounded_channel();
        let _closed = session.subscribe(move |event| {
            if let SessionEvent::ChannelClosed { endpoint, .. } = event {
                let _ = closed_tx.send(*endpoint);
            }
        });
        controller.open(vec![1], start(), 60).unwrap();
        controller.set_speed(PlaybackSpeed::X2).unwrap();

        // Act
        session.disconnect();

        // Assert: the controller's handler ran before this later subscriber
        assert_eq!(closed_rx.recv().await, Some(Endpoint::Control));
        assert!(!controller.has_held_commands());
    }
}
