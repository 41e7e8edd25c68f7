//! Session manager: the single entry point UI code talks to.
//!
//! [`SessionManager`] owns both gateway channels, fans server events out to
//! subscribers, and coordinates requests that arrive before a channel is
//! ready.  It is an explicit instance (construct one and clone the handle),
//! not a process-wide singleton.
//!
//! # Concurrency model
//!
//! All engine state lives in one actor task.  Handle methods are synchronous
//! and non-blocking: they push a [`Command`] into the actor's mailbox and
//! return.  Transport I/O, retry timers and the health-check ticker are
//! separate tasks that post notices back into the actor, so every state
//! transition happens on one task, one message at a time.
//!
//! ```text
//!  SessionManager ──Command──▶ ┌──────────────┐ ──SessionEvent──▶ subscribers
//!  (any clone)                 │ SessionActor │ ──&[u8] frames──▶ frame subscribers
//!  I/O tasks, timers ─Notice─▶ │ video/control│ ──ChannelState──▶ watch receivers
//!                              └──────────────┘
//! ```
//!
//! # Deferred requests
//!
//! * Video: the last requested camera set is kept until it has actually been
//!   transmitted.  It goes out immediately when the channel is ready,
//!   otherwise exactly once when `connectionReady` arrives.  Asking for video
//!   on a closed channel starts a connect first.
//! * Control: one [`ControlIntent`] slot, last-write-wins, sent exactly once
//!   on the next `connectionReady` and then cleared.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use vms_core::{
    CameraId, ClientMessage, Endpoint, PlaybackControlType, PlaybackSpeed, ServerMessage,
    ServerTarget,
};

use crate::application::channel::{Channel, ChannelNotice, ChannelSignal};
use crate::application::subscribers::{Registry, Subscription};
use crate::application::transport::Connector;
use crate::domain::{
    ChannelState, SessionEvent, ViewerConfig, CLIENT_DISCONNECT_REASON, CLOSE_NORMAL,
};

/// Message published when the transport itself reports a failure.
pub const TRANSPORT_ERROR_MESSAGE: &str = "WebSocket error";

/// A control-channel request waiting for readiness.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlIntent {
    /// Open a recorded stream.
    Playback {
        camera_ids: Vec<CameraId>,
        start_time: DateTime<Utc>,
        duration_secs: u32,
    },
    /// Play, stop or change speed of the current recorded stream.
    Control {
        control_type: PlaybackControlType,
        speed: Option<PlaybackSpeed>,
    },
}

impl ControlIntent {
    /// Builds the envelope for this intent addressed to `target`.
    pub fn to_message(&self, target: &ServerTarget) -> ClientMessage {
        match self {
            ControlIntent::Playback {
                camera_ids,
                start_time,
                duration_secs,
            } => ClientMessage::playback_info(camera_ids.clone(), *start_time, *duration_secs, target),
            ControlIntent::Control {
                control_type,
                speed,
            } => ClientMessage::playback_control(*control_type, *speed, target),
        }
    }
}

#[derive(Debug)]
enum Command {
    Connect {
        endpoint: Endpoint,
        target: ServerTarget,
    },
    Disconnect,
    RequestLive {
        camera_ids: Vec<CameraId>,
    },
    Control(ControlIntent),
    HealthCheck,
    Shutdown,
}

// ── Handle ────────────────────────────────────────────────────────────────────

struct Inner {
    commands: mpsc::UnboundedSender<Command>,
    events: Registry<SessionEvent>,
    frames: Registry<[u8]>,
    video_status: watch::Receiver<ChannelState>,
    control_status: watch::Receiver<ChannelState>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Cloneable handle to the session engine.
///
/// The engine shuts down (closing both channels) when the last clone is
/// dropped.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

/// Non-owning handle, for subscribers that need to call back into the engine
/// without keeping it alive.
#[derive(Clone, Default)]
pub struct WeakSessionManager {
    inner: Weak<Inner>,
}

impl WeakSessionManager {
    pub fn upgrade(&self) -> Option<SessionManager> {
        self.inner.upgrade().map(|inner| SessionManager { inner })
    }
}

impl SessionManager {
    /// Starts the engine.  Must be called from within a Tokio runtime.
    pub fn new(config: ViewerConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();

        let (video, video_status) = Channel::new(
            Endpoint::Video,
            config.endpoint_url(Endpoint::Video),
            notices_tx.clone(),
        );
        let (control, control_status) = Channel::new(
            Endpoint::Control,
            config.endpoint_url(Endpoint::Control),
            notices_tx,
        );

        let events = Registry::new();
        let frames = Registry::new();
        let last_error = Arc::new(Mutex::new(None));

        let actor = SessionActor {
            config,
            connector,
            video,
            control,
            pending_cameras: None,
            pending_control: None,
            monitor: None,
            commands: commands_tx.clone(),
            events: events.clone(),
            frames: frames.clone(),
            last_error: Arc::clone(&last_error),
        };
        tokio::spawn(actor.run(commands_rx, notices_rx));

        Self {
            inner: Arc::new(Inner {
                commands: commands_tx,
                events,
                frames,
                video_status,
                control_status,
                last_error,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakSessionManager {
        WeakSessionManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn post(&self, command: Command) {
        if self.inner.commands.send(command).is_err() {
            debug!("session engine has stopped; dropping command");
        }
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// Opens (or re-opens) the video channel to `target`.
    ///
    /// Ignored while a video connect is already in flight.  Resets the
    /// channel's reconnect budget.
    pub fn connect_video(&self, target: ServerTarget) {
        self.connect(Endpoint::Video, target);
    }

    /// Opens (or re-opens) the control channel to `target`.
    pub fn connect_control(&self, target: ServerTarget) {
        self.connect(Endpoint::Control, target);
    }

    pub fn connect(&self, endpoint: Endpoint, target: ServerTarget) {
        self.post(Command::Connect { endpoint, target });
    }

    /// Closes both channels, cancels every timer and forgets deferred
    /// requests.  Emits `ChannelClosed { code: 1000 }` for each channel that
    /// was live.
    pub fn disconnect(&self) {
        self.post(Command::Disconnect);
    }

    /// Requests live video for `camera_ids`, replacing any earlier request.
    pub fn request_live_video(&self, camera_ids: Vec<CameraId>) {
        self.post(Command::RequestLive { camera_ids });
    }

    /// Requests a recorded stream.  Starts a control connect if needed.
    pub fn request_playback(
        &self,
        camera_ids: Vec<CameraId>,
        start_time: DateTime<Utc>,
        duration_secs: u32,
    ) {
        self.post(Command::Control(ControlIntent::Playback {
            camera_ids,
            start_time,
            duration_secs,
        }));
    }

    /// Sends a playback command, or keeps it for the next readiness if the
    /// control channel is not ready.
    pub fn send_playback_control(
        &self,
        control_type: PlaybackControlType,
        speed: Option<PlaybackSpeed>,
    ) {
        self.post(Command::Control(ControlIntent::Control {
            control_type,
            speed,
        }));
    }

    // ── Observation ───────────────────────────────────────────────────────────

    /// Registers a handler for every [`SessionEvent`].
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    /// Registers a handler for raw binary frames from the video channel.
    pub fn subscribe_frames<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.inner.frames.subscribe(handler)
    }

    /// Current lifecycle state of `endpoint`.
    pub fn status(&self, endpoint: Endpoint) -> ChannelState {
        *self.status_receiver(endpoint).borrow()
    }

    pub fn is_ready(&self, endpoint: Endpoint) -> bool {
        self.status(endpoint).is_ready()
    }

    /// A receiver that observes every state change of `endpoint`.
    pub fn watch_status(&self, endpoint: Endpoint) -> watch::Receiver<ChannelState> {
        self.status_receiver(endpoint).clone()
    }

    fn status_receiver(&self, endpoint: Endpoint) -> &watch::Receiver<ChannelState> {
        match endpoint {
            Endpoint::Video => &self.inner.video_status,
            Endpoint::Control => &self.inner.control_status,
        }
    }

    /// Most recent error reported by the gateway or the transport, cleared
    /// when a channel becomes ready.
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ── Actor ─────────────────────────────────────────────────────────────────────

struct SessionActor {
    config: ViewerConfig,
    connector: Arc<dyn Connector>,
    video: Channel,
    control: Channel,
    pending_cameras: Option<Vec<CameraId>>,
    pending_control: Option<ControlIntent>,
    monitor: Option<JoinHandle<()>>,
    commands: mpsc::UnboundedSender<Command>,
    events: Registry<SessionEvent>,
    frames: Registry<[u8]>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut notices: mpsc::UnboundedReceiver<ChannelNotice>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(notice) = notices.recv() => self.handle_notice(notice),
            }
        }
        self.disconnect();
        debug!("session engine stopped");
    }

    fn channel_mut(&mut self, endpoint: Endpoint) -> &mut Channel {
        match endpoint {
            Endpoint::Video => &mut self.video,
            Endpoint::Control => &mut self.control,
        }
    }

    fn emit(&self, event: SessionEvent) {
        trace!(?event, "emit");
        self.events.notify(&event);
    }

    fn set_last_error(&self, error: Option<String>) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { endpoint, target } => self.connect(endpoint, target),
            Command::Disconnect => self.disconnect(),
            Command::RequestLive { camera_ids } => self.request_live(camera_ids),
            Command::Control(intent) => self.request_control(intent),
            Command::HealthCheck => self.health_check(),
            Command::Shutdown => {}
        }
    }

    fn handle_notice(&mut self, notice: ChannelNotice) {
        match notice {
            ChannelNotice::Link {
                endpoint,
                generation,
                event,
            } => {
                if let Some(signal) = self.channel_mut(endpoint).handle_link_event(generation, event) {
                    self.on_signal(endpoint, signal);
                }
            }
            ChannelNotice::RetryDue { endpoint, token } => self.retry_due(endpoint, token),
        }
    }

    // ── Connection management ─────────────────────────────────────────────────

    fn connect(&mut self, endpoint: Endpoint, target: ServerTarget) {
        let connector = Arc::clone(&self.connector);
        let channel = self.channel_mut(endpoint);
        if channel.is_connecting() {
            debug!(endpoint = %endpoint, "already connecting; ignoring duplicate connect");
            return;
        }
        channel.cancel_retry();
        channel.reset_attempts();
        channel.set_target(target);
        if channel.connect(connector) {
            self.ensure_monitor();
        }
    }

    /// Connect triggered by a request on a closed channel.  Does not reset the
    /// reconnect budget.
    fn connect_for_request(&mut self, endpoint: Endpoint) {
        let policy = self.config.reconnect;
        let connector = Arc::clone(&self.connector);
        let channel = self.channel_mut(endpoint);

        if channel.is_connecting() || channel.retry_pending() {
            debug!(endpoint = %endpoint, "connection in progress; request will follow readiness");
            return;
        }
        if channel.target().is_none() {
            warn!(endpoint = %endpoint, "no server target yet; request kept until connected");
            return;
        }
        if channel.is_exhausted(&policy) {
            warn!(endpoint = %endpoint, "reconnect attempts exhausted; request kept until reconnected");
            return;
        }

        info!(endpoint = %endpoint, "channel not connected; connecting before sending request");
        if channel.connect(connector) {
            self.ensure_monitor();
        }
    }

    fn disconnect(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        self.pending_cameras = None;
        self.pending_control = None;

        for endpoint in Endpoint::ALL {
            if self.channel_mut(endpoint).close() {
                self.emit(SessionEvent::ChannelClosed {
                    endpoint,
                    code: CLOSE_NORMAL,
                    reason: CLIENT_DISCONNECT_REASON.to_string(),
                });
            }
        }
        info!("session disconnected");
    }

    fn schedule_reconnect(&mut self, endpoint: Endpoint) {
        let policy = self.config.reconnect;
        let channel = self.channel_mut(endpoint);
        match channel.schedule_retry(&policy) {
            Some(delay) => info!(
                endpoint = %endpoint,
                attempt = channel.attempts(),
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect"
            ),
            None => warn!(
                endpoint = %endpoint,
                "max reconnect attempts reached; staying closed until reconnected explicitly"
            ),
        }
    }

    fn retry_due(&mut self, endpoint: Endpoint, token: u64) {
        let connector = Arc::clone(&self.connector);
        let channel = self.channel_mut(endpoint);
        if !channel.claim_retry(token) {
            trace!(endpoint = %endpoint, "ignoring cancelled retry");
            return;
        }
        let state = channel.state();
        if state.is_open() || channel.is_connecting() {
            debug!(endpoint = %endpoint, ?state, "already connected; skipping retry");
            return;
        }
        info!(endpoint = %endpoint, attempt = channel.attempts(), "reconnecting");
        channel.connect(connector);
    }

    fn ensure_monitor(&mut self) {
        if self.monitor.is_some() {
            return;
        }
        let period = self.config.health_check_interval;
        let commands = self.commands.clone();
        self.monitor = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if commands.send(Command::HealthCheck).is_err() {
                    break;
                }
            }
        }));
    }

    /// Safety net: reconnects channels that are closed with nothing scheduled
    /// to revive them.
    fn health_check(&mut self) {
        if self.monitor.is_none() {
            return;
        }
        let policy = self.config.reconnect;
        for endpoint in Endpoint::ALL {
            let connector = Arc::clone(&self.connector);
            let channel = self.channel_mut(endpoint);
            let stranded = channel.target().is_some()
                && channel.state().is_closed()
                && !channel.retry_pending()
                && !channel.is_exhausted(&policy);
            if stranded {
                warn!(endpoint = %endpoint, "health check found channel closed; reconnecting");
                channel.connect(connector);
            }
        }
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    fn request_live(&mut self, camera_ids: Vec<CameraId>) {
        self.pending_cameras = Some(camera_ids);
        let state = self.video.state();
        if state.is_ready() {
            self.flush_video();
        } else if state.is_open() {
            debug!(endpoint = %Endpoint::Video, "not ready; live request deferred until connectionReady");
        } else {
            self.connect_for_request(Endpoint::Video);
        }
    }

    fn request_control(&mut self, intent: ControlIntent) {
        let connects = matches!(intent, ControlIntent::Playback { .. });
        self.pending_control = Some(intent);
        let state = self.control.state();
        if state.is_ready() {
            self.flush_control();
        } else if state.is_open() {
            info!(endpoint = %Endpoint::Control, "not ready; request deferred until connectionReady");
        } else if connects {
            self.connect_for_request(Endpoint::Control);
        } else {
            warn!(endpoint = %Endpoint::Control, "not connected; playback command deferred");
        }
    }

    fn flush_video(&mut self) {
        let Some(camera_ids) = self.pending_cameras.take() else {
            return;
        };
        let Some(target) = self.video.target() else {
            self.pending_cameras = Some(camera_ids);
            return;
        };
        let message = ClientMessage::live_info(camera_ids.clone(), target);
        match self.video.send_payload(&message) {
            Ok(()) => info!(endpoint = %Endpoint::Video, cameras = ?camera_ids, "live video requested"),
            Err(e) => {
                warn!(endpoint = %Endpoint::Video, error = %e, "live request not sent; keeping it");
                self.pending_cameras = Some(camera_ids);
            }
        }
    }

    fn flush_control(&mut self) {
        let Some(intent) = self.pending_control.take() else {
            return;
        };
        let Some(target) = self.control.target() else {
            self.pending_control = Some(intent);
            return;
        };
        let message = intent.to_message(target);
        match self.control.send_payload(&message) {
            Ok(()) => info!(endpoint = %Endpoint::Control, kind = message.type_name(), "control request sent"),
            Err(e) => {
                warn!(endpoint = %Endpoint::Control, error = %e, "control request not sent; keeping it");
                self.pending_control = Some(intent);
            }
        }
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    fn on_signal(&mut self, endpoint: Endpoint, signal: ChannelSignal) {
        match signal {
            ChannelSignal::Opened => self.emit(SessionEvent::ChannelOpened { endpoint }),
            ChannelSignal::Ready { client_key } => {
                self.set_last_error(None);
                match endpoint {
                    Endpoint::Video => self.flush_video(),
                    Endpoint::Control => self.flush_control(),
                }
                self.emit(SessionEvent::Ready {
                    endpoint,
                    client_key,
                });
            }
            ChannelSignal::Message(ServerMessage::Connection { connected }) => {
                info!(endpoint = %endpoint, connected, "gateway upstream connection changed");
                self.emit(SessionEvent::ServerConnection {
                    endpoint,
                    connected,
                });
            }
            ChannelSignal::Message(ServerMessage::Error { message }) => {
                warn!(endpoint = %endpoint, message = %message, "gateway reported an error");
                self.set_last_error(Some(message.clone()));
                self.emit(SessionEvent::Error { endpoint, message });
            }
            ChannelSignal::Message(ServerMessage::LiveData(data)) => {
                self.emit(SessionEvent::LiveData { endpoint, data });
            }
            ChannelSignal::Message(other) => {
                debug!(endpoint = %endpoint, kind = other.type_name(), "unhandled message");
            }
            ChannelSignal::Binary(bytes) => match endpoint {
                Endpoint::Video => self.frames.notify(&bytes[..]),
                Endpoint::Control => {
                    debug!(endpoint = %endpoint, len = bytes.len(), "dropping binary frame");
                }
            },
            ChannelSignal::Error(reason) => {
                warn!(endpoint = %endpoint, reason = %reason, "transport error");
                self.set_last_error(Some(TRANSPORT_ERROR_MESSAGE.to_string()));
                self.emit(SessionEvent::Error {
                    endpoint,
                    message: TRANSPORT_ERROR_MESSAGE.to_string(),
                });
            }
            ChannelSignal::Closed { code, reason } => {
                self.emit(SessionEvent::ChannelClosed {
                    endpoint,
                    code,
                    reason,
                });
                if code != CLOSE_NORMAL {
                    self.schedule_reconnect(endpoint);
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
