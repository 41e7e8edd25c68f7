//! One logical gateway channel (video or control).
//!
//! A [`Channel`] is owned by the session actor and never shared.  It drives
//! the lifecycle in [`ChannelState`]: connect, send the `connect` envelope as
//! soon as the transport opens, flip to `Ready` on `connectionReady`, and map
//! closure codes to a clean or error state.
//!
//! # Detaching a transport
//!
//! Each connect bumps a generation counter and the I/O task tags everything it
//! reports with the generation it was started under.  Replacing or closing a
//! transport therefore only needs to bump the counter: anything the old
//! transport still delivers is recognised as stale and ignored, so a
//! superseded transport can never trigger reconnection.
//!
//! # Reconnect timer
//!
//! At most one retry timer exists per channel.  It is a sleeping tokio task
//! that posts [`ChannelNotice::RetryDue`] with a token; cancelling the timer
//! aborts the task and invalidates the token, so a notice that was already
//! queued is ignored as well.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use vms_core::{ClientMessage, Endpoint, EnvelopeError, ServerMessage, ServerTarget};

use crate::application::transport::{Connector, TransportLink, WireMessage};
use crate::domain::{ChannelState, ReconnectPolicy, ReconnectState, CLOSE_ABNORMAL, CLOSE_NORMAL};

/// Errors returned when a message cannot be sent on a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The transport is not open.
    #[error("{0} channel is not open")]
    NotOpen(Endpoint),

    /// The transport is open but the server has not confirmed the session.
    #[error("{0} channel is not ready")]
    NotReady(Endpoint),

    /// The envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] EnvelopeError),

    /// The transport went away between the state check and the send.
    #[error("{0} transport is gone")]
    LinkClosed(Endpoint),
}

/// What a channel's I/O task observed on its transport.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    Opened(mpsc::UnboundedSender<WireMessage>),
    Text(String),
    Binary(Vec<u8>),
    Failed(String),
    Closed { code: u16, reason: String },
}

/// Everything channel-owned tasks post back to the session actor.
#[derive(Debug)]
pub(crate) enum ChannelNotice {
    Link {
        endpoint: Endpoint,
        generation: u64,
        event: TransportEvent,
    },
    RetryDue {
        endpoint: Endpoint,
        token: u64,
    },
}

/// Outcome of feeding a transport event through the state machine.
#[derive(Debug, PartialEq)]
pub(crate) enum ChannelSignal {
    Opened,
    Ready { client_key: i64 },
    Message(ServerMessage),
    Binary(Vec<u8>),
    Error(String),
    Closed { code: u16, reason: String },
}

pub(crate) struct Channel {
    endpoint: Endpoint,
    url: String,
    state: ChannelState,
    generation: u64,
    link: Option<mpsc::UnboundedSender<WireMessage>>,
    io_task: Option<JoinHandle<()>>,
    target: Option<ServerTarget>,
    reconnect: ReconnectState,
    retry: Option<JoinHandle<()>>,
    retry_token: u64,
    status: watch::Sender<ChannelState>,
    notices: mpsc::UnboundedSender<ChannelNotice>,
}

impl Channel {
    /// Creates an idle channel and the receiver half of its status watch.
    pub(crate) fn new(
        endpoint: Endpoint,
        url: String,
        notices: mpsc::UnboundedSender<ChannelNotice>,
    ) -> (Self, watch::Receiver<ChannelState>) {
        let (status, status_rx) = watch::channel(ChannelState::Idle);
        let channel = Self {
            endpoint,
            url,
            state: ChannelState::Idle,
            generation: 0,
            link: None,
            io_task: None,
            target: None,
            reconnect: ReconnectState::default(),
            retry: None,
            retry_token: 0,
            status,
            notices,
        };
        (channel, status_rx)
    }

    pub(crate) fn state(&self) -> ChannelState {
        self.state
    }

    pub(crate) fn target(&self) -> Option<&ServerTarget> {
        self.target.as_ref()
    }

    pub(crate) fn set_target(&mut self, target: ServerTarget) {
        self.target = Some(target);
    }

    pub(crate) fn is_connecting(&self) -> bool {
        self.state == ChannelState::Connecting
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Starts a transport to the channel's URL.
    ///
    /// Dropped (returns `false`) while a connect is already in flight or when
    /// no target is known.  Any existing transport is detached first.
    pub(crate) fn connect(&mut self, connector: Arc<dyn Connector>) -> bool {
        if self.is_connecting() {
            debug!(endpoint = %self.endpoint, "connect already in flight; ignoring request");
            return false;
        }
        if self.target.is_none() {
            warn!(endpoint = %self.endpoint, "cannot connect without a server target");
            return false;
        }

        self.detach();
        self.generation += 1;
        self.set_state(ChannelState::Connecting);
        info!(endpoint = %self.endpoint, url = %self.url, generation = self.generation, "connecting");

        self.io_task = Some(spawn_io(
            self.endpoint,
            self.generation,
            self.url.clone(),
            connector,
            self.notices.clone(),
        ));
        true
    }

    /// Caller-initiated close.  Cancels the retry timer, detaches the
    /// transport and leaves the channel `ClosedClean`.
    ///
    /// Returns `true` if the channel was open or connecting.
    pub(crate) fn close(&mut self) -> bool {
        self.cancel_retry();
        let was_live = self.state.is_open() || self.is_connecting();
        self.detach();
        self.generation += 1;
        if self.state != ChannelState::Idle {
            self.set_state(ChannelState::ClosedClean);
        }
        was_live
    }

    fn detach(&mut self) {
        if let Some(link) = self.link.take() {
            let _ = link.send(WireMessage::Close {
                code: CLOSE_NORMAL,
                reason: "client closing".to_string(),
            });
        }
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
    }

    fn set_state(&mut self, state: ChannelState) {
        if self.state != state {
            trace!(endpoint = %self.endpoint, from = ?self.state, to = ?state, "state change");
        }
        self.state = state;
        self.status.send_replace(state);
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    /// Sends an envelope.  Requires an open transport, and `Ready` for
    /// anything but `connect`.
    pub(crate) fn send(&self, message: &ClientMessage) -> Result<(), ChannelError> {
        let link = match (&self.link, self.state.is_open()) {
            (Some(link), true) => link,
            _ => return Err(ChannelError::NotOpen(self.endpoint)),
        };
        if message.is_payload_bearing() && !self.state.is_ready() {
            return Err(ChannelError::NotReady(self.endpoint));
        }
        let text = message.to_json()?;
        link.send(WireMessage::Text(text))
            .map_err(|_| ChannelError::LinkClosed(self.endpoint))?;
        debug!(endpoint = %self.endpoint, kind = message.type_name(), "sent");
        Ok(())
    }

    /// Sends a payload-bearing envelope.  Requires `Ready`.
    pub(crate) fn send_payload(&self, message: &ClientMessage) -> Result<(), ChannelError> {
        if !self.state.is_open() {
            return Err(ChannelError::NotOpen(self.endpoint));
        }
        if !self.state.is_ready() {
            return Err(ChannelError::NotReady(self.endpoint));
        }
        self.send(message)
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Applies one transport event.  Events from a detached transport are
    /// ignored and yield `None`.
    pub(crate) fn handle_link_event(
        &mut self,
        generation: u64,
        event: TransportEvent,
    ) -> Option<ChannelSignal> {
        if generation != self.generation {
            if let TransportEvent::Opened(stale) = event {
                let _ = stale.send(WireMessage::Close {
                    code: CLOSE_NORMAL,
                    reason: "superseded".to_string(),
                });
            }
            trace!(endpoint = %self.endpoint, generation, "ignoring event from detached transport");
            return None;
        }

        match event {
            TransportEvent::Opened(link) => {
                self.link = Some(link);
                self.set_state(ChannelState::OpenUnready);
                info!(endpoint = %self.endpoint, "transport open");
                if let Some(target) = &self.target {
                    if let Err(e) = self.send(&ClientMessage::connect(target)) {
                        warn!(endpoint = %self.endpoint, error = %e, "failed to send connect envelope");
                    }
                }
                Some(ChannelSignal::Opened)
            }
            TransportEvent::Text(text) => match ServerMessage::parse(&text) {
                Err(e) => {
                    warn!(endpoint = %self.endpoint, error = %e, "dropping malformed message");
                    None
                }
                Ok(ServerMessage::ConnectionReady {
                    connected: true,
                    client_key,
                }) => {
                    self.set_state(ChannelState::Ready);
                    info!(endpoint = %self.endpoint, client_key, "server session ready");
                    Some(ChannelSignal::Ready { client_key })
                }
                Ok(ServerMessage::ConnectionReady { connected: false, .. }) => {
                    debug!(endpoint = %self.endpoint, "connectionReady without a session; ignoring");
                    None
                }
                Ok(message) => Some(ChannelSignal::Message(message)),
            },
            TransportEvent::Binary(bytes) => Some(ChannelSignal::Binary(bytes)),
            TransportEvent::Failed(reason) => Some(ChannelSignal::Error(reason)),
            TransportEvent::Closed { code, reason } => {
                self.link = None;
                self.io_task = None;
                let state = if code == CLOSE_NORMAL {
                    ChannelState::ClosedClean
                } else {
                    ChannelState::ClosedError
                };
                self.set_state(state);
                info!(endpoint = %self.endpoint, code, reason = %reason, "transport closed");
                Some(ChannelSignal::Closed { code, reason })
            }
        }
    }

    // ── Reconnection ──────────────────────────────────────────────────────────

    pub(crate) fn reset_attempts(&mut self) {
        self.reconnect.reset();
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.reconnect.attempts()
    }

    pub(crate) fn is_exhausted(&self, policy: &ReconnectPolicy) -> bool {
        self.reconnect.is_exhausted(policy)
    }

    pub(crate) fn retry_pending(&self) -> bool {
        self.retry.is_some()
    }

    /// Schedules the next retry, replacing any pending one.  Returns the delay,
    /// or `None` once the policy's ceiling is reached.
    pub(crate) fn schedule_retry(&mut self, policy: &ReconnectPolicy) -> Option<Duration> {
        self.cancel_retry();
        let delay = self.reconnect.next_delay(policy)?;

        let endpoint = self.endpoint;
        let token = self.retry_token;
        let notices = self.notices.clone();
        self.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = notices.send(ChannelNotice::RetryDue { endpoint, token });
        }));
        Some(delay)
    }

    pub(crate) fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry.take() {
            timer.abort();
        }
        self.retry_token += 1;
    }

    /// Consumes a fired timer.  Returns `false` for a timer that was cancelled
    /// after it fired.
    pub(crate) fn claim_retry(&mut self, token: u64) -> bool {
        if token != self.retry_token || self.retry.is_none() {
            return false;
        }
        self.retry = None;
        true
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.cancel_retry();
        self.detach();
    }
}

/// Runs one transport: connect, then relay inbound frames until it closes.
fn spawn_io(
    endpoint: Endpoint,
    generation: u64,
    url: String,
    connector: Arc<dyn Connector>,
    notices: mpsc::UnboundedSender<ChannelNotice>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let post = |event: TransportEvent| {
            notices
                .send(ChannelNotice::Link {
                    endpoint,
                    generation,
                    event,
                })
                .is_ok()
        };

        let TransportLink {
            outbound,
            mut inbound,
        } = match connector.connect(&url).await {
            Ok(link) => link,
            Err(e) => {
                post(TransportEvent::Failed(e.to_string()));
                post(TransportEvent::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: e.to_string(),
                });
                return;
            }
        };
        if !post(TransportEvent::Opened(outbound)) {
            return;
        }

        while let Some(item) = inbound.recv().await {
            let event = match item {
                Ok(WireMessage::Text(text)) => TransportEvent::Text(text),
                Ok(WireMessage::Binary(bytes)) => TransportEvent::Binary(bytes),
                Ok(WireMessage::Close { code, reason }) => {
                    post(TransportEvent::Closed { code, reason });
                    return;
                }
                Err(e) => {
                    post(TransportEvent::Failed(e.to_string()));
                    post(TransportEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: e.to_string(),
                    });
                    return;
                }
            };
            if !post(event) {
                return;
            }
        }

        post(TransportEvent::Closed {
            code: CLOSE_ABNORMAL,
            reason: "transport ended without a close frame".to_string(),
        });
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
