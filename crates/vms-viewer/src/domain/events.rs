//! Channel lifecycle states and the events the engine publishes.

use vms_core::{Endpoint, LiveData};

/// Close code of a normal, intentional closure.  Any other code is abnormal
/// and puts the channel on the reconnect schedule.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close reason of the `ChannelClosed` events published by a caller
/// disconnect.
pub const CLIENT_DISCONNECT_REASON: &str = "client disconnect";

/// Close code reported when the transport failed to connect or ended without
/// a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Lifecycle of one channel.
///
/// ```text
/// Idle ──connect──▶ Connecting ──open──▶ OpenUnready ──connectionReady──▶ Ready
///                        │                    │                            │
///                        └─────── close(1000) → ClosedClean ◀──────────────┤
///                                 close(≠1000) → ClosedError ◀─────────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Never connected.
    #[default]
    Idle,
    /// A transport connect is in flight.
    Connecting,
    /// Transport open, `connect` envelope sent, server not yet ready.
    OpenUnready,
    /// Server confirmed the session; payload requests may flow.
    Ready,
    /// Closed with code 1000 or by the caller.
    ClosedClean,
    /// Closed abnormally; reconnection may be scheduled.
    ClosedError,
}

impl ChannelState {
    /// `true` while the transport is open, ready or not.
    pub fn is_open(self) -> bool {
        matches!(self, ChannelState::OpenUnready | ChannelState::Ready)
    }

    pub fn is_ready(self) -> bool {
        self == ChannelState::Ready
    }

    /// `true` for either closed state.
    pub fn is_closed(self) -> bool {
        matches!(self, ChannelState::ClosedClean | ChannelState::ClosedError)
    }
}

/// Everything the session engine tells its subscribers.
///
/// Every event names the endpoint it came from; binary video frames are
/// delivered through a separate subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The transport opened and the `connect` envelope went out.
    ChannelOpened { endpoint: Endpoint },

    /// The transport closed.  Also emitted with code 1000 for every live
    /// channel when the caller disconnects.
    ChannelClosed {
        endpoint: Endpoint,
        code: u16,
        reason: String,
    },

    /// The gateway's upstream session to the server opened or closed.
    ServerConnection { endpoint: Endpoint, connected: bool },

    /// The server accepted the session.
    Ready { endpoint: Endpoint, client_key: i64 },

    /// The gateway reported an error, or the transport failed.
    Error { endpoint: Endpoint, message: String },

    /// Detection metadata for the next binary frame on the video channel.
    LiveData { endpoint: Endpoint, data: LiveData },
}

impl SessionEvent {
    /// Endpoint the event originated from.
    pub fn endpoint(&self) -> Endpoint {
        match self {
            SessionEvent::ChannelOpened { endpoint }
            | SessionEvent::ChannelClosed { endpoint, .. }
            | SessionEvent::ServerConnection { endpoint, .. }
            | SessionEvent::Ready { endpoint, .. }
            | SessionEvent::Error { endpoint, .. }
            | SessionEvent::LiveData { endpoint, .. } => *endpoint,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_states() {
        assert!(ChannelState::OpenUnready.is_open());
        assert!(ChannelState::Ready.is_open());
        assert!(!ChannelState::Connecting.is_open());
        assert!(!ChannelState::ClosedError.is_open());
    }

    #[test]
    fn test_only_ready_is_ready() {
        let ready: Vec<ChannelState> = [
            ChannelState::Idle,
            ChannelState::Connecting,
            ChannelState::OpenUnready,
            ChannelState::Ready,
            ChannelState::ClosedClean,
            ChannelState::ClosedError,
        ]
        .into_iter()
        .filter(|s| s.is_ready())
        .collect();
        assert_eq!(ready, vec![ChannelState::Ready]);
    }

    #[test]
    fn test_default_state_is_idle() {
        assert_eq!(ChannelState::default(), ChannelState::Idle);
        assert!(!ChannelState::Idle.is_closed());
    }

    #[test]
    fn test_event_endpoint_accessor() {
        let event = SessionEvent::ChannelClosed {
            endpoint: Endpoint::Control,
            code: CLOSE_ABNORMAL,
            reason: String::new(),
        };
        assert_eq!(event.endpoint(), Endpoint::Control);

        let event = SessionEvent::Ready {
            endpoint: Endpoint::Video,
            client_key: 3,
        };
        assert_eq!(event.endpoint(), Endpoint::Video);
    }
}
