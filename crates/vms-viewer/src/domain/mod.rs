//! Domain layer: configuration, channel lifecycle, events and backoff.
//!
//! Nothing here performs I/O or touches the async runtime.

pub mod config;
pub mod events;
pub mod reconnect;

pub use config::ViewerConfig;
pub use events::{
    ChannelState, SessionEvent, CLIENT_DISCONNECT_REASON, CLOSE_ABNORMAL, CLOSE_NORMAL,
};
pub use reconnect::{ReconnectPolicy, ReconnectState};
