//! Application layer for vms-viewer.
//!
//! The session engine lives here: the per-channel state machine, the session
//! actor that owns both channels, request deferral until readiness, the
//! subscriber registry, and the consumers built on top of it (camera feeds and
//! playback controls).
//!
//! # What does NOT belong here?
//!
//! - WebSocket framing (that is `infrastructure::ws_transport`)
//! - Actual pixel decoding (a `DecoderBackend` implementation supplies it)
//! - Reading config files or CLI arguments (that is `main.rs`)

pub mod channel;
pub mod decoder;
pub mod playback;
pub mod session_manager;
pub mod subscribers;
pub mod transport;
pub mod video_consumer;

pub use channel::ChannelError;
pub use decoder::{DecodeError, DecoderBackend, Raster, StreamDecoder};
pub use playback::{PlaybackController, PlaybackControllerError, PlaybackSelection, ViewMode};
pub use session_manager::{ControlIntent, SessionManager, WeakSessionManager};
pub use subscribers::{Registry, Subscription};
pub use transport::{Connector, TransportError, TransportLink, WireMessage};
pub use video_consumer::{CameraFeed, DecodeContext, FeedView, FrameSink};
