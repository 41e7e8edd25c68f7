//! # vms-core
//!
//! Shared library for the VMS viewer containing the gateway wire protocol and
//! the domain vocabulary of a surveillance session.
//!
//! This crate has zero dependencies on sockets, async runtimes, or decoders.
//! Everything here is a plain value type or a pure function, so the session
//! engine in `vms-viewer` can be tested against it without a network.
//!
//! # Architecture overview
//!
//! The viewer talks to a gateway over two independent WebSocket channels:
//!
//! ```text
//! viewer ──/ws/video───▶ gateway ──TCP──▶ surveillance server
//! viewer ──/ws/control─▶ gateway ──TCP──▶ surveillance server
//! ```
//!
//! - **`protocol`** – How bytes travel over the two channels.  Text frames
//!   carry JSON envelopes discriminated by a `"type"` field; binary frames on
//!   the video channel carry an 8-byte big-endian header followed by optional
//!   codec initialisation data and one encoded video unit.
//!
//! - **`domain`** – Pure types with no wire concerns: the server target, the
//!   two channel endpoints, playback transport enums, and object detections
//!   with their overlay geometry.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `vms_core::ServerTarget` instead of `vms_core::domain::target::ServerTarget`.
pub use domain::detection::{ObjectCategory, ObjectDetection, PixelRect};
pub use domain::playback::{PlaybackControlType, PlaybackError, PlaybackSpeed};
pub use domain::target::{CameraId, Endpoint, ServerTarget};
pub use protocol::envelope::{ClientMessage, EnvelopeError, LiveData, ServerMessage};
pub use protocol::frame::{demux_frame, encode_frame, CodecFamily, CodecId, FrameError, VideoFrame};
