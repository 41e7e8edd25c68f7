//! Gateway wire protocol: JSON text envelopes and binary video frames.

pub mod envelope;
pub mod frame;

pub use envelope::{ClientMessage, EnvelopeError, LiveData, ServerMessage};
pub use frame::{demux_frame, encode_frame, CodecFamily, CodecId, FrameError, VideoFrame};
