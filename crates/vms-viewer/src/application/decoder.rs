//! Decode capability seam.
//!
//! The viewer does not ship a video codec.  A [`DecoderBackend`] provides two
//! paths matching the two codec families:
//!
//! * picture codecs: one stateless call per payload;
//! * stream codecs: a long-lived [`StreamDecoder`] opened with the stream's
//!   initialisation data and fed every access unit in order.
//!
//! Both traits are object safe so the consumer can hold `Box<dyn ...>`.

use thiserror::Error;
use vms_core::{CodecId, FrameError};

/// A decoded, displayable image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub codec: CodecId,
    pub width: u32,
    pub height: u32,
    /// Backend-defined pixel data.
    pub data: Vec<u8>,
}

/// Errors raised while turning a binary frame into a raster.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame header could not be parsed.
    #[error("malformed frame: {0}")]
    Malformed(#[from] FrameError),

    /// The viewer has no decode path for this codec.
    #[error("unsupported codec {0:?}")]
    Unsupported(CodecId),

    /// This payload could not be decoded; the decoder is still usable.
    #[error("frame could not be decoded: {0}")]
    Frame(String),

    /// The decoder is broken and must be recreated.
    #[error("decoder failed: {0}")]
    Fatal(String),
}

impl DecodeError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeError::Fatal(_))
    }
}

/// A stateful decoder for one dependent stream.
#[cfg_attr(test, mockall::automock)]
pub trait StreamDecoder: Send {
    /// Feeds one access unit.  Returns `None` while the decoder is still
    /// buffering.
    fn decode(&mut self, unit: &[u8]) -> Result<Option<Raster>, DecodeError>;

    /// Releases the decoder's resources.  Called exactly once.
    fn close(&mut self);
}

/// Factory for both decode paths.
pub trait DecoderBackend: Send {
    /// Opens a stream decoder for `codec`, configured with `init_data` when
    /// the stream provided it.
    fn open_stream(
        &mut self,
        codec: CodecId,
        init_data: Option<&[u8]>,
    ) -> Result<Box<dyn StreamDecoder>, DecodeError>;

    /// Decodes one self-contained picture.
    fn decode_picture(&mut self, codec: CodecId, payload: &[u8]) -> Result<Raster, DecodeError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
