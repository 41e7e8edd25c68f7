//! Binary video frame layout used on the video channel.
//!
//! Wire format:
//! ```text
//! [codec:4][init_len:4][init_data:init_len][payload:rest]
//! ```
//! Header size: 8 bytes.  Both header integers are big-endian.  When
//! `init_len` is zero there is no initialisation block and the payload starts
//! immediately after the header.
//!
//! The demuxer is stateless: it borrows slices out of the buffer it is given
//! and never copies the payload.  Deciding what to do with a codec switch is
//! the consumer's job.

use thiserror::Error;

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Errors that can occur while parsing a binary frame header.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer is shorter than the fixed header.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The codec identifier is not a known value.
    #[error("unknown codec id: {0}")]
    UnknownCodec(u32),

    /// The declared initialisation block runs past the end of the buffer.
    #[error("init block length {declared} exceeds the {available} bytes after the header")]
    InitLengthOutOfRange { declared: u32, available: usize },
}

/// Codec identifier carried in the first four bytes of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CodecId {
    None = 0,
    Raw = 1,
    /// Motion JPEG: every payload is an independently decodable picture.
    Mjpeg = 2,
    /// Reserved by the server; never handled by the viewer.
    Mpeg4 = 3,
    /// H.264: payloads are dependent access units fed to a persistent decoder.
    H264 = 4,
}

/// How a codec's payloads must be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFamily {
    /// Each payload is a complete still image; no state carries across frames.
    Picture,
    /// Payloads depend on earlier ones and need a long-lived decoder instance.
    Stream,
    /// The viewer has no decode path for this codec.
    Unsupported,
}

impl CodecId {
    /// Numeric value sent on the wire.
    pub fn wire_value(self) -> u32 {
        self as u32
    }

    /// Returns the decode family this codec belongs to.
    pub fn family(self) -> CodecFamily {
        match self {
            CodecId::Mjpeg => CodecFamily::Picture,
            CodecId::H264 => CodecFamily::Stream,
            CodecId::None | CodecId::Raw | CodecId::Mpeg4 => CodecFamily::Unsupported,
        }
    }
}

impl TryFrom<u32> for CodecId {
    type Error = FrameError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CodecId::None),
            1 => Ok(CodecId::Raw),
            2 => Ok(CodecId::Mjpeg),
            3 => Ok(CodecId::Mpeg4),
            4 => Ok(CodecId::H264),
            other => Err(FrameError::UnknownCodec(other)),
        }
    }
}

/// One parsed binary frame, borrowing from the original buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFrame<'a> {
    /// Codec of the payload.
    pub codec: CodecId,
    /// Out-of-band codec initialisation data (e.g. H.264 SPS/PPS), if present.
    pub init_data: Option<&'a [u8]>,
    /// The encoded unit itself.
    pub payload: &'a [u8],
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Parses one binary frame.
///
/// # Errors
///
/// Returns [`FrameError`] if the header is truncated, the codec is unknown, or
/// the initialisation block length does not fit in the buffer.
///
/// # Examples
///
/// ```rust
/// use vms_core::protocol::frame::{demux_frame, encode_frame, CodecId};
///
/// let bytes = encode_frame(CodecId::Mjpeg, None, &[0xFF, 0xD8, 0xFF, 0xD9]);
/// let frame = demux_frame(&bytes).unwrap();
/// assert_eq!(frame.codec, CodecId::Mjpeg);
/// assert!(frame.init_data.is_none());
/// assert_eq!(frame.payload, &[0xFF, 0xD8, 0xFF, 0xD9]);
/// ```
pub fn demux_frame(buf: &[u8]) -> Result<VideoFrame<'_>, FrameError> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Err(FrameError::InsufficientData {
            needed: FRAME_HEADER_SIZE,
            available: buf.len(),
        });
    }

    let codec_value = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let codec = CodecId::try_from(codec_value)?;

    let init_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let body = &buf[FRAME_HEADER_SIZE..];

    // Compare in u64 space so a huge declared length cannot wrap on 32-bit targets.
    if u64::from(init_len) > body.len() as u64 {
        return Err(FrameError::InitLengthOutOfRange {
            declared: init_len,
            available: body.len(),
        });
    }

    let (init, payload) = body.split_at(init_len as usize);
    Ok(VideoFrame {
        codec,
        init_data: (!init.is_empty()).then_some(init),
        payload,
    })
}

/// Builds a binary frame in the layout [`demux_frame`] parses.
///
/// The gateway is the normal producer of these frames; this encoder exists for
/// test fixtures, benchmarks, and loopback tooling.
pub fn encode_frame(codec: CodecId, init_data: Option<&[u8]>, payload: &[u8]) -> Vec<u8> {
    let init = init_data.unwrap_or_default();
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + init.len() + payload.len());
    buf.extend_from_slice(&codec.wire_value().to_be_bytes());
    buf.extend_from_slice(&(init.len() as u32).to_be_bytes());
    buf.extend_from_slice(init);
    buf.extend_from_slice(payload);
    buf
}

// ── Tests ─────────────────────────────────────────────────────────────────────
