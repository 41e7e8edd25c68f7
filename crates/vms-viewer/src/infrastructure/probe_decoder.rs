//! A decoder backend that inspects frames without decoding pixels.
//!
//! The headless viewer has no codec library.  [`ProbeBackend`] validates what
//! arrives and extracts what it cheaply can:
//!
//! - JPEG: walks the marker segments up to the start-of-frame header and
//!   reports the picture dimensions;
//! - H.264: checks the Annex-B start code, holds output until the first IDR
//!   unit and counts units from then on.
//!
//! The raster it returns carries the encoded bytes, not pixels.

use vms_core::CodecId;

use crate::application::decoder::{DecodeError, DecoderBackend, Raster, StreamDecoder};

const NAL_TYPE_IDR: u8 = 5;

/// Codec-free [`DecoderBackend`].
#[derive(Debug, Default)]
pub struct ProbeBackend;

impl DecoderBackend for ProbeBackend {
    fn open_stream(
        &mut self,
        codec: CodecId,
        init_data: Option<&[u8]>,
    ) -> Result<Box<dyn StreamDecoder>, DecodeError> {
        if codec != CodecId::H264 {
            return Err(DecodeError::Unsupported(codec));
        }
        Ok(Box::new(ProbeStream {
            init_len: init_data.map_or(0, <[u8]>::len),
            units: 0,
            synced: false,
            closed: false,
        }))
    }

    fn decode_picture(&mut self, codec: CodecId, payload: &[u8]) -> Result<Raster, DecodeError> {
        if codec != CodecId::Mjpeg {
            return Err(DecodeError::Unsupported(codec));
        }
        let (width, height) = jpeg_dimensions(payload)?;
        Ok(Raster {
            codec,
            width,
            height,
            data: payload.to_vec(),
        })
    }
}

/// Reads width and height from the first SOFn segment of a JPEG.
pub fn jpeg_dimensions(jpeg: &[u8]) -> Result<(u32, u32), DecodeError> {
    if jpeg.len() < 4 || jpeg[0] != 0xFF || jpeg[1] != 0xD8 {
        return Err(DecodeError::Frame("missing JPEG start-of-image marker".into()));
    }

    let mut pos = 2;
    while pos + 4 <= jpeg.len() {
        if jpeg[pos] != 0xFF {
            return Err(DecodeError::Frame(format!("expected marker at offset {pos}")));
        }
        let marker = jpeg[pos + 1];
        match marker {
            // Fill byte.
            0xFF => {
                pos += 1;
                continue;
            }
            // Standalone markers carry no length.
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            0xDA | 0xD9 => break,
            _ => {}
        }

        let length = usize::from(u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]));
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            // [len:2][precision:1][height:2][width:2]
            let header = jpeg
                .get(pos + 4..pos + 9)
                .ok_or_else(|| DecodeError::Frame("truncated start-of-frame segment".into()))?;
            let height = u16::from_be_bytes([header[1], header[2]]);
            let width = u16::from_be_bytes([header[3], header[4]]);
            return Ok((u32::from(width), u32::from(height)));
        }
        pos += 2 + length;
    }

    Err(DecodeError::Frame("no start-of-frame segment before scan data".into()))
}

/// Stream state for one H.264 stream.
#[derive(Debug)]
struct ProbeStream {
    init_len: usize,
    units: u64,
    synced: bool,
    closed: bool,
}

/// Type of the first NAL unit after an Annex-B start code.
fn first_nal_type(unit: &[u8]) -> Option<u8> {
    let body = unit
        .strip_prefix(&[0, 0, 0, 1])
        .or_else(|| unit.strip_prefix(&[0, 0, 1]))?;
    body.first().map(|header| header & 0x1F)
}

impl StreamDecoder for ProbeStream {
    fn decode(&mut self, unit: &[u8]) -> Result<Option<Raster>, DecodeError> {
        if self.closed {
            return Err(DecodeError::Fatal("decoder already closed".into()));
        }
        let nal_type = first_nal_type(unit)
            .ok_or_else(|| DecodeError::Frame("missing Annex-B start code".into()))?;
        if !self.synced {
            if nal_type != NAL_TYPE_IDR {
                return Ok(None);
            }
            self.synced = true;
        }
        self.units += 1;
        Ok(Some(Raster {
            codec: CodecId::H264,
            width: 0,
            height: 0,
            data: unit.to_vec(),
        }))
    }

    fn close(&mut self) {
        tracing::debug!(units = self.units, init_len = self.init_len, "stream decoder closed");
        self.closed = true;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
