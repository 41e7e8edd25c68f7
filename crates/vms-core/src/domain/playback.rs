//! Playback transport commands.
//!
//! The numeric values below are the codes the surveillance server expects in
//! the `controlType` and `speed` fields of a `playbackControl` envelope.
//! Note that speed codes are ordinal, not multipliers: `X4` is sent as `3`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced when converting raw values into playback enums.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaybackError {
    /// The numeric control type is not one the server understands.
    #[error("unknown playback control type: {0}")]
    UnknownControlType(u8),

    /// The numeric speed code is not one the server understands.
    #[error("unknown playback speed code: {0}")]
    UnknownSpeedCode(u8),

    /// A textual speed (CLI input) could not be parsed.
    #[error("invalid playback speed '{0}' (expected 1x, 2x, 4x, 8x or max)")]
    InvalidSpeed(String),
}

/// Transport command carried by a `playbackControl` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PlaybackControlType {
    Play = 1,
    Stop = 2,
    /// Change speed; must be accompanied by a [`PlaybackSpeed`].
    Speed = 3,
}

impl PlaybackControlType {
    /// Numeric code sent on the wire.
    pub fn wire_code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PlaybackControlType {
    type Error = PlaybackError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Play),
            2 => Ok(Self::Stop),
            3 => Ok(Self::Speed),
            other => Err(PlaybackError::UnknownControlType(other)),
        }
    }
}

/// Playback speed selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PlaybackSpeed {
    #[default]
    X1 = 1,
    X2 = 2,
    X4 = 3,
    X8 = 4,
    /// As fast as the server can deliver.
    Max = 5,
}

impl PlaybackSpeed {
    /// Numeric code sent on the wire.
    pub fn wire_code(self) -> u8 {
        self as u8
    }

    /// Playback rate multiplier, or `None` for [`PlaybackSpeed::Max`].
    pub fn multiplier(self) -> Option<u32> {
        match self {
            Self::X1 => Some(1),
            Self::X2 => Some(2),
            Self::X4 => Some(4),
            Self::X8 => Some(8),
            Self::Max => None,
        }
    }
}

impl TryFrom<u8> for PlaybackSpeed {
    type Error = PlaybackError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::X1),
            2 => Ok(Self::X2),
            3 => Ok(Self::X4),
            4 => Ok(Self::X8),
            5 => Ok(Self::Max),
            other => Err(PlaybackError::UnknownSpeedCode(other)),
        }
    }
}

impl FromStr for PlaybackSpeed {
    type Err = PlaybackError;

    /// Accepts `1x`, `x1`, `1` (and the same for 2, 4, 8) or `max`, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if normalized == "max" {
            return Ok(Self::Max);
        }
        match normalized.trim_start_matches('x').trim_end_matches('x') {
            "1" => Ok(Self::X1),
            "2" => Ok(Self::X2),
            "4" => Ok(Self::X4),
            "8" => Ok(Self::X8),
            _ => Err(PlaybackError::InvalidSpeed(s.to_string())),
        }
    }
}

impl fmt::Display for PlaybackSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.multiplier() {
            Some(m) => write!(f, "{m}x"),
            None => f.write_str("max"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
