//! JSON text envelopes exchanged with the gateway.
//!
//! Every text frame on either channel is a JSON object with a `"type"` field
//! that identifies the variant.  All other fields are flattened into the same
//! object, in camelCase:
//!
//! ```json
//! {"type":"liveInfo","cameraIds":[7],"serverIp":"10.0.0.5","serverPort":7001}
//! ```
//!
//! Serde's `#[serde(tag = "type")]` attribute handles the discriminant, so the
//! session engine matches exhaustively on typed variants instead of probing an
//! open-ended field bag.
//!
//! # Why separate outgoing and incoming types?
//!
//! The viewer *sends* connection and playback requests; the gateway *sends*
//! readiness notices, errors and detection metadata.  Two enums make it a
//! compile-time error to send a server-only message, and vice versa.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::detection::ObjectDetection;
use crate::domain::playback::{PlaybackControlType, PlaybackSpeed};
use crate::domain::target::{CameraId, ServerTarget};

/// Errors raised while encoding or decoding a text envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// An outgoing envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    /// An incoming text frame was not valid JSON or not a known envelope.
    #[error("malformed envelope: {0}")]
    Decode(#[source] serde_json::Error),
}

// ── Viewer → Gateway ──────────────────────────────────────────────────────────

/// All envelopes the viewer sends to the gateway.
///
/// # Serde representation
///
/// ```json
/// {"type":"connect","serverIp":"10.0.0.5","serverPort":7001}
/// {"type":"playbackInfo","cameraIds":[1,2],"startTime":"2024-05-01T08:00:00.000Z","duration":600,"serverIp":"10.0.0.5","serverPort":7001}
/// {"type":"playbackControl","controlType":3,"speed":3,"serverIp":"10.0.0.5","serverPort":7001}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// First envelope on every freshly opened channel: asks the gateway to
    /// open its upstream TCP session to the server.
    Connect { server_ip: String, server_port: u16 },

    /// Requests live video for a set of cameras (video channel).
    LiveInfo {
        camera_ids: Vec<CameraId>,
        server_ip: String,
        server_port: u16,
    },

    /// Requests recorded video for a set of cameras (control channel).
    PlaybackInfo {
        camera_ids: Vec<CameraId>,
        /// ISO-8601 UTC timestamp with millisecond precision.
        start_time: String,
        /// Length of the requested window, in seconds.
        duration: u32,
        server_ip: String,
        server_port: u16,
    },

    /// Playback transport command (control channel).
    PlaybackControl {
        control_type: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speed: Option<u8>,
        server_ip: String,
        server_port: u16,
    },
}

impl ClientMessage {
    /// Builds the `connect` envelope for `target`.
    pub fn connect(target: &ServerTarget) -> Self {
        Self::Connect {
            server_ip: target.host.clone(),
            server_port: target.port,
        }
    }

    /// Builds a `liveInfo` request.
    pub fn live_info(camera_ids: Vec<CameraId>, target: &ServerTarget) -> Self {
        Self::LiveInfo {
            camera_ids,
            server_ip: target.host.clone(),
            server_port: target.port,
        }
    }

    /// Builds a `playbackInfo` request starting at `start_time`.
    pub fn playback_info(
        camera_ids: Vec<CameraId>,
        start_time: DateTime<Utc>,
        duration_secs: u32,
        target: &ServerTarget,
    ) -> Self {
        Self::PlaybackInfo {
            camera_ids,
            start_time: start_time.to_rfc3339_opts(SecondsFormat::Millis, true),
            duration: duration_secs,
            server_ip: target.host.clone(),
            server_port: target.port,
        }
    }

    /// Builds a `playbackControl` command.
    pub fn playback_control(
        control_type: PlaybackControlType,
        speed: Option<PlaybackSpeed>,
        target: &ServerTarget,
    ) -> Self {
        Self::PlaybackControl {
            control_type: control_type.wire_code(),
            speed: speed.map(PlaybackSpeed::wire_code),
            server_ip: target.host.clone(),
            server_port: target.port,
        }
    }

    /// `true` for envelopes that may only be sent once the channel is ready.
    ///
    /// Only `connect` is allowed on a channel that is open but not yet ready.
    pub fn is_payload_bearing(&self) -> bool {
        !matches!(self, ClientMessage::Connect { .. })
    }

    /// Wire discriminant, for log messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::Connect { .. } => "connect",
            ClientMessage::LiveInfo { .. } => "liveInfo",
            ClientMessage::PlaybackInfo { .. } => "playbackInfo",
            ClientMessage::PlaybackControl { .. } => "playbackControl",
        }
    }

    /// Serializes the envelope to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if serialization fails.
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(EnvelopeError::Encode)
    }
}

// ── Gateway → Viewer ──────────────────────────────────────────────────────────

/// Detection metadata for one live frame.
///
/// The gateway sends this as a text frame immediately before the binary frame
/// it describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveData {
    pub camera_id: CameraId,
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Codec name as reported by the server (`"H264"`, `"MJPEG"`, …).
    pub codec: String,
    /// Frame type name (`"INTRA"`, `"PREDICT"`, …).
    pub intra_code: String,
    #[serde(default)]
    pub objects: Vec<ObjectDetection>,
}

/// All envelopes the gateway sends to the viewer.
///
/// The gateway also stamps most messages with an `endpoint` field; it is
/// redundant (the viewer knows which channel a frame arrived on) and ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// The gateway's upstream TCP session to the server opened or closed.
    Connection { connected: bool },

    /// The server accepted the session; payload requests may now flow.
    ConnectionReady {
        connected: bool,
        /// Session key assigned by the server.
        #[serde(default)]
        client_key: i64,
    },

    /// The gateway or server reported a failure.
    Error { message: String },

    /// Detection metadata for a live frame.
    LiveData(LiveData),
}

impl ServerMessage {
    /// Parses one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Decode`] for invalid JSON, a missing or
    /// unknown `type`, or missing required fields.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(text).map_err(EnvelopeError::Decode)
    }

    /// Wire discriminant, for log messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Connection { .. } => "connection",
            ServerMessage::ConnectionReady { .. } => "connectionReady",
            ServerMessage::Error { .. } => "error",
            ServerMessage::LiveData(_) => "liveData",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
