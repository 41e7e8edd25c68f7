//! Server target and channel endpoint identities.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a camera on the surveillance server.
pub type CameraId = u32;

/// The surveillance server the gateway should relay to.
///
/// A `ServerTarget` is supplied by the caller for each connection attempt and
/// is forwarded unchanged in every outgoing envelope on both channels
/// (`serverIp` / `serverPort` fields).  The gateway itself is addressed
/// separately through the viewer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerTarget {
    /// Hostname or IP address of the surveillance server, as seen by the gateway.
    pub host: String,
    /// TCP port of the surveillance server.
    pub port: u16,
}

impl ServerTarget {
    /// Creates a new target.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One of the two logical gateway channels.
///
/// The video channel carries live-view requests, detection metadata and
/// binary frames.  The control channel carries playback requests and
/// transport commands.  Each endpoint has its own connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Video,
    Control,
}

impl Endpoint {
    /// Both endpoints, in a fixed order (video first).
    pub const ALL: [Endpoint; 2] = [Endpoint::Video, Endpoint::Control];

    /// Lowercase name used in logs and in the gateway's `endpoint` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::Video => "video",
            Endpoint::Control => "control",
        }
    }

    /// Well-known gateway path for this endpoint.
    pub fn default_path(self) -> &'static str {
        match self {
            Endpoint::Video => "/ws/video",
            Endpoint::Control => "/ws/control",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
