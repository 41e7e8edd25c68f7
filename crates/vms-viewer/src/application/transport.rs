//! Transport seam between the channel state machine and the network.
//!
//! A [`Connector`] turns a URL into a [`TransportLink`]: a pair of unbounded
//! queues, one for frames the viewer sends and one for frames (or failures)
//! the gateway delivers.  The link owns no protocol knowledge; the channel
//! above it decides what every frame means.
//!
//! The production connector wraps tokio-tungstenite
//! ([`crate::infrastructure::ws_transport`]); tests use the in-memory
//! [`crate::infrastructure::mock_transport`].

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors a transport can report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The connection broke after it was established.
    #[error("transport failure: {0}")]
    Io(String),
}

/// One WebSocket-level frame in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
    /// Closing handshake.  Inbound, it carries the peer's close code.
    Close { code: u16, reason: String },
}

/// An established connection.
///
/// Dropping `outbound` ends the writer side; the inbound queue ends (returns
/// `None`) when the peer goes away without a close frame.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<WireMessage>,
    pub inbound: mpsc::UnboundedReceiver<Result<WireMessage, TransportError>>,
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] when the connection cannot be
    /// established.
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError>;
}
