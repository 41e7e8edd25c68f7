//! WebSocket transport to the gateway, built on tokio-tungstenite.
//!
//! [`WsConnector::connect`] performs the client handshake and then splits the
//! socket into two tasks:
//!
//! * **writer**: drains the link's outbound queue into the socket sink.  A
//!   queued [`WireMessage::Close`] is sent as a close frame and ends the task;
//!   so does dropping the outbound sender.
//! * **reader**: forwards text, binary and close frames into the inbound
//!   queue.  Ping/pong is answered by tungstenite itself.  A socket error is
//!   forwarded as a [`TransportError::Io`].
//!
//! A peer that goes away without a close frame simply ends the inbound queue;
//! the channel above reports that as close code 1006.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, trace};

use crate::application::transport::{Connector, TransportError, TransportLink, WireMessage};

/// Close code reported when the peer sent a close frame without a status.
const CLOSE_NO_STATUS: u16 = 1005;

/// Production [`Connector`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError> {
        let (ws_stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(format!("{url}: {e}")))?;
        debug!(url, status = %response.status(), "WebSocket handshake complete");

        let (mut sink, mut stream) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WireMessage>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        // ── Writer ────────────────────────────────────────────────────────────
        let writer_url = url.to_string();
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let (frame, closing) = to_ws(message);
                if let Err(e) = sink.send(frame).await {
                    debug!(url = %writer_url, error = %e, "WebSocket send failed");
                    return;
                }
                if closing {
                    return;
                }
            }
            let _ = sink.close().await;
        });

        // ── Reader ────────────────────────────────────────────────────────────
        let reader_url = url.to_string();
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let forwarded = match item {
                    Ok(WsMessage::Text(text)) => Ok(WireMessage::Text(text)),
                    Ok(WsMessage::Binary(bytes)) => Ok(WireMessage::Binary(bytes)),
                    Ok(WsMessage::Close(frame)) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((CLOSE_NO_STATUS, String::new()));
                        let _ = inbound_tx.send(Ok(WireMessage::Close { code, reason }));
                        return;
                    }
                    Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => {
                        trace!(url = %reader_url, "control frame");
                        continue;
                    }
                    Err(e) => {
                        let _ = inbound_tx.send(Err(TransportError::Io(e.to_string())));
                        return;
                    }
                };
                if inbound_tx.send(forwarded).is_err() {
                    // The channel detached this transport.
                    return;
                }
            }
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Maps an outbound frame to tungstenite's type.  The flag is `true` for the
/// closing handshake.
fn to_ws(message: WireMessage) -> (WsMessage, bool) {
    match message {
        WireMessage::Text(text) => (WsMessage::Text(text), false),
        WireMessage::Binary(bytes) => (WsMessage::Binary(bytes), false),
        WireMessage::Close { code, reason } => (
            WsMessage::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.into(),
            })),
            true,
        ),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_maps_to_text_frame() {
        let (frame, closing) = to_ws(WireMessage::Text("{}".into()));
        assert_eq!(frame, WsMessage::Text("{}".into()));
        assert!(!closing);
    }

    #[test]
    fn test_close_maps_to_close_frame_with_code() {
        let (frame, closing) = to_ws(WireMessage::Close {
            code: 1000,
            reason: "bye".into(),
        });
        assert!(closing);
        let WsMessage::Close(Some(close)) = frame else {
            panic!("expected close frame");
        };
        assert_eq!(u16::from(close.code), 1000);
        assert_eq!(close.reason, "bye");
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_is_connect_error() {
        // Port 9 (discard) on localhost is almost never listening.
        let result = WsConnector.connect("ws://127.0.0.1:9/ws/video").await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
