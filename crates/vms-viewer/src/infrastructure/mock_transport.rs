//! In-memory transport for tests and loopback tooling.
//!
//! [`MockConnector`] implements [`Connector`] without any sockets.  Every
//! successful connect hands the "server" end of the link to a
//! [`MockGateway`], which tests use to play the gateway's part: accept
//! transports per endpoint, read what the viewer sent, and push text, binary
//! frames, close frames or failures back.
//!
//! The gateway can also refuse connections per endpoint and hold connects in
//! flight, which makes the `Connecting` state observable.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use vms_core::Endpoint;

use crate::application::transport::{Connector, TransportError, TransportLink, WireMessage};

#[derive(Default)]
struct Counters {
    attempts: HashMap<Endpoint, usize>,
    refused: HashSet<Endpoint>,
}

/// A [`Connector`] backed by in-memory queues.
pub struct MockConnector {
    counters: Mutex<Counters>,
    accepted: HashMap<Endpoint, mpsc::UnboundedSender<MockServer>>,
    gate: watch::Receiver<bool>,
}

impl MockConnector {
    /// Creates a connector and the gateway half that observes it.
    pub fn new() -> (Arc<Self>, MockGateway) {
        let (gate_tx, gate_rx) = watch::channel(true);
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for endpoint in Endpoint::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(endpoint, tx);
            receivers.insert(endpoint, rx);
        }

        let connector = Arc::new(Self {
            counters: Mutex::new(Counters::default()),
            accepted: senders,
            gate: gate_rx,
        });
        let gateway = MockGateway {
            connector: Arc::clone(&connector),
            accepted: receivers,
            gate: gate_tx,
        };
        (connector, gateway)
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Routes a URL to the endpoint whose well-known path it ends with.
fn endpoint_for(url: &str) -> Option<Endpoint> {
    Endpoint::ALL
        .into_iter()
        .find(|endpoint| url.ends_with(endpoint.default_path()))
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError> {
        let endpoint = endpoint_for(url)
            .ok_or_else(|| TransportError::Connect(format!("no mock route for {url}")))?;
        *self.counters().attempts.entry(endpoint).or_default() += 1;

        let mut gate = self.gate.clone();
        // A dropped gateway leaves the gate open.
        let _ = gate.wait_for(|open| *open).await;

        if self.counters().refused.contains(&endpoint) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let server = MockServer {
            endpoint,
            to_client: inbound_tx,
            from_client: outbound_rx,
        };
        self.accepted[&endpoint]
            .send(server)
            .map_err(|_| TransportError::Connect("mock gateway is gone".to_string()))?;

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

// ── Gateway side ──────────────────────────────────────────────────────────────

/// The test-facing half of a [`MockConnector`].
pub struct MockGateway {
    connector: Arc<MockConnector>,
    accepted: HashMap<Endpoint, mpsc::UnboundedReceiver<MockServer>>,
    gate: watch::Sender<bool>,
}

impl MockGateway {
    /// Waits for the next transport opened to `endpoint`.
    pub async fn accept(&mut self, endpoint: Endpoint) -> Option<MockServer> {
        self.accepted.get_mut(&endpoint)?.recv().await
    }

    /// Returns an already-opened transport to `endpoint`, if any.
    pub fn try_accept(&mut self, endpoint: Endpoint) -> Option<MockServer> {
        self.accepted.get_mut(&endpoint)?.try_recv().ok()
    }

    /// Number of connects the viewer has started to `endpoint`.
    pub fn connect_attempts(&self, endpoint: Endpoint) -> usize {
        self.connector
            .counters()
            .attempts
            .get(&endpoint)
            .copied()
            .unwrap_or(0)
    }

    /// Makes every following connect to `endpoint` fail (or succeed again).
    pub fn refuse(&self, endpoint: Endpoint, refuse: bool) {
        let mut counters = self.connector.counters();
        if refuse {
            counters.refused.insert(endpoint);
        } else {
            counters.refused.remove(&endpoint);
        }
    }

    /// Keeps new connects in flight until [`MockGateway::release_connects`].
    pub fn hold_connects(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_connects(&self) {
        self.gate.send_replace(true);
    }
}

/// The gateway's end of one transport.
///
/// Dropping it ends the viewer's inbound queue without a close frame, which
/// the viewer reports as an abnormal closure.
pub struct MockServer {
    endpoint: Endpoint,
    to_client: mpsc::UnboundedSender<Result<WireMessage, TransportError>>,
    from_client: mpsc::UnboundedReceiver<WireMessage>,
}

impl MockServer {
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    fn push(&self, item: Result<WireMessage, TransportError>) {
        // The viewer may already have detached this transport.
        let _ = self.to_client.send(item);
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.push(Ok(WireMessage::Text(text.into())));
    }

    pub fn send_json(&self, value: &serde_json::Value) {
        self.send_text(value.to_string());
    }

    /// Sends `connectionReady` with the given client key.
    pub fn send_ready(&self, client_key: i64) {
        self.send_json(&serde_json::json!({
            "type": "connectionReady",
            "connected": true,
            "clientKey": client_key,
            "endpoint": self.endpoint.as_str(),
        }));
    }

    pub fn send_binary(&self, bytes: Vec<u8>) {
        self.push(Ok(WireMessage::Binary(bytes)));
    }

    /// Sends a close frame with `code`.
    pub fn close(&self, code: u16, reason: &str) {
        self.push(Ok(WireMessage::Close {
            code,
            reason: reason.to_string(),
        }));
    }

    /// Reports a transport failure to the viewer.
    pub fn fail(&self, reason: &str) {
        self.push(Err(TransportError::Io(reason.to_string())));
    }

    /// Next frame the viewer sent, or `None` once the viewer dropped its end.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.from_client.recv().await
    }

    /// Next text frame the viewer sent, parsed as JSON.  Non-text frames are
    /// skipped; returns `None` on a close frame or when the viewer is gone.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.from_client.recv().await? {
                WireMessage::Text(text) => return serde_json::from_str(&text).ok(),
                WireMessage::Close { .. } => return None,
                WireMessage::Binary(_) => continue,
            }
        }
    }

    /// Everything the viewer has sent so far, without waiting.
    pub fn drain(&mut self) -> Vec<WireMessage> {
        std::iter::from_fn(|| self.from_client.try_recv().ok()).collect()
    }

    /// Text frames sent so far, parsed as JSON, without waiting.
    pub fn drain_json(&mut self) -> Vec<serde_json::Value> {
        self.drain()
            .into_iter()
            .filter_map(|message| match message {
                WireMessage::Text(text) => serde_json::from_str(&text).ok(),
                _ => None,
            })
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
