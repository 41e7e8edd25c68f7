//! vms-viewer library crate.
//!
//! Client-side streaming and session engine for a video-management gateway.
//! The gateway exposes two WebSocket channels: a video channel carrying
//! detection metadata and binary frames, and a control channel for playback.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! UI / CLI
//!    ↕  SessionManager handle (commands in, events out)
//! [vms-viewer]
//!   ├── domain/           ViewerConfig, ChannelState, SessionEvent, backoff
//!   ├── application/      Channel state machine, session actor, camera feeds,
//!   │                     playback controls, decoder and transport seams
//!   └── infrastructure/
//!         ├── ws_transport/   WebSocket client (tokio-tungstenite)
//!         ├── mock_transport/ In-memory gateway for tests
//!         ├── probe_decoder/  Codec-free decoder backend
//!         └── settings/       TOML settings file
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `vms-core`; it reaches the network
//!   only through the `Connector` trait.
//! - `infrastructure` implements the application seams.

/// Domain layer: configuration, lifecycle states, events (no I/O).
pub mod domain;

/// Application layer: the session engine and its consumers.
pub mod application;

/// Infrastructure layer: transports, decoder backend, settings file.
pub mod infrastructure;

pub use application::{CameraFeed, PlaybackController, SessionManager, Subscription};
pub use domain::{ChannelState, SessionEvent, ViewerConfig};
