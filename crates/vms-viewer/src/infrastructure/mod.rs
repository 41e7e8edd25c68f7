//! Infrastructure layer for vms-viewer.
//!
//! Concrete implementations of the application layer's seams:
//!
//! - `ws_transport`: the tokio-tungstenite [`Connector`](crate::application::Connector)
//! - `mock_transport`: an in-memory connector plus a scriptable fake gateway
//! - `probe_decoder`: a [`DecoderBackend`](crate::application::DecoderBackend)
//!   that inspects frames without a codec library
//! - `settings`: the optional TOML settings file

pub mod mock_transport;
pub mod probe_decoder;
pub mod settings;
pub mod ws_transport;

pub use mock_transport::{MockConnector, MockGateway, MockServer};
pub use probe_decoder::ProbeBackend;
pub use settings::{load_settings, ConfigError, ViewerSettings};
pub use ws_transport::WsConnector;
