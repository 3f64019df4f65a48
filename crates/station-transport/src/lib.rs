//! # Station Transport
//!
//! Client-side WebSocket plumbing for the station: endpoint construction,
//! subprotocol negotiation and the split send/receive halves the engine
//! builds its dispatcher on.

pub mod client;
pub mod error;

pub use client::{connect, CsLink, LinkEvent, LinkSink, LinkStream};
pub use error::*;

use std::time::Duration;

/// Close code used for a clean client-initiated disconnect
pub const CLIENT_CLOSE_CODE: u16 = 3001;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Subprotocols offered during the handshake, in preference order
    pub subprotocols: Vec<String>,
    /// Timeout for establishing the connection
    pub connect_timeout: Duration,
    /// Maximum message and frame size in bytes
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            subprotocols: vec!["ocpp1.6".to_string(), "ocpp1.5".to_string()],
            connect_timeout: Duration::from_secs(30),
            max_message_size: 65536,
        }
    }
}

/// Endpoint URL for a charge point: the caller supplies the trailing slash
/// on the base URL and the id is appended verbatim.
pub fn join_endpoint(ws_url: &str, cp_id: &str) -> String {
    format!("{ws_url}{cp_id}")
}
