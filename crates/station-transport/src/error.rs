//! Transport layer errors

use thiserror::Error;

/// Errors raised by the WebSocket link to the Central System
#[derive(Error, Debug)]
pub enum TransportError {
    /// Endpoint URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Underlying WebSocket failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Connect did not complete in time
    #[error("Connection timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Server selected a subprotocol the station did not offer
    #[error("Server selected unsupported subprotocol: {selected}")]
    Subprotocol { selected: String },

    /// Handshake request could not be built
    #[error("Handshake error: {message}")]
    Handshake { message: String },
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
