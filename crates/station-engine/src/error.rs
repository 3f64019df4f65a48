//! Engine error type

use crate::session::CpStatus;
use station_transport::TransportError;
use station_types::StationError;
use thiserror::Error;

/// Errors surfaced by engine commands
#[derive(Error, Debug)]
pub enum EngineError {
    /// A command needed a socket but none is open
    #[error("No connection to OCPP server")]
    NotConnected,

    /// Connect was called while a session is already open
    #[error("Already connected to a Central System")]
    AlreadyConnected,

    /// Connector id outside the station's range
    #[error("Invalid connector ID: {0}")]
    InvalidConnectorId(u32),

    /// The requested session status change is not allowed
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: CpStatus, to: CpStatus },

    /// WebSocket failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Codec or protocol failure
    #[error(transparent)]
    Protocol(#[from] StationError),

    /// Durable store failure
    #[error("Store error: {message}")]
    Store { message: String },
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
