//! Error types shared across the station crates

use thiserror::Error;

/// Main error type for protocol-level failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StationError {
    /// Leading wire-array tag was not 2, 3 or 4
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    /// Connector id outside the station's range
    #[error("Invalid connector ID: {0}")]
    InvalidConnectorId(u32),

    /// JSON serialization/deserialization error
    #[error("JSON error: {message}")]
    Json { message: String },

    /// Frame was syntactically valid JSON but not a valid OCPP envelope
    #[error("Protocol violation: {message}")]
    Protocol { message: String },

    /// A pending call never received its reply
    #[error("Call timed out: {action} ({unique_id})")]
    CallTimeout { unique_id: String, action: String },
}

impl From<serde_json::Error> for StationError {
    fn from(err: serde_json::Error) -> Self {
        StationError::Json {
            message: err.to_string(),
        }
    }
}

/// OCPP-J CALLERROR codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CallErrorCode {
    /// Requested Action is not known by the receiver
    NotImplemented,
    /// Requested Action is recognized but not supported
    NotSupported,
    /// An internal error prevented the receiver from processing the Action
    InternalError,
    /// Payload for Action is incomplete
    ProtocolError,
    /// A security issue prevented the receiver from completing the Action
    SecurityError,
    /// Payload does not conform to the PDU structure for the Action
    FormationViolation,
    /// At least one field contains an invalid value
    PropertyConstraintViolation,
    /// At least one field violates occurrence constraints
    OccurrenceConstraintViolation,
    /// At least one field violates data type constraints
    TypeConstraintViolation,
    /// Any other error
    GenericError,
}

impl CallErrorCode {
    /// Wire spelling of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            CallErrorCode::NotImplemented => "NotImplemented",
            CallErrorCode::NotSupported => "NotSupported",
            CallErrorCode::InternalError => "InternalError",
            CallErrorCode::ProtocolError => "ProtocolError",
            CallErrorCode::SecurityError => "SecurityError",
            CallErrorCode::FormationViolation => "FormationViolation",
            CallErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            CallErrorCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            CallErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            CallErrorCode::GenericError => "GenericError",
        }
    }

    /// Parse the wire spelling
    pub fn from_wire(raw: &str) -> Option<Self> {
        Some(match raw {
            "NotImplemented" => CallErrorCode::NotImplemented,
            "NotSupported" => CallErrorCode::NotSupported,
            "InternalError" => CallErrorCode::InternalError,
            "ProtocolError" => CallErrorCode::ProtocolError,
            "SecurityError" => CallErrorCode::SecurityError,
            "FormationViolation" => CallErrorCode::FormationViolation,
            "PropertyConstraintViolation" => CallErrorCode::PropertyConstraintViolation,
            "OccurrenceConstraintViolation" => CallErrorCode::OccurrenceConstraintViolation,
            "TypeConstraintViolation" => CallErrorCode::TypeConstraintViolation,
            "GenericError" => CallErrorCode::GenericError,
            _ => return None,
        })
    }
}

impl std::fmt::Display for CallErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias for protocol operations
pub type StationResult<T> = Result<T, StationError>;
