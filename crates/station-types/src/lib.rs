//! # Station Types
//!
//! Foundational types for the OCPP 1.6J station: the wire-level message
//! envelope, the protocol enums and structs shared by every crate, and the
//! common error type.

pub mod common;
pub mod error;
pub mod frame;
pub mod v16;

pub use error::*;
pub use frame::*;

/// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use uuid::Uuid;

/// Message type tag leading every OCPP-J wire array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = StationError;

    fn try_from(value: u8) -> Result<Self, StationError> {
        match value {
            2 => Ok(MessageType::Call),
            3 => Ok(MessageType::CallResult),
            4 => Ok(MessageType::CallError),
            _ => Err(StationError::InvalidMessageType(value)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(tag: MessageType) -> Self {
        tag as u8
    }
}

/// RFID/user identifier presented when authorizing a transaction
pub type IdToken = String;

/// Serde adapter producing the timestamp shape OCPP requires on the wire:
/// ISO-8601 in UTC with a trailing `Z`, second precision.
pub mod ts {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
