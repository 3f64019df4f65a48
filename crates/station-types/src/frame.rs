//! OCPP-J message envelope
//!
//! The wire format is a bare JSON array whose first element is the message
//! type tag: `[2, id, action, payload]` for a CALL, `[3, id, payload]` for a
//! CALLRESULT and `[4, id, code, description, details]` for a CALLERROR.

use crate::{CallErrorCode, StationError, StationResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Decoded OCPP message envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Request originated by either side
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    /// Successful reply to a Call
    CallResult { unique_id: String, payload: Value },
    /// Error reply to a Call
    CallError {
        unique_id: String,
        code: CallErrorCode,
        description: String,
        details: Value,
    },
}

impl Frame {
    /// Build a Call with a fresh unique id
    pub fn call<T: Serialize>(action: &str, payload: &T) -> StationResult<Self> {
        Ok(Frame::Call {
            unique_id: Uuid::new_v4().to_string(),
            action: action.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Build a CallResult answering the Call with `unique_id`
    pub fn call_result<T: Serialize>(unique_id: &str, payload: &T) -> StationResult<Self> {
        Ok(Frame::CallResult {
            unique_id: unique_id.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Build a CallError answering the Call with `unique_id`
    pub fn call_error(unique_id: &str, code: CallErrorCode, description: &str) -> Self {
        Frame::CallError {
            unique_id: unique_id.to_string(),
            code,
            description: description.to_string(),
            details: Value::Object(Default::default()),
        }
    }

    /// The unique message id shared between a Call and its reply
    pub fn unique_id(&self) -> &str {
        match self {
            Frame::Call { unique_id, .. }
            | Frame::CallResult { unique_id, .. }
            | Frame::CallError { unique_id, .. } => unique_id,
        }
    }

    /// Encode to the compact wire representation
    pub fn encode(&self) -> StationResult<String> {
        let raw = RawFrame::from(self.clone());
        Ok(serde_json::to_string(&raw)?)
    }

    /// Decode a wire frame.
    ///
    /// Type tags other than 2/3/4 come back as
    /// [`StationError::InvalidMessageType`] so the dispatcher can drop them
    /// without treating the input as malformed.
    pub fn decode(text: &str) -> StationResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        let array = value.as_array().ok_or_else(|| StationError::Protocol {
            message: "message is not a JSON array".to_string(),
        })?;
        let tag = array
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| StationError::Protocol {
                message: "missing message type tag".to_string(),
            })?;
        if !matches!(tag, 2 | 3 | 4) {
            return Err(StationError::InvalidMessageType(tag.min(u8::MAX as u64) as u8));
        }

        let raw: RawFrame = serde_json::from_value(value)?;
        raw.into_frame()
    }
}

/// Wire-shaped frame; the tuple variants serialize as bare JSON arrays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum RawFrame {
    /// `[2, "unique_id", "action", payload]`
    Call(u8, String, String, Value),
    /// `[3, "unique_id", payload]`
    CallResult(u8, String, Value),
    /// `[4, "unique_id", "code", "description", details]`
    CallError(u8, String, String, String, Value),
}

impl RawFrame {
    fn into_frame(self) -> StationResult<Frame> {
        match self {
            RawFrame::Call(tag, unique_id, action, payload) => {
                if tag != 2 {
                    return Err(StationError::InvalidMessageType(tag));
                }
                Ok(Frame::Call {
                    unique_id,
                    action,
                    payload,
                })
            }
            RawFrame::CallResult(tag, unique_id, payload) => {
                if tag != 3 {
                    return Err(StationError::InvalidMessageType(tag));
                }
                Ok(Frame::CallResult { unique_id, payload })
            }
            RawFrame::CallError(tag, unique_id, code, description, details) => {
                if tag != 4 {
                    return Err(StationError::InvalidMessageType(tag));
                }
                let code =
                    CallErrorCode::from_wire(&code).ok_or_else(|| StationError::Protocol {
                        message: format!("unknown error code: {code}"),
                    })?;
                Ok(Frame::CallError {
                    unique_id,
                    code,
                    description,
                    details,
                })
            }
        }
    }
}

impl From<Frame> for RawFrame {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Call {
                unique_id,
                action,
                payload,
            } => RawFrame::Call(2, unique_id, action, payload),
            Frame::CallResult { unique_id, payload } => RawFrame::CallResult(3, unique_id, payload),
            Frame::CallError {
                unique_id,
                code,
                description,
                details,
            } => RawFrame::CallError(4, unique_id, code.as_str().to_string(), description, details),
        }
    }
}
