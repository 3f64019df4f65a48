//! # Station Messages
//!
//! Typed payloads for the OCPP 1.6 actions the station originates or answers,
//! plus helpers for pairing a request with its reply over the frame envelope.

pub mod v16;

use serde::{de::DeserializeOwned, Serialize};
use station_types::{Frame, StationResult};

/// Pairs a request payload with its action name and response payload
pub trait OcppCall: Serialize + DeserializeOwned {
    /// Action name as spelled in the OCPP specification
    const ACTION: &'static str;
    /// Payload type of the matching CALLRESULT
    type Response: Serialize + DeserializeOwned;
}

/// Build a CALL frame for a typed request
pub fn call<C: OcppCall>(request: &C) -> StationResult<Frame> {
    Frame::call(C::ACTION, request)
}

/// Build a CALLRESULT frame answering `unique_id` with a typed response
pub fn call_result<C: OcppCall>(unique_id: &str, response: &C::Response) -> StationResult<Frame> {
    Frame::call_result(unique_id, response)
}

/// Parse the payload of a CALLRESULT for the given call type
pub fn parse_response<C: OcppCall>(payload: serde_json::Value) -> StationResult<C::Response> {
    Ok(serde_json::from_value(payload)?)
}

/// Parse an inbound CALL payload
pub fn parse_request<C: OcppCall>(payload: serde_json::Value) -> StationResult<C> {
    Ok(serde_json::from_value(payload)?)
}
