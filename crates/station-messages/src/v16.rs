//! OCPP 1.6 message payloads
//!
//! Field names follow the specification exactly; optional fields are omitted
//! from the wire rather than serialized as null.

use crate::OcppCall;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use station_types::common::MeterValue;
use station_types::v16::{
    AvailabilityStatus, AvailabilityType, ConnectorErrorCode, ConnectorStatus, IdTagInfo,
    KeyValue, MessageTrigger, Reason, RegistrationStatus, RemoteStartStopStatus, ResetStatus,
    ResetType, TriggerMessageStatus, UnlockStatus,
};
use station_types::IdToken;

// =============================================================================
// Station-originated calls
// =============================================================================

/// BootNotification request, sent once on socket open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootNotificationRequest {
    #[serde(rename = "chargePointVendor")]
    pub charge_point_vendor: String,
    #[serde(rename = "chargePointModel")]
    pub charge_point_model: String,
    #[serde(
        rename = "chargePointSerialNumber",
        skip_serializing_if = "Option::is_none"
    )]
    pub charge_point_serial_number: Option<String>,
    #[serde(
        rename = "chargeBoxSerialNumber",
        skip_serializing_if = "Option::is_none"
    )]
    pub charge_box_serial_number: Option<String>,
    #[serde(rename = "firmwareVersion", skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imsi: Option<String>,
    #[serde(rename = "meterType", skip_serializing_if = "Option::is_none")]
    pub meter_type: Option<String>,
    #[serde(rename = "meterSerialNumber", skip_serializing_if = "Option::is_none")]
    pub meter_serial_number: Option<String>,
}

impl OcppCall for BootNotificationRequest {
    const ACTION: &'static str = "BootNotification";
    type Response = BootNotificationResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootNotificationResponse {
    #[serde(rename = "currentTime")]
    pub current_time: DateTime<Utc>,
    /// Heartbeat interval in seconds
    pub interval: i32,
    pub status: RegistrationStatus,
}

/// Authorize request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    #[serde(rename = "idTag")]
    pub id_tag: IdToken,
}

impl OcppCall for AuthorizeRequest {
    const ACTION: &'static str = "Authorize";
    type Response = AuthorizeResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    #[serde(rename = "idTagInfo")]
    pub id_tag_info: IdTagInfo,
}

/// StartTransaction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartTransactionRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    #[serde(rename = "idTag")]
    pub id_tag: IdToken,
    /// Meter register at transaction start, Wh
    #[serde(rename = "meterStart")]
    pub meter_start: i32,
    #[serde(with = "station_types::ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "reservationId")]
    pub reservation_id: i32,
}

impl OcppCall for StartTransactionRequest {
    const ACTION: &'static str = "StartTransaction";
    type Response = StartTransactionResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartTransactionResponse {
    #[serde(rename = "idTagInfo")]
    pub id_tag_info: IdTagInfo,
    /// Absent or zero means the server assigned no usable id
    #[serde(rename = "transactionId", default)]
    pub transaction_id: Option<i32>,
}

/// StopTransaction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopTransactionRequest {
    #[serde(rename = "transactionId")]
    pub transaction_id: i32,
    #[serde(with = "station_types::ts")]
    pub timestamp: DateTime<Utc>,
    /// Meter register at transaction stop, Wh
    #[serde(rename = "meterStop")]
    pub meter_stop: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    #[serde(rename = "idTag", skip_serializing_if = "Option::is_none")]
    pub id_tag: Option<IdToken>,
    #[serde(rename = "transactionData", skip_serializing_if = "Option::is_none")]
    pub transaction_data: Option<Vec<MeterValue>>,
}

impl OcppCall for StopTransactionRequest {
    const ACTION: &'static str = "StopTransaction";
    type Response = StopTransactionResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopTransactionResponse {
    #[serde(rename = "idTagInfo", skip_serializing_if = "Option::is_none")]
    pub id_tag_info: Option<IdTagInfo>,
}

/// Heartbeat request, empty payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

impl OcppCall for HeartbeatRequest {
    const ACTION: &'static str = "Heartbeat";
    type Response = HeartbeatResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(rename = "currentTime")]
    pub current_time: DateTime<Utc>,
}

/// MeterValues request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterValuesRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    #[serde(rename = "transactionId", skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i32>,
    #[serde(rename = "meterValue")]
    pub meter_value: Vec<MeterValue>,
}

impl OcppCall for MeterValuesRequest {
    const ACTION: &'static str = "MeterValues";
    type Response = MeterValuesResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterValuesResponse {}

/// StatusNotification request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusNotificationRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    pub status: ConnectorStatus,
    #[serde(rename = "errorCode")]
    pub error_code: ConnectorErrorCode,
    pub info: String,
    #[serde(with = "station_types::ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "vendorId")]
    pub vendor_id: String,
    #[serde(rename = "vendorErrorCode")]
    pub vendor_error_code: String,
}

impl StatusNotificationRequest {
    /// Error-free notification with empty info/vendor fields
    pub fn clean(connector_id: u32, status: ConnectorStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            connector_id,
            status,
            error_code: ConnectorErrorCode::NoError,
            info: String::new(),
            timestamp,
            vendor_id: String::new(),
            vendor_error_code: String::new(),
        }
    }
}

impl OcppCall for StatusNotificationRequest {
    const ACTION: &'static str = "StatusNotification";
    type Response = StatusNotificationResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusNotificationResponse {}

// =============================================================================
// Server-originated calls
// =============================================================================

/// Reset request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetRequest {
    #[serde(rename = "type")]
    pub reset_type: ResetType,
}

impl OcppCall for ResetRequest {
    const ACTION: &'static str = "Reset";
    type Response = ResetResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub status: ResetStatus,
}

/// RemoteStartTransaction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStartTransactionRequest {
    #[serde(rename = "idTag")]
    pub id_tag: IdToken,
    #[serde(rename = "connectorId", default)]
    pub connector_id: Option<u32>,
}

impl OcppCall for RemoteStartTransactionRequest {
    const ACTION: &'static str = "RemoteStartTransaction";
    type Response = RemoteStartStopResponse;
}

/// Shared reply shape for RemoteStart/RemoteStop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStartStopResponse {
    pub status: RemoteStartStopStatus,
}

/// RemoteStopTransaction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStopTransactionRequest {
    #[serde(rename = "transactionId")]
    pub transaction_id: i32,
}

impl OcppCall for RemoteStopTransactionRequest {
    const ACTION: &'static str = "RemoteStopTransaction";
    type Response = RemoteStartStopResponse;
}

/// TriggerMessage request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerMessageRequest {
    #[serde(rename = "requestedMessage")]
    pub requested_message: MessageTrigger,
    #[serde(rename = "connectorId", default)]
    pub connector_id: Option<u32>,
}

impl OcppCall for TriggerMessageRequest {
    const ACTION: &'static str = "TriggerMessage";
    type Response = TriggerMessageResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerMessageResponse {
    pub status: TriggerMessageStatus,
}

/// ChangeAvailability request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeAvailabilityRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    #[serde(rename = "type")]
    pub availability_type: AvailabilityType,
}

impl OcppCall for ChangeAvailabilityRequest {
    const ACTION: &'static str = "ChangeAvailability";
    type Response = ChangeAvailabilityResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeAvailabilityResponse {
    pub status: AvailabilityStatus,
}

/// UnlockConnector request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockConnectorRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
}

impl OcppCall for UnlockConnectorRequest {
    const ACTION: &'static str = "UnlockConnector";
    type Response = UnlockConnectorResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockConnectorResponse {
    pub status: UnlockStatus,
}

/// GetConfiguration request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetConfigurationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Vec<String>>,
}

impl OcppCall for GetConfigurationRequest {
    const ACTION: &'static str = "GetConfiguration";
    type Response = GetConfigurationResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetConfigurationResponse {
    #[serde(rename = "configurationKey")]
    pub configuration_key: Vec<KeyValue>,
    #[serde(rename = "unknownKey")]
    pub unknown_key: Vec<String>,
}
