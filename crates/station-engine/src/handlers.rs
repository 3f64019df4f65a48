//! Operation handlers
//!
//! Inbound CALLs are answered immediately; anything the action implies beyond
//! the reply (closing the socket, starting a transaction, cascading an
//! availability change) is returned as a follow-up so the reply always goes
//! out first. CALLRESULTs are routed here by the action recorded in the
//! pending-call table.

use crate::engine::EngineInner;
use crate::error::EngineResult;
use crate::session::CpStatus;
use crate::store::keys;
use crate::store::KvStore;
use serde_json::Value;
use station_messages::v16::{
    AuthorizeRequest, BootNotificationRequest, ChangeAvailabilityRequest,
    ChangeAvailabilityResponse, GetConfigurationRequest, GetConfigurationResponse,
    HeartbeatRequest, MeterValuesRequest, RemoteStartStopResponse, RemoteStartTransactionRequest,
    RemoteStopTransactionRequest, ResetRequest, ResetResponse, StartTransactionRequest,
    StatusNotificationRequest, StopTransactionRequest, TriggerMessageRequest,
    TriggerMessageResponse, UnlockConnectorRequest, UnlockConnectorResponse,
};
use station_messages::{call_result, parse_request, parse_response, OcppCall};
use station_types::v16::{
    AuthorizationStatus, AvailabilityStatus, AvailabilityType, ConnectorStatus, KeyValue,
    MessageTrigger, RegistrationStatus, RemoteStartStopStatus, ResetStatus, TriggerMessageStatus,
    UnlockStatus,
};
use station_types::{CallErrorCode, Frame, StationError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Action to run after an inbound CALL has been answered
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FollowUp {
    CloseSocket,
    RemoteStart { id_tag: String, connector_id: u32 },
    RemoteStop { transaction_id: i32 },
    Trigger {
        requested: MessageTrigger,
        connector_id: Option<u32>,
    },
    ChangeAvailability {
        connector_id: u32,
        availability: AvailabilityType,
    },
}

fn result_frame<C: OcppCall>(unique_id: &str, response: &C::Response) -> Frame {
    call_result::<C>(unique_id, response)
        .unwrap_or_else(|e| Frame::call_error(unique_id, CallErrorCode::InternalError, &e.to_string()))
}

fn formation_violation(unique_id: &str, err: &StationError) -> Frame {
    Frame::call_error(unique_id, CallErrorCode::FormationViolation, &err.to_string())
}

/// TriggerMessage parsed leniently: unknown trigger names are acknowledged
/// and ignored rather than rejected
#[derive(serde::Deserialize)]
struct RawTriggerMessage {
    #[serde(rename = "requestedMessage")]
    requested_message: String,
    #[serde(rename = "connectorId", default)]
    connector_id: Option<u32>,
}

impl EngineInner {
    /// Answer one server-originated CALL
    pub(crate) fn handle_inbound_call(
        &self,
        unique_id: &str,
        action: &str,
        payload: Value,
    ) -> (Frame, Option<FollowUp>) {
        match action {
            ResetRequest::ACTION => self.on_reset(unique_id, payload),
            RemoteStartTransactionRequest::ACTION => self.on_remote_start(unique_id, payload),
            RemoteStopTransactionRequest::ACTION => self.on_remote_stop(unique_id, payload),
            TriggerMessageRequest::ACTION => self.on_trigger_message(unique_id, payload),
            ChangeAvailabilityRequest::ACTION => self.on_change_availability(unique_id, payload),
            UnlockConnectorRequest::ACTION => self.on_unlock_connector(unique_id, payload),
            GetConfigurationRequest::ACTION => self.on_get_configuration(unique_id),
            other => {
                self.events.log(format!("Unknown action {other}"));
                (
                    Frame::call_error(
                        unique_id,
                        CallErrorCode::NotImplemented,
                        &format!("{other} is not implemented"),
                    ),
                    None,
                )
            }
        }
    }

    fn on_reset(&self, unique_id: &str, payload: Value) -> (Frame, Option<FollowUp>) {
        match parse_request::<ResetRequest>(payload) {
            Ok(request) => {
                self.events.log(format!(
                    "Reset ({:?}) accepted; closing connection",
                    request.reset_type
                ));
                (
                    result_frame::<ResetRequest>(
                        unique_id,
                        &ResetResponse {
                            status: ResetStatus::Accepted,
                        },
                    ),
                    Some(FollowUp::CloseSocket),
                )
            }
            Err(e) => (formation_violation(unique_id, &e), None),
        }
    }

    fn on_remote_start(&self, unique_id: &str, payload: Value) -> (Frame, Option<FollowUp>) {
        match parse_request::<RemoteStartTransactionRequest>(payload) {
            Ok(request) => {
                let status = self.config().remote_start_stop_response;
                let follow_up = if status == RemoteStartStopStatus::Accepted {
                    Some(FollowUp::RemoteStart {
                        id_tag: request.id_tag,
                        connector_id: request.connector_id.unwrap_or(1),
                    })
                } else {
                    self.events.log("RemoteStartTransaction rejected by policy");
                    None
                };
                (
                    result_frame::<RemoteStartTransactionRequest>(
                        unique_id,
                        &RemoteStartStopResponse { status },
                    ),
                    follow_up,
                )
            }
            Err(e) => (formation_violation(unique_id, &e), None),
        }
    }

    fn on_remote_stop(&self, unique_id: &str, payload: Value) -> (Frame, Option<FollowUp>) {
        match parse_request::<RemoteStopTransactionRequest>(payload) {
            Ok(request) => {
                let status = self.config().remote_start_stop_response;
                let follow_up = if status == RemoteStartStopStatus::Accepted {
                    Some(FollowUp::RemoteStop {
                        transaction_id: request.transaction_id,
                    })
                } else {
                    self.events.log("RemoteStopTransaction rejected by policy");
                    None
                };
                (
                    result_frame::<RemoteStopTransactionRequest>(
                        unique_id,
                        &RemoteStartStopResponse { status },
                    ),
                    follow_up,
                )
            }
            Err(e) => (formation_violation(unique_id, &e), None),
        }
    }

    fn on_trigger_message(&self, unique_id: &str, payload: Value) -> (Frame, Option<FollowUp>) {
        let raw: RawTriggerMessage = match serde_json::from_value(payload) {
            Ok(raw) => raw,
            Err(e) => {
                return (
                    Frame::call_error(unique_id, CallErrorCode::FormationViolation, &e.to_string()),
                    None,
                )
            }
        };
        let reply = result_frame::<TriggerMessageRequest>(
            unique_id,
            &TriggerMessageResponse {
                status: TriggerMessageStatus::Accepted,
            },
        );
        match serde_json::from_value::<MessageTrigger>(Value::String(raw.requested_message.clone()))
        {
            Ok(requested) => (
                reply,
                Some(FollowUp::Trigger {
                    requested,
                    connector_id: raw.connector_id,
                }),
            ),
            Err(_) => {
                self.events
                    .log(format!("Unknown trigger {}", raw.requested_message));
                (reply, None)
            }
        }
    }

    fn on_change_availability(&self, unique_id: &str, payload: Value) -> (Frame, Option<FollowUp>) {
        match parse_request::<ChangeAvailabilityRequest>(payload) {
            Ok(request) => (
                result_frame::<ChangeAvailabilityRequest>(
                    unique_id,
                    &ChangeAvailabilityResponse {
                        status: AvailabilityStatus::Accepted,
                    },
                ),
                Some(FollowUp::ChangeAvailability {
                    connector_id: request.connector_id,
                    availability: request.availability_type,
                }),
            ),
            Err(e) => (formation_violation(unique_id, &e), None),
        }
    }

    fn on_unlock_connector(&self, unique_id: &str, payload: Value) -> (Frame, Option<FollowUp>) {
        match parse_request::<UnlockConnectorRequest>(payload) {
            Ok(request) => {
                // TODO: consult the connector state before acknowledging
                self.events.log(format!(
                    "UnlockConnector {} acknowledged (no-op)",
                    request.connector_id
                ));
                (
                    result_frame::<UnlockConnectorRequest>(
                        unique_id,
                        &UnlockConnectorResponse {
                            status: UnlockStatus::Accepted,
                        },
                    ),
                    None,
                )
            }
            Err(e) => (formation_violation(unique_id, &e), None),
        }
    }

    fn on_get_configuration(&self, unique_id: &str) -> (Frame, Option<FollowUp>) {
        // TODO: report the interval the heartbeat timer is actually armed with
        let response = GetConfigurationResponse {
            configuration_key: vec![KeyValue {
                key: "HeartbeatInterval".to_string(),
                readonly: false,
                value: Some("900".to_string()),
            }],
            unknown_key: vec![],
        };
        (
            result_frame::<GetConfigurationRequest>(unique_id, &response),
            None,
        )
    }

    /// Route a CALLRESULT back to the handler of the original action
    pub(crate) async fn handle_call_result(self: &Arc<Self>, action: &str, payload: Value) {
        match action {
            BootNotificationRequest::ACTION => self.on_boot_result(payload).await,
            AuthorizeRequest::ACTION => self.on_authorize_result(payload),
            StartTransactionRequest::ACTION => self.on_start_result(payload),
            StopTransactionRequest::ACTION => self.on_stop_result(payload).await,
            HeartbeatRequest::ACTION => match parse_response::<HeartbeatRequest>(payload) {
                Ok(response) => debug!("Heartbeat acknowledged at {}", response.current_time),
                Err(e) => warn!("Bad Heartbeat response: {e}"),
            },
            MeterValuesRequest::ACTION => debug!("MeterValues acknowledged"),
            StatusNotificationRequest::ACTION => debug!("StatusNotification acknowledged"),
            other => warn!("Reply for unhandled action {other}"),
        }
    }

    async fn on_boot_result(self: &Arc<Self>, payload: Value) {
        match parse_response::<BootNotificationRequest>(payload) {
            Ok(response) if response.status == RegistrationStatus::Accepted => {
                self.events.log(format!(
                    "Boot notification accepted, interval {}s",
                    response.interval
                ));
                if let Err(e) = self.set_status(CpStatus::Connected, None) {
                    warn!("{e}");
                }
                self.arm_heartbeat(response.interval);
            }
            Ok(response) => {
                self.events.log(format!(
                    "Boot notification not accepted: {:?}",
                    response.status
                ));
                self.close_clean("boot rejected").await;
            }
            Err(e) => self.enter_error(&format!("bad BootNotification response: {e}")),
        }
    }

    fn on_authorize_result(&self, payload: Value) {
        match parse_response::<AuthorizeRequest>(payload) {
            Ok(response) => {
                if response.id_tag_info.status == AuthorizationStatus::Invalid {
                    self.events.log("Authorization invalid");
                } else {
                    self.events
                        .log(format!("Authorization {:?}", response.id_tag_info.status));
                    if let Err(e) = self.set_status(CpStatus::Authorized, None) {
                        warn!("{e}");
                    }
                }
            }
            Err(e) => self.enter_error(&format!("bad Authorize response: {e}")),
        }
    }

    fn on_start_result(&self, payload: Value) {
        match parse_response::<StartTransactionRequest>(payload) {
            Ok(response) => match response.transaction_id {
                Some(id) if id != 0 => {
                    self.session().transaction_id = Some(id);
                    self.session_store.put(keys::TRANSACTION_ID, &id.to_string());
                    self.events.log(format!("Transaction {id} running"));
                }
                _ => self
                    .events
                    .log("StartTransaction reply carried no usable transaction id"),
            },
            Err(e) => self.enter_error(&format!("bad StartTransaction response: {e}")),
        }
    }

    async fn on_stop_result(&self, payload: Value) {
        match parse_response::<StopTransactionRequest>(payload) {
            Ok(_) => {
                self.events.log("Transaction stopped");
                if let Err(e) = self
                    .set_connector_status(1, ConnectorStatus::Available, false)
                    .await
                {
                    warn!("{e}");
                }
            }
            Err(e) => self.enter_error(&format!("bad StopTransaction response: {e}")),
        }
    }

    /// Run the action implied by an already-answered inbound CALL
    pub(crate) async fn run_follow_up(self: &Arc<Self>, follow_up: FollowUp) {
        match follow_up {
            FollowUp::CloseSocket => self.close_clean("reset").await,
            FollowUp::RemoteStart {
                id_tag,
                connector_id,
            } => {
                // simulated reaction time; frames keep flowing meanwhile
                let delay = self.config().remote_start_delay();
                let engine = Arc::downgrade(self);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let Some(engine) = engine.upgrade() else { return };
                    if let Err(e) = engine.start_transaction(&id_tag, connector_id, 0).await {
                        warn!("Remote start failed: {e}");
                    }
                });
            }
            FollowUp::RemoteStop { transaction_id } => {
                if let Err(e) = self.stop_transaction_with_id(transaction_id, None).await {
                    warn!("Remote stop failed: {e}");
                }
            }
            FollowUp::Trigger {
                requested,
                connector_id,
            } => {
                if let Err(e) = self.run_trigger(requested, connector_id).await {
                    warn!("Trigger {requested:?} failed: {e}");
                }
            }
            FollowUp::ChangeAvailability {
                connector_id,
                availability,
            } => {
                if let Err(e) = self.apply_availability(connector_id, availability).await {
                    warn!("ChangeAvailability failed: {e}");
                }
            }
        }
    }

    async fn run_trigger(
        &self,
        requested: MessageTrigger,
        connector_id: Option<u32>,
    ) -> EngineResult<()> {
        match requested {
            MessageTrigger::BootNotification => self.send_boot_notification().await,
            MessageTrigger::Heartbeat => self.send_heartbeat().await,
            MessageTrigger::MeterValues => self.send_meter_values(connector_id.unwrap_or(0)).await,
            MessageTrigger::StatusNotification => {
                let connector_id = connector_id.unwrap_or(0);
                let status = self.connectors.status(connector_id)?;
                self.send_status_notification(connector_id, status).await
            }
            MessageTrigger::DiagnosticsStatusNotification
            | MessageTrigger::FirmwareStatusNotification => {
                self.events
                    .log(format!("{requested:?} acknowledged; nothing to report"));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::ChargePoint;
    use serde_json::json;

    fn payload_of(frame: &Frame) -> &Value {
        match frame {
            Frame::CallResult { payload, .. } => payload,
            other => panic!("expected CallResult, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_action_gets_not_implemented() {
        let cp = ChargePoint::new(EngineConfig::default());
        let (reply, follow_up) = cp.inner.handle_inbound_call("u1", "FooBar", json!({}));

        match reply {
            Frame::CallError {
                unique_id, code, ..
            } => {
                assert_eq!(unique_id, "u1");
                assert_eq!(code, CallErrorCode::NotImplemented);
            }
            other => panic!("expected CallError, got {other:?}"),
        }
        assert_eq!(follow_up, None);
    }

    #[test]
    fn test_reset_accepted_then_closes() {
        let cp = ChargePoint::new(EngineConfig::default());
        let (reply, follow_up) =
            cp.inner
                .handle_inbound_call("u2", "Reset", json!({"type": "Soft"}));

        assert_eq!(payload_of(&reply)["status"], "Accepted");
        assert_eq!(follow_up, Some(FollowUp::CloseSocket));
    }

    #[test]
    fn test_reset_with_bad_payload_is_formation_violation() {
        let cp = ChargePoint::new(EngineConfig::default());
        let (reply, follow_up) =
            cp.inner
                .handle_inbound_call("u3", "Reset", json!({"type": "Gentle"}));

        assert!(matches!(
            reply,
            Frame::CallError {
                code: CallErrorCode::FormationViolation,
                ..
            }
        ));
        assert_eq!(follow_up, None);
    }

    #[test]
    fn test_remote_start_accepted_defaults_to_connector_1() {
        let cp = ChargePoint::new(EngineConfig::default());
        let (reply, follow_up) =
            cp.inner
                .handle_inbound_call("u4", "RemoteStartTransaction", json!({"idTag": "T1"}));

        assert_eq!(payload_of(&reply)["status"], "Accepted");
        assert_eq!(
            follow_up,
            Some(FollowUp::RemoteStart {
                id_tag: "T1".to_string(),
                connector_id: 1,
            })
        );
    }

    #[test]
    fn test_remote_start_rejected_policy_has_no_follow_up() {
        let cp = ChargePoint::new(EngineConfig::default());
        cp.update_config(|config| {
            config.remote_start_stop_response = RemoteStartStopStatus::Rejected;
        });

        let (reply, follow_up) =
            cp.inner
                .handle_inbound_call("u5", "RemoteStartTransaction", json!({"idTag": "T1"}));

        assert_eq!(payload_of(&reply)["status"], "Rejected");
        assert_eq!(follow_up, None);
    }

    #[test]
    fn test_unknown_trigger_is_acknowledged_without_follow_up() {
        let cp = ChargePoint::new(EngineConfig::default());
        let (reply, follow_up) = cp.inner.handle_inbound_call(
            "u6",
            "TriggerMessage",
            json!({"requestedMessage": "Gobbledygook"}),
        );

        assert_eq!(payload_of(&reply)["status"], "Accepted");
        assert_eq!(follow_up, None);
    }

    #[test]
    fn test_trigger_meter_values_carries_connector() {
        let cp = ChargePoint::new(EngineConfig::default());
        let (_, follow_up) = cp.inner.handle_inbound_call(
            "u7",
            "TriggerMessage",
            json!({"requestedMessage": "MeterValues", "connectorId": 1}),
        );

        assert_eq!(
            follow_up,
            Some(FollowUp::Trigger {
                requested: MessageTrigger::MeterValues,
                connector_id: Some(1),
            })
        );
    }

    #[test]
    fn test_change_availability_follow_up() {
        let cp = ChargePoint::new(EngineConfig::default());
        let (reply, follow_up) = cp.inner.handle_inbound_call(
            "u8",
            "ChangeAvailability",
            json!({"connectorId": 0, "type": "Inoperative"}),
        );

        assert_eq!(payload_of(&reply)["status"], "Accepted");
        assert_eq!(
            follow_up,
            Some(FollowUp::ChangeAvailability {
                connector_id: 0,
                availability: AvailabilityType::Inoperative,
            })
        );
    }

    #[test]
    fn test_get_configuration_reports_fixed_key() {
        let cp = ChargePoint::new(EngineConfig::default());
        let (reply, follow_up) = cp.inner.handle_inbound_call("u9", "GetConfiguration", json!({}));

        let payload = payload_of(&reply);
        assert_eq!(payload["configurationKey"][0]["key"], "HeartbeatInterval");
        assert_eq!(payload["configurationKey"][0]["readonly"], false);
        assert_eq!(payload["configurationKey"][0]["value"], "900");
        assert_eq!(payload["unknownKey"], json!([]));
        assert_eq!(follow_up, None);
    }

    #[test]
    fn test_unlock_connector_is_a_no_op_accept() {
        let cp = ChargePoint::new(EngineConfig::default());
        let (reply, follow_up) =
            cp.inner
                .handle_inbound_call("u10", "UnlockConnector", json!({"connectorId": 1}));

        assert_eq!(payload_of(&reply)["status"], "Accepted");
        assert_eq!(follow_up, None);
    }
}
