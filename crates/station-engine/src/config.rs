//! Engine configuration and durable operator settings

use crate::store::{keys, KvStore};
use serde::{Deserialize, Serialize};
use station_messages::v16::BootNotificationRequest;
use station_types::v16::RemoteStartStopStatus;
use std::time::Duration;

/// Engine configuration, immutable over one session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Central System base URL; the caller supplies the trailing slash
    pub ws_url: String,
    /// Charge point identifier appended to the URL
    pub cp_id: String,
    /// Tag used when a command does not name one
    pub default_id_tag: String,
    /// Identity sent in BootNotification
    pub identity: StationIdentity,
    /// Simulated reaction time before a remote start is executed
    pub remote_start_delay_secs: u64,
    /// Reply given to RemoteStart/RemoteStopTransaction
    pub remote_start_stop_response: RemoteStartStopStatus,
    /// How long a CALL may wait for its reply
    pub call_timeout_secs: u64,
}

impl EngineConfig {
    pub fn remote_start_delay(&self) -> Duration {
        Duration::from_secs(self.remote_start_delay_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:9000/".to_string(),
            cp_id: "CP01".to_string(),
            default_id_tag: "DEADBEEF".to_string(),
            identity: StationIdentity::default(),
            remote_start_delay_secs: 0,
            remote_start_stop_response: RemoteStartStopStatus::Accepted,
            call_timeout_secs: 30,
        }
    }
}

/// Fixed vendor identity reported at boot.
///
/// None of these values are protocol-critical, but BootNotification must
/// carry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationIdentity {
    pub vendor: String,
    pub model: String,
    pub charge_point_serial: Option<String>,
    pub charge_box_serial: Option<String>,
    pub firmware_version: Option<String>,
    pub meter_type: Option<String>,
    pub meter_serial: Option<String>,
}

impl StationIdentity {
    /// Build the BootNotification payload
    pub fn to_boot_request(&self) -> BootNotificationRequest {
        BootNotificationRequest {
            charge_point_vendor: self.vendor.clone(),
            charge_point_model: self.model.clone(),
            charge_point_serial_number: self.charge_point_serial.clone(),
            charge_box_serial_number: self.charge_box_serial.clone(),
            firmware_version: self.firmware_version.clone(),
            iccid: None,
            imsi: None,
            meter_type: self.meter_type.clone(),
            meter_serial_number: self.meter_serial.clone(),
        }
    }
}

impl Default for StationIdentity {
    fn default() -> Self {
        Self {
            vendor: "Elmo".to_string(),
            model: "Elmo Virtual CP".to_string(),
            charge_point_serial: Some("ELM.CP.001".to_string()),
            charge_box_serial: Some("ELM.BOX.001".to_string()),
            firmware_version: Some("0.9.1".to_string()),
            meter_type: Some("Software".to_string()),
            meter_serial: Some("ELM.MTR.001".to_string()),
        }
    }
}

/// Operator settings persisted in the durable store
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub ws_url: String,
    pub cp_id: String,
    pub tag: String,
}

impl Settings {
    /// Load from the durable store, falling back to the engine defaults
    pub fn load(store: &dyn KvStore) -> Self {
        let defaults = EngineConfig::default();
        Self {
            ws_url: store.get_or(keys::WS_URL, &defaults.ws_url),
            cp_id: store.get_or(keys::CP_ID, &defaults.cp_id),
            tag: store.get_or(keys::TAG, &defaults.default_id_tag),
        }
    }

    /// Persist to the durable store
    pub fn save(&self, store: &dyn KvStore) {
        store.put(keys::WS_URL, &self.ws_url);
        store.put(keys::CP_ID, &self.cp_id);
        store.put(keys::TAG, &self.tag);
    }
}
