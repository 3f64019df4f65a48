//! Engine events published to external observers

use crate::session::CpStatus;
use serde::Serialize;
use station_types::v16::AvailabilityType;
use tokio::sync::broadcast;
use tracing::info;

/// Prefix applied to every engine log line
pub const LOG_PREFIX: &str = "[OCPP] ";

/// Events an observer (the UI shell) can subscribe to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "data")]
pub enum EngineEvent {
    /// Charge-point status changed; detail carries the error text, if any
    StatusChanged {
        status: CpStatus,
        detail: Option<String>,
    },
    /// Durable availability of a connector changed
    AvailabilityChanged {
        connector_id: u32,
        availability: AvailabilityType,
    },
    /// The simulated meter register moved
    MeterValueChanged { meter_value_wh: u64 },
    /// One engine log line, already prefixed
    Log { message: String },
}

/// Broadcast fan-out for engine events
#[derive(Debug)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; observers may or may not exist
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    /// Publish a prefixed log line and mirror it to tracing
    pub fn log(&self, message: impl AsRef<str>) {
        let message = format!("{LOG_PREFIX}{}", message.as_ref());
        info!("{message}");
        self.emit(EngineEvent::Log { message });
    }
}
