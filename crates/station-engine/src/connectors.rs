//! Per-connector state
//!
//! Status is session-scoped and evaporates with the socket; availability is
//! durable and survives restarts. The two never share a store.

use crate::error::{EngineError, EngineResult};
use crate::store::{keys, KvStore, MemoryStore};
use std::sync::Arc;
use station_types::v16::{AvailabilityType, ConnectorStatus};
use tracing::warn;

/// Connector 0 is the charge point itself; 1 and 2 are the outlets
pub const CONNECTOR_COUNT: u32 = 3;

/// Storage facade for connector status and availability
#[derive(Clone)]
pub struct ConnectorBank {
    session: MemoryStore,
    durable: Arc<dyn KvStore>,
}

impl ConnectorBank {
    pub fn new(session: MemoryStore, durable: Arc<dyn KvStore>) -> Self {
        Self { session, durable }
    }

    fn check(connector_id: u32) -> EngineResult<()> {
        if connector_id < CONNECTOR_COUNT {
            Ok(())
        } else {
            Err(EngineError::InvalidConnectorId(connector_id))
        }
    }

    /// Session-scoped status; defaults to Available
    pub fn status(&self, connector_id: u32) -> EngineResult<ConnectorStatus> {
        Self::check(connector_id)?;
        let raw = self
            .session
            .get_or(&keys::conn_status(connector_id), "Available");
        Ok(raw.parse().unwrap_or_else(|e: String| {
            warn!("{e}; falling back to Available");
            ConnectorStatus::Available
        }))
    }

    pub fn put_status(&self, connector_id: u32, status: ConnectorStatus) -> EngineResult<()> {
        Self::check(connector_id)?;
        self.session
            .put(&keys::conn_status(connector_id), status.as_str());
        Ok(())
    }

    /// Durable availability; defaults to Operative
    pub fn availability(&self, connector_id: u32) -> EngineResult<AvailabilityType> {
        Self::check(connector_id)?;
        let raw = self
            .durable
            .get_or(&keys::conn_availability(connector_id), "Operative");
        Ok(raw.parse().unwrap_or_else(|e: String| {
            warn!("{e}; falling back to Operative");
            AvailabilityType::Operative
        }))
    }

    pub fn put_availability(
        &self,
        connector_id: u32,
        availability: AvailabilityType,
    ) -> EngineResult<()> {
        Self::check(connector_id)?;
        self.durable
            .put(&keys::conn_availability(connector_id), availability.as_str());
        Ok(())
    }
}
