//! Engine and dispatcher
//!
//! Owns at most one WebSocket session at a time, demultiplexes inbound
//! frames, serializes outbound writes through one guarded sink and publishes
//! observable state through the event bus.

use crate::config::EngineConfig;
use crate::connectors::ConnectorBank;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::heartbeat::HeartbeatTimer;
use crate::pending::PendingCalls;
use crate::session::{CpStatus, SessionState};
use crate::store::{keys, KvStore, MemoryStore};
use chrono::Utc;
use station_messages::v16::{
    AuthorizeRequest, HeartbeatRequest, MeterValuesRequest, StartTransactionRequest,
    StatusNotificationRequest, StopTransactionRequest,
};
use station_messages::OcppCall;
use station_transport::{
    connect as ws_connect, join_endpoint, LinkEvent, LinkSink, LinkStream, TransportConfig,
    CLIENT_CLOSE_CODE,
};
use station_types::common::{MeterValue, ReadingContext, SampledValue};
use station_types::v16::{AvailabilityType, ConnectorStatus, Reason};
use station_types::{Frame, StationError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How often the pending-call table is checked for timed-out entries
const PENDING_SWEEP_PERIOD: Duration = Duration::from_secs(5);

/// The OCPP charge point engine
pub struct ChargePoint {
    pub(crate) inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pub(crate) config: Mutex<EngineConfig>,
    pub(crate) session: Mutex<SessionState>,
    pub(crate) session_store: MemoryStore,
    pub(crate) durable_store: Arc<dyn KvStore>,
    pub(crate) connectors: ConnectorBank,
    pub(crate) pending: PendingCalls,
    pub(crate) sink: AsyncMutex<Option<LinkSink>>,
    pub(crate) reader: Mutex<Option<JoinHandle<()>>>,
    pub(crate) heartbeat: Mutex<HeartbeatTimer>,
    pub(crate) events: EventBus,
}

impl ChargePoint {
    /// Engine with an in-memory durable store
    pub fn new(config: EngineConfig) -> Self {
        Self::with_durable_store(config, Arc::new(MemoryStore::new()))
    }

    /// Engine over a caller-supplied durable store
    pub fn with_durable_store(config: EngineConfig, durable: Arc<dyn KvStore>) -> Self {
        let session_store = MemoryStore::new();
        let inner = Arc::new(EngineInner {
            config: Mutex::new(config),
            session: Mutex::new(SessionState::new()),
            connectors: ConnectorBank::new(session_store.clone(), Arc::clone(&durable)),
            session_store,
            durable_store: durable,
            pending: PendingCalls::new(),
            sink: AsyncMutex::new(None),
            reader: Mutex::new(None),
            heartbeat: Mutex::new(HeartbeatTimer::new()),
            events: EventBus::new(256),
        });
        Self { inner }
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Current charge-point status
    pub fn status(&self) -> CpStatus {
        self.inner.session().status
    }

    /// Current simulated meter register, Wh
    pub fn meter_value(&self) -> u64 {
        self.inner.session().meter_value_wh
    }

    /// Server-assigned id of the running transaction, if any
    pub fn transaction_id(&self) -> Option<i32> {
        self.inner.session().transaction_id
    }

    /// Snapshot of the configuration
    pub fn config(&self) -> EngineConfig {
        self.inner.config().clone()
    }

    /// Adjust configuration in place (simulation knobs, default tag)
    pub fn update_config(&self, apply: impl FnOnce(&mut EngineConfig)) {
        apply(&mut self.inner.config());
    }

    /// The durable store shared with the operator shell
    pub fn durable_store(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.inner.durable_store)
    }

    /// Open a session to the Central System and send BootNotification.
    ///
    /// Refused when a session is already open: the old socket is closed with
    /// code 3001, ERROR is emitted and the caller may retry.
    pub async fn connect(&self, ws_url: &str, cp_id: &str) -> EngineResult<()> {
        self.inner.connect(ws_url, cp_id).await
    }

    /// Close the session with code 3001 and force DISCONNECTED
    pub async fn disconnect(&self) {
        self.inner.close_clean("client disconnect").await;
        self.inner.abort_reader();
    }

    /// Send Authorize for the given tag
    pub async fn authorize(&self, id_tag: &str) -> EngineResult<()> {
        self.inner
            .send_call(&AuthorizeRequest {
                id_tag: id_tag.to_string(),
            })
            .await
    }

    /// Start a transaction on connector 1 without a reservation
    pub async fn start_transaction(&self, id_tag: &str) -> EngineResult<()> {
        self.inner.start_transaction(id_tag, 1, 0).await
    }

    /// Start a transaction on an explicit connector
    pub async fn start_transaction_on(
        &self,
        id_tag: &str,
        connector_id: u32,
        reservation_id: i32,
    ) -> EngineResult<()> {
        self.inner
            .start_transaction(id_tag, connector_id, reservation_id)
            .await
    }

    /// Stop the running transaction
    pub async fn stop_transaction(&self, id_tag: &str) -> EngineResult<()> {
        let transaction_id = match self.inner.session().transaction_id {
            Some(id) => id,
            None => {
                self.inner
                    .events
                    .log("StopTransaction without a known transaction id");
                0
            }
        };
        self.inner
            .stop_transaction_with_id(transaction_id, Some(id_tag.to_string()))
            .await
    }

    /// Stop an explicit transaction id
    pub async fn stop_transaction_with_id(
        &self,
        transaction_id: i32,
        id_tag: Option<&str>,
    ) -> EngineResult<()> {
        self.inner
            .stop_transaction_with_id(transaction_id, id_tag.map(str::to_string))
            .await
    }

    /// Send a Heartbeat now, independent of the scheduler
    pub async fn send_heartbeat(&self) -> EngineResult<()> {
        self.inner.send_heartbeat().await
    }

    /// Send MeterValues for a connector
    pub async fn send_meter_values(&self, connector_id: u32) -> EngineResult<()> {
        self.inner.send_meter_values(connector_id).await
    }

    /// Set the simulated meter; optionally push MeterValues to the server
    pub async fn set_meter_value(&self, meter_value_wh: u64, update_server: bool) -> EngineResult<()> {
        self.inner.set_meter_value(meter_value_wh);
        if update_server {
            self.inner.send_meter_values(0).await?;
        }
        Ok(())
    }

    /// Session-scoped connector status
    pub fn connector_status(&self, connector_id: u32) -> EngineResult<ConnectorStatus> {
        self.inner.connectors.status(connector_id)
    }

    /// Set a connector status; optionally notify the server
    pub async fn set_connector_status(
        &self,
        connector_id: u32,
        status: ConnectorStatus,
        update_server: bool,
    ) -> EngineResult<()> {
        self.inner
            .set_connector_status(connector_id, status, update_server)
            .await
    }

    /// Durable connector availability
    pub fn availability(&self, connector_id: u32) -> EngineResult<AvailabilityType> {
        self.inner.connectors.availability(connector_id)
    }

    /// Change availability, cascading from connector 0 to the outlets
    pub async fn set_availability(
        &self,
        connector_id: u32,
        availability: AvailabilityType,
    ) -> EngineResult<()> {
        self.inner.apply_availability(connector_id, availability).await
    }
}

impl EngineInner {
    pub(crate) fn session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn config(&self) -> MutexGuard<'_, EngineConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a status transition and publish it
    pub(crate) fn set_status(&self, to: CpStatus, detail: Option<String>) -> EngineResult<()> {
        self.session().transition(to)?;
        self.session_store.put(keys::CP_STATUS, to.as_str());
        self.events.emit(EngineEvent::StatusChanged { status: to, detail });
        Ok(())
    }

    /// Enter ERROR with a detail string; always allowed
    pub(crate) fn enter_error(&self, detail: &str) {
        self.events.log(detail);
        if let Err(e) = self.set_status(CpStatus::Error, Some(detail.to_string())) {
            warn!("{e}");
        }
    }

    /// Serialize and write one frame; the sink mutex forbids interleaving
    pub(crate) async fn send_frame(&self, frame: &Frame) -> EngineResult<()> {
        let text = frame.encode()?;
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            drop(guard);
            self.enter_error("No connection to OCPP server");
            return Err(EngineError::NotConnected);
        };
        if let Err(e) = sink.send_text(text).await {
            drop(guard);
            self.enter_error("ws normal error");
            return Err(e.into());
        }
        Ok(())
    }

    /// Send a typed CALL and register it in the pending table
    pub(crate) async fn send_call<C: OcppCall>(&self, request: &C) -> EngineResult<()> {
        let frame = station_messages::call(request)?;
        let unique_id = frame.unique_id().to_string();
        self.pending.register(&unique_id, C::ACTION);
        self.events.log(format!("Sending {}", C::ACTION));
        if let Err(e) = self.send_frame(&frame).await {
            // the call never left; it will not get a reply
            self.pending.resolve(&unique_id);
            return Err(e);
        }
        Ok(())
    }

    pub(crate) async fn connect(self: &Arc<Self>, ws_url: &str, cp_id: &str) -> EngineResult<()> {
        {
            let mut guard = self.sink.lock().await;
            if let Some(mut old) = guard.take() {
                drop(guard);
                self.enter_error("Connect refused: already connected");
                let _ = old.close(CLIENT_CLOSE_CODE, "superseded").await;
                self.abort_reader();
                self.cancel_heartbeat();
                self.pending.drain();
                return Err(EngineError::AlreadyConnected);
            }
        }

        self.session_store.clear();
        self.session().reset();
        {
            let mut config = self.config();
            config.ws_url = ws_url.to_string();
            config.cp_id = cp_id.to_string();
        }
        self.set_status(CpStatus::Connecting, None)?;

        let endpoint = {
            let config = self.config();
            join_endpoint(&config.ws_url, &config.cp_id)
        };
        let link = match ws_connect(&endpoint, &TransportConfig::default()).await {
            Ok(link) => link,
            Err(e) => {
                warn!("Connect failed: {e}");
                self.enter_error("connection cannot be opened");
                return Err(e.into());
            }
        };
        self.events.log(format!(
            "Connected to {endpoint} ({})",
            link.negotiated_subprotocol().unwrap_or("no subprotocol")
        ));

        let (sink, stream) = link.split();
        *self.sink.lock().await = Some(sink);
        let reader = tokio::spawn(read_loop(Arc::clone(self), stream));
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(reader);

        self.send_boot_notification().await
    }

    /// Close with code 3001 and force DISCONNECTED
    pub(crate) async fn close_clean(&self, reason: &str) {
        self.cancel_heartbeat();
        let dropped = self.pending.drain();
        if dropped > 0 {
            self.events
                .log(format!("Dropped {dropped} unresolved pending call(s)"));
        }
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let _ = sink.close(CLIENT_CLOSE_CODE, reason).await;
        }
        drop(guard);
        if let Err(e) = self.set_status(CpStatus::Disconnected, None) {
            warn!("{e}");
        }
    }

    pub(crate) fn abort_reader(&self) {
        if let Some(handle) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    pub(crate) fn cancel_heartbeat(&self) {
        self.heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Arm the heartbeat with the server-dictated interval
    pub(crate) fn arm_heartbeat(self: &Arc<Self>, interval_secs: i32) {
        if interval_secs <= 0 {
            self.events
                .log(format!("Not arming heartbeat, interval {interval_secs}s"));
            return;
        }
        let period = Duration::from_secs(interval_secs as u64);
        self.heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .arm(period, Arc::downgrade(self));
        self.events
            .log(format!("Heartbeat armed at {interval_secs}s"));
    }

    pub(crate) async fn send_boot_notification(&self) -> EngineResult<()> {
        let request = self.config().identity.to_boot_request();
        self.send_call(&request).await
    }

    pub(crate) async fn send_heartbeat(&self) -> EngineResult<()> {
        self.send_call(&HeartbeatRequest {}).await
    }

    pub(crate) async fn start_transaction(
        &self,
        id_tag: &str,
        connector_id: u32,
        reservation_id: i32,
    ) -> EngineResult<()> {
        // the meter register starts from zero for every transaction
        self.set_meter_value(0);
        let request = StartTransactionRequest {
            connector_id,
            id_tag: id_tag.to_string(),
            meter_start: 0,
            timestamp: Utc::now(),
            reservation_id,
        };
        self.send_call(&request).await?;
        if let Err(e) = self.set_status(CpStatus::InTransaction, None) {
            warn!("{e}");
        }
        self.set_connector_status(connector_id, ConnectorStatus::Charging, true)
            .await
    }

    pub(crate) async fn stop_transaction_with_id(
        &self,
        transaction_id: i32,
        id_tag: Option<String>,
    ) -> EngineResult<()> {
        let meter_value_wh = self.session().meter_value_wh;
        let now = Utc::now();
        let mut begin = SampledValue::energy_register(0);
        begin.context = Some(ReadingContext::TransactionBegin);
        let mut end = SampledValue::energy_register(meter_value_wh);
        end.context = Some(ReadingContext::TransactionEnd);
        let request = StopTransactionRequest {
            transaction_id,
            timestamp: now,
            meter_stop: i32::try_from(meter_value_wh).unwrap_or(i32::MAX),
            reason: Some(Reason::Local),
            id_tag,
            transaction_data: Some(vec![
                MeterValue {
                    timestamp: now,
                    sampled_value: vec![begin],
                },
                MeterValue {
                    timestamp: now,
                    sampled_value: vec![end],
                },
            ]),
        };
        self.send_call(&request).await?;
        if let Err(e) = self.set_status(CpStatus::Authorized, None) {
            warn!("{e}");
        }
        // the server will query the Finishing connector on its own
        self.set_connector_status(1, ConnectorStatus::Finishing, false)
            .await
    }

    pub(crate) async fn send_meter_values(&self, connector_id: u32) -> EngineResult<()> {
        let (meter_value_wh, transaction_id) = {
            let session = self.session();
            (session.meter_value_wh, session.transaction_id)
        };
        if transaction_id.is_none() {
            self.events.log("MeterValues without an active transaction");
        }
        let request = MeterValuesRequest {
            connector_id,
            transaction_id,
            meter_value: vec![MeterValue {
                timestamp: Utc::now(),
                sampled_value: vec![SampledValue::energy_register(meter_value_wh)],
            }],
        };
        self.send_call(&request).await
    }

    /// Local meter write; observers learn about it through the event bus
    pub(crate) fn set_meter_value(&self, meter_value_wh: u64) {
        self.session().meter_value_wh = meter_value_wh;
        self.session_store
            .put(keys::METER_VALUE, &meter_value_wh.to_string());
        self.events
            .emit(EngineEvent::MeterValueChanged { meter_value_wh });
    }

    pub(crate) async fn set_connector_status(
        &self,
        connector_id: u32,
        status: ConnectorStatus,
        notify: bool,
    ) -> EngineResult<()> {
        self.connectors.put_status(connector_id, status)?;
        if notify {
            self.send_status_notification(connector_id, status).await?;
        }
        Ok(())
    }

    pub(crate) async fn send_status_notification(
        &self,
        connector_id: u32,
        status: ConnectorStatus,
    ) -> EngineResult<()> {
        let request = StatusNotificationRequest::clean(connector_id, status, Utc::now());
        self.send_call(&request).await
    }

    /// Change availability; connector 0 cascades to 1 and 2 after the local
    /// update and event
    pub(crate) async fn apply_availability(
        &self,
        connector_id: u32,
        availability: AvailabilityType,
    ) -> EngineResult<()> {
        self.apply_availability_one(connector_id, availability)
            .await?;
        if connector_id == 0 {
            for child in 1..crate::connectors::CONNECTOR_COUNT {
                self.apply_availability_one(child, availability).await?;
            }
        }
        Ok(())
    }

    async fn apply_availability_one(
        &self,
        connector_id: u32,
        availability: AvailabilityType,
    ) -> EngineResult<()> {
        self.connectors.put_availability(connector_id, availability)?;
        let status = match availability {
            AvailabilityType::Inoperative => ConnectorStatus::Unavailable,
            AvailabilityType::Operative => ConnectorStatus::Available,
        };
        self.set_connector_status(connector_id, status, true).await?;
        self.events.emit(EngineEvent::AvailabilityChanged {
            connector_id,
            availability,
        });
        Ok(())
    }

    /// Sweep the pending table; timed-out calls are surfaced and dropped
    pub(crate) fn expire_pending(&self) {
        let ttl = self.config().call_timeout();
        for (unique_id, action) in self.pending.expired(ttl) {
            self.events
                .log(format!("Call timed out: {action} ({unique_id})"));
        }
    }

    /// One inbound text frame
    pub(crate) async fn handle_wire_text(self: &Arc<Self>, text: &str) {
        match Frame::decode(text) {
            Ok(Frame::Call {
                unique_id,
                action,
                payload,
            }) => {
                self.events.log(format!("Received {action}"));
                let (reply, follow_up) = self.handle_inbound_call(&unique_id, &action, payload);
                if let Err(e) = self.send_frame(&reply).await {
                    warn!("Failed to answer {action}: {e}");
                    return;
                }
                if let Some(follow_up) = follow_up {
                    self.run_follow_up(follow_up).await;
                }
            }
            Ok(Frame::CallResult { unique_id, payload }) => {
                match self.pending.resolve(&unique_id) {
                    Some(action) => self.handle_call_result(&action, payload).await,
                    None => self
                        .events
                        .log(format!("Dropping reply with unknown id {unique_id}")),
                }
            }
            Ok(Frame::CallError {
                unique_id,
                code,
                description,
                ..
            }) => match self.pending.resolve(&unique_id) {
                Some(action) => self
                    .events
                    .log(format!("{action} failed: {code} ({description})")),
                None => self
                    .events
                    .log(format!("Dropping error with unknown id {unique_id}")),
            },
            Err(StationError::InvalidMessageType(tag)) => {
                self.events
                    .log(format!("Dropping message with unknown type tag {tag}"));
            }
            Err(e) => {
                // the server may recover; the socket stays open
                self.enter_error(&format!("protocol error: {e}"));
            }
        }
    }

    /// Peer-initiated close; 3001 is the agreed clean close
    pub(crate) async fn handle_remote_close(&self, code: Option<u16>) {
        {
            let mut guard = self.sink.lock().await;
            if guard.is_none() {
                // already torn down locally
                return;
            }
            *guard = None;
        }
        self.cancel_heartbeat();
        self.pending.drain();
        match code {
            Some(CLIENT_CLOSE_CODE) => {
                if let Err(e) = self.set_status(CpStatus::Disconnected, None) {
                    warn!("{e}");
                }
            }
            Some(code) => self.enter_error(&format!("Connection error: {code}")),
            None => self.enter_error("websocket error"),
        }
    }

    /// Stream-level failure while the link was open
    pub(crate) async fn handle_stream_error(&self) {
        {
            let mut guard = self.sink.lock().await;
            if guard.is_none() {
                return;
            }
            *guard = None;
        }
        self.cancel_heartbeat();
        self.pending.drain();
        self.enter_error("ws normal error");
    }
}

/// Socket read loop; also hosts the pending-call timeout sweep
async fn read_loop(engine: Arc<EngineInner>, mut stream: LinkStream) {
    let mut sweep = tokio::time::interval(PENDING_SWEEP_PERIOD);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = sweep.tick() => engine.expire_pending(),
            event = stream.next_event() => match event {
                Some(Ok(LinkEvent::Text(text))) => engine.handle_wire_text(&text).await,
                Some(Ok(LinkEvent::Closed { code, .. })) => {
                    engine.handle_remote_close(code).await;
                    break;
                }
                Some(Err(e)) => {
                    warn!("WebSocket read failed: {e}");
                    engine.handle_stream_error().await;
                    break;
                }
                None => {
                    engine.handle_remote_close(None).await;
                    break;
                }
            }
        }
    }
    debug!("Reader loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::Receiver;

    async fn next_event(receiver: &mut Receiver<EngineEvent>) -> EngineEvent {
        tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("no event within 1s")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_send_without_socket_enters_error() {
        let cp = ChargePoint::new(EngineConfig::default());
        let mut events = cp.subscribe();

        let err = cp.send_heartbeat().await.unwrap_err();
        assert!(matches!(err, EngineError::NotConnected));
        assert_eq!(cp.status(), CpStatus::Error);

        // log lines for the attempted send and the failure, then the status
        let mut saw_status = false;
        for _ in 0..4 {
            if let EngineEvent::StatusChanged { status, detail } = next_event(&mut events).await {
                assert_eq!(status, CpStatus::Error);
                assert_eq!(detail.as_deref(), Some("No connection to OCPP server"));
                saw_status = true;
                break;
            }
        }
        assert!(saw_status);
    }

    #[tokio::test]
    async fn test_set_meter_value_locally() {
        let cp = ChargePoint::new(EngineConfig::default());
        let mut events = cp.subscribe();

        cp.set_meter_value(5000, false).await.unwrap();
        assert_eq!(cp.meter_value(), 5000);
        assert_eq!(
            next_event(&mut events).await,
            EngineEvent::MeterValueChanged {
                meter_value_wh: 5000
            }
        );
    }

    #[tokio::test]
    async fn test_connector_defaults() {
        let cp = ChargePoint::new(EngineConfig::default());
        assert_eq!(cp.connector_status(1).unwrap(), ConnectorStatus::Available);
        assert_eq!(cp.availability(1).unwrap(), AvailabilityType::Operative);
        assert!(cp.connector_status(3).is_err());
    }

    #[tokio::test]
    async fn test_disconnect_without_session_forces_disconnected() {
        let cp = ChargePoint::new(EngineConfig::default());
        cp.disconnect().await;
        assert_eq!(cp.status(), CpStatus::Disconnected);
    }
}
