//! # Station Engine
//!
//! The OCPP 1.6 protocol engine behind a simulated charge point: session
//! state machine, pending-call correlation, per-connector state, heartbeat
//! scheduling and the WebSocket dispatcher. The UI shell drives it through
//! [`ChargePoint`] and observes it through [`EngineEvent`].

pub mod config;
pub mod connectors;
pub mod engine;
pub mod error;
pub mod events;
mod handlers;
mod heartbeat;
pub mod pending;
pub mod session;
pub mod store;

pub use config::{EngineConfig, Settings, StationIdentity};
pub use engine::ChargePoint;
pub use error::{EngineError, EngineResult};
pub use events::{EngineEvent, LOG_PREFIX};
pub use session::CpStatus;
