//! Charge-point-wide session state machine

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Charge-point status over one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CpStatus {
    Disconnected,
    Connecting,
    Connected,
    Authorized,
    InTransaction,
    Error,
}

impl CpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CpStatus::Disconnected => "DISCONNECTED",
            CpStatus::Connecting => "CONNECTING",
            CpStatus::Connected => "CONNECTED",
            CpStatus::Authorized => "AUTHORIZED",
            CpStatus::InTransaction => "IN_TRANSACTION",
            CpStatus::Error => "ERROR",
        }
    }

    /// Whether moving from `self` to `to` is an allowed transition.
    ///
    /// Error is reachable from every state; staying in place is always fine.
    pub fn can_transition(&self, to: CpStatus) -> bool {
        use CpStatus::*;

        if *self == to || to == Error {
            return true;
        }
        matches!(
            (*self, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Authorized)
                | (Connected, InTransaction)
                | (Connected, Disconnected)
                | (Authorized, InTransaction)
                | (Authorized, Connected)
                | (Authorized, Disconnected)
                | (InTransaction, Authorized)
                | (InTransaction, Disconnected)
                | (Error, Connecting)
                | (Error, Disconnected)
        )
    }
}

impl std::fmt::Display for CpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State scoped to one WebSocket session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub status: CpStatus,
    /// Simulated energy register, Wh
    pub meter_value_wh: u64,
    /// Server-assigned id of the running transaction
    pub transaction_id: Option<i32>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            status: CpStatus::Disconnected,
            meter_value_wh: 0,
            transaction_id: None,
        }
    }

    /// Reset to the initial state; done when a new session starts
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Apply a status transition, returning the previous status
    pub fn transition(&mut self, to: CpStatus) -> EngineResult<CpStatus> {
        if !self.status.can_transition(to) {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        let old = self.status;
        self.status = to;
        Ok(old)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
