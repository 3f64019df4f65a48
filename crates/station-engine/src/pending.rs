//! Pending-call table
//!
//! Every outbound CALL is registered here under its unique id; the reply
//! routes back to the right handler by looking the id up again. A single
//! last-action slot would be overwritten by an interleaved Heartbeat, so the
//! table is keyed, not scalar.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Default reply timeout; OCPP-J does not specify one
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// One outstanding CALL
#[derive(Debug, Clone)]
struct PendingCall {
    action: String,
    sent_at: Instant,
}

/// Table of CALLs awaiting their CALLRESULT/CALLERROR
#[derive(Debug, Default)]
pub struct PendingCalls {
    entries: DashMap<String, PendingCall>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outbound CALL at send time
    pub fn register(&self, unique_id: &str, action: &str) {
        self.entries.insert(
            unique_id.to_string(),
            PendingCall {
                action: action.to_string(),
                sent_at: Instant::now(),
            },
        );
    }

    /// Resolve a reply: removes the entry and returns the original action
    pub fn resolve(&self, unique_id: &str) -> Option<String> {
        self.entries.remove(unique_id).map(|(_, call)| call.action)
    }

    /// Whether a CALL with this id is still outstanding
    pub fn contains(&self, unique_id: &str) -> bool {
        self.entries.contains_key(unique_id)
    }

    /// Drop every entry; returns how many were outstanding
    pub fn drain(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Remove and return entries older than `ttl` as `(unique_id, action)`
    pub fn expired(&self, ttl: Duration) -> Vec<(String, String)> {
        let mut timed_out = Vec::new();
        self.entries.retain(|unique_id, call| {
            if call.sent_at.elapsed() >= ttl {
                timed_out.push((unique_id.clone(), call.action.clone()));
                false
            } else {
                true
            }
        });
        timed_out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
