//! Heartbeat scheduler
//!
//! Armed with the interval the Central System returns at boot. The task
//! holds only a weak reference to the engine, so a dropped engine stops the
//! timer on the next tick.

use crate::engine::EngineInner;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Periodic Heartbeat trigger
#[derive(Debug, Default)]
pub(crate) struct HeartbeatTimer {
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new periodic trigger, cancelling any previous one
    pub fn arm(&mut self, period: Duration, engine: Weak<EngineInner>) {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    debug!("Engine gone, heartbeat timer stopping");
                    return;
                };
                if let Err(e) = engine.send_heartbeat().await {
                    warn!("Heartbeat send failed: {e}");
                    return;
                }
            }
        }));
    }

    /// Stop the timer if one is running
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for HeartbeatTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
