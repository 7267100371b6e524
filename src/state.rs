//! Shared mutable state for the inbound path and the aggregation loop.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::dosing::cooldown::CooldownState;
use crate::heartbeat::HeartbeatMonitor;
use crate::status::StatusCache;

/// Every map the service mutates at runtime.
///
/// Status caches are locked per pond. The set of ponds is fixed at
/// construction; records for any other pond stay on disk only. The
/// latest consumable levels of a pond are its cached tank record.
pub struct SharedState {
    caches: HashMap<i64, Mutex<StatusCache>>,
    /// Last-dose times, shared with the auto-doser.
    pub cooldowns: Arc<Mutex<CooldownState>>,
    /// Device liveness.
    pub heartbeats: Mutex<HeartbeatMonitor>,
}

impl SharedState {
    /// Fresh state with empty caches for `ponds`.
    pub fn new(ponds: &[i64], heartbeat_timeout_secs: u64) -> Self {
        let caches = ponds
            .iter()
            .map(|&pond| (pond, Mutex::new(StatusCache::new(pond))))
            .collect();
        Self {
            caches,
            cooldowns: Arc::new(Mutex::new(CooldownState::new())),
            heartbeats: Mutex::new(HeartbeatMonitor::new(heartbeat_timeout_secs)),
        }
    }

    /// Status cache of an aggregated pond.
    pub fn cache(&self, pond_id: i64) -> Option<&Mutex<StatusCache>> {
        self.caches.get(&pond_id)
    }
}
