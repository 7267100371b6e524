//! Field-device liveness.
//!
//! Devices post a heartbeat every few seconds. The aggregation loop sweeps
//! the map once per cycle: a device silent for longer than the timeout is
//! reported offline exactly once and forgotten until it posts again.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

/// A device that missed its heartbeat window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineDevice {
    /// Device id as posted.
    pub device_id: String,
    /// Pond parsed from the device id's `_N` suffix.
    pub pond_id: Option<i64>,
    /// Last heartbeat received.
    pub last_seen: DateTime<Utc>,
}

/// Device id → last-seen time.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    last_seen: HashMap<String, DateTime<Utc>>,
}

impl HeartbeatMonitor {
    /// Monitor declaring devices offline after `timeout_secs` of silence.
    pub fn new(timeout_secs: u64) -> Self {
        let secs = i64::try_from(timeout_secs).unwrap_or(i64::MAX);
        Self {
            timeout: Duration::try_seconds(secs).unwrap_or(Duration::MAX),
            last_seen: HashMap::new(),
        }
    }

    /// Record a heartbeat from `device_id` at `at`.
    pub fn record(&mut self, device_id: &str, at: DateTime<Utc>) {
        debug!(device_id, "heartbeat recorded");
        self.last_seen.insert(device_id.to_owned(), at);
    }

    /// Devices currently tracked.
    pub fn tracked(&self) -> usize {
        self.last_seen.len()
    }

    /// Last heartbeat of one device.
    pub fn last_seen(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.last_seen.get(device_id).copied()
    }

    /// Remove and return every device silent for strictly longer than the
    /// timeout at `now`.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<OfflineDevice> {
        let timeout = self.timeout;
        let mut offline: Vec<OfflineDevice> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.signed_duration_since(**seen) > timeout)
            .map(|(id, seen)| OfflineDevice {
                device_id: id.clone(),
                pond_id: parse_pond_suffix(id),
                last_seen: *seen,
            })
            .collect();
        offline.sort_by(|a, b| a.device_id.cmp(&b.device_id));

        for device in &offline {
            self.last_seen.remove(&device.device_id);
            info!(
                device_id = %device.device_id,
                pond_id = ?device.pond_id,
                "device offline"
            );
        }
        offline
    }
}

/// Trailing `_N` integer of a device id such as `raspi_pond_3`.
pub fn parse_pond_suffix(device_id: &str) -> Option<i64> {
    device_id.rsplit('_').next()?.parse().ok()
}
