//! Periodic snapshot loop.
//!
//! Every interval, one cycle: sweep device heartbeats, refresh each pond's
//! status cache from durable storage, rebuild both snapshots, persist them
//! unconditionally, and push each one only when it differs from the last
//! pushed version (timestamps ignored). Cycles never overlap; a tick that
//! arrives while a cycle is still running is skipped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::PondsideConfig;
use crate::notify::{JsonPoster, Notifier};
use crate::state::SharedState;
use crate::status::store::write_json_atomic;
use crate::status::{
    build_pond_status, build_shrimp_size, fetch_latest, format_timestamp, RecordSource, RecordStore,
};

/// Which snapshot a memo or push refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotKind {
    /// PondStatus.
    Status,
    /// ShrimpSize.
    Size,
}

/// Last pushed snapshots of one pond, timestamps stripped.
#[derive(Debug, Default, Clone)]
struct PushMemo {
    status: Option<Value>,
    size: Option<Value>,
}

impl PushMemo {
    fn slot(&mut self, kind: SnapshotKind) -> &mut Option<Value> {
        match kind {
            SnapshotKind::Status => &mut self.status,
            SnapshotKind::Size => &mut self.size,
        }
    }
}

/// Outcome of one cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Ponds whose snapshots were built and persisted.
    pub ponds_built: usize,
    /// Pushes attempted.
    pub pushes: usize,
    /// Devices declared offline.
    pub offline: usize,
}

/// The change-gated pusher.
pub struct Aggregator {
    config: Arc<PondsideConfig>,
    source: Arc<dyn RecordSource>,
    store: RecordStore,
    state: Arc<SharedState>,
    poster: Arc<dyn JsonPoster>,
    notifier: Arc<Notifier>,
    memos: HashMap<i64, PushMemo>,
    unconfigured_logged: HashSet<(i64, SnapshotKind)>,
}

impl Aggregator {
    /// Loop over the configured ponds.
    pub fn new(
        config: Arc<PondsideConfig>,
        source: Arc<dyn RecordSource>,
        store: RecordStore,
        state: Arc<SharedState>,
        poster: Arc<dyn JsonPoster>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            config,
            source,
            store,
            state,
            poster,
            notifier,
            memos: HashMap::new(),
            unconfigured_logged: HashSet::new(),
        }
    }

    /// Run cycles until shutdown. The in-flight cycle always completes.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let period = self.config.aggregation.interval();
        info!(
            interval_secs = period.as_secs(),
            ponds = ?self.config.aggregation.ponds,
            "aggregation loop started"
        );

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.run_cycle(Utc::now()).await;
                    debug!(?report, "aggregation cycle complete");
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("aggregation loop shutting down");
                        break;
                    }
                }
            }
        }

        info!("aggregation loop stopped");
    }

    /// One full cycle at `now`. Per-pond failures are logged and the
    /// remaining ponds still run.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport {
            offline: self.check_heartbeats(now).await,
            ..CycleReport::default()
        };

        let ponds = self.config.aggregation.ponds.clone();
        for pond_id in ponds {
            match self.build_pond(pond_id, now).await {
                Ok(pushes) => {
                    report.ponds_built = report.ponds_built.saturating_add(1);
                    report.pushes = report.pushes.saturating_add(pushes);
                }
                Err(e) => error!(pond_id, error = %e, "aggregation cycle failed"),
            }
        }
        report
    }

    async fn check_heartbeats(&self, now: DateTime<Utc>) -> usize {
        let offline = self.state.heartbeats.lock().await.sweep(now);
        for device in &offline {
            let alert = self.notifier.offline_alert(device, now);
            self.notifier.send_push(&alert).await;
        }
        offline.len()
    }

    async fn build_pond(&mut self, pond_id: i64, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let timestamp = format_timestamp(now, self.config.aggregation.utc_offset_hours);

        let records = fetch_latest(self.source.as_ref(), pond_id).await;
        let (status, size) = {
            let slot = self
                .state
                .cache(pond_id)
                .with_context(|| format!("pond {pond_id} has no status cache"))?;
            let mut cache = slot.lock().await;
            cache.apply(records);
            (
                build_pond_status(&cache, timestamp.clone()),
                build_shrimp_size(&cache, timestamp),
            )
        };

        let status = serde_json::to_value(&status).context("failed to encode pond status")?;
        let size = serde_json::to_value(&size).context("failed to encode shrimp size")?;

        write_json_atomic(&self.store.status_snapshot_path(pond_id), &status).await?;
        write_json_atomic(&self.store.size_snapshot_path(pond_id), &size).await?;

        let mut pushes = 0_usize;
        for (kind, snapshot) in [(SnapshotKind::Status, &status), (SnapshotKind::Size, &size)] {
            if self.push_if_changed(pond_id, kind, snapshot).await {
                pushes = pushes.saturating_add(1);
            }
        }
        Ok(pushes)
    }

    /// Push when the snapshot differs from the memo. Returns whether a push
    /// was attempted. The memo moves on attempt, not on confirmed delivery.
    async fn push_if_changed(&mut self, pond_id: i64, kind: SnapshotKind, snapshot: &Value) -> bool {
        let url = match kind {
            SnapshotKind::Status => self.config.endpoints.status_url.as_deref(),
            SnapshotKind::Size => self.config.endpoints.size_url.as_deref(),
        };
        let stripped = strip_timestamp(snapshot);
        let memo = self.memos.entry(pond_id).or_default().slot(kind);
        if !should_push(memo.as_ref(), &stripped) {
            return false;
        }
        let Some(url) = url else {
            if self.unconfigured_logged.insert((pond_id, kind)) {
                info!(pond_id, ?kind, "no push target configured, snapshot kept on disk only");
            }
            return false;
        };

        *memo = Some(stripped);
        match self.poster.post_json(url, snapshot, None).await {
            Ok(()) => info!(pond_id, ?kind, "snapshot pushed"),
            Err(e) => warn!(pond_id, ?kind, error = %e, "snapshot push failed"),
        }
        true
    }
}

/// Copy of `snapshot` without its `timestamp` field.
pub fn strip_timestamp(snapshot: &Value) -> Value {
    let mut copy = snapshot.clone();
    if let Some(fields) = copy.as_object_mut() {
        fields.remove("timestamp");
    }
    copy
}

/// True on first build or when the stripped snapshot changed.
pub fn should_push(last_pushed: Option<&Value>, stripped: &Value) -> bool {
    last_pushed != Some(stripped)
}
