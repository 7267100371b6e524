//! Shared fakes and wiring for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use pondside::config::PondsideConfig;
use pondside::dosing::dispatch::AutoDoser;
use pondside::dosing::DoseCommand;
use pondside::error::TransportError;
use pondside::ingest::Ingestor;
use pondside::notify::{JsonPoster, NoToken, Notifier};
use pondside::publisher::CommandSink;
use pondside::state::SharedState;
use pondside::status::{Category, RecordSource, RecordStore, StatusRecord};

/// Command sink that records every command, optionally refusing them.
#[derive(Default)]
pub struct RecordingSink {
    commands: Mutex<Vec<DoseCommand>>,
    disconnected: AtomicBool,
}

impl RecordingSink {
    pub fn set_disconnected(&self, value: bool) {
        self.disconnected.store(value, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<DoseCommand> {
        self.commands.lock().expect("sink lock").clone()
    }
}

#[async_trait]
impl CommandSink for RecordingSink {
    async fn publish(&self, command: &DoseCommand) -> Result<(), TransportError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        self.commands.lock().expect("sink lock").push(command.clone());
        Ok(())
    }
}

/// One recorded POST.
#[derive(Debug, Clone)]
pub struct Post {
    pub url: String,
    pub body: serde_json::Value,
    pub bearer: Option<String>,
}

/// JSON poster that records every request and always succeeds.
#[derive(Default)]
pub struct RecordingPoster {
    posts: Mutex<Vec<Post>>,
}

impl RecordingPoster {
    pub fn posts(&self) -> Vec<Post> {
        self.posts.lock().expect("poster lock").clone()
    }

    pub fn posts_to(&self, url: &str) -> Vec<Post> {
        self.posts().into_iter().filter(|p| p.url == url).collect()
    }
}

#[async_trait]
impl JsonPoster for RecordingPoster {
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        bearer: Option<&str>,
    ) -> Result<(), TransportError> {
        self.posts.lock().expect("poster lock").push(Post {
            url: url.to_owned(),
            body: body.clone(),
            bearer: bearer.map(str::to_owned),
        });
        Ok(())
    }
}

/// JSON poster whose every request fails after being counted.
#[derive(Default)]
pub struct FailingPoster {
    attempts: AtomicUsize,
}

impl FailingPoster {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JsonPoster for FailingPoster {
    async fn post_json(
        &self,
        _url: &str,
        _body: &serde_json::Value,
        _bearer: Option<&str>,
    ) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Status {
            status: 503,
            body: "unavailable".to_owned(),
        })
    }
}

/// Record source whose every read fails.
pub struct BrokenSource;

#[async_trait]
impl RecordSource for BrokenSource {
    async fn latest(&self, _category: Category, _pond_id: i64) -> anyhow::Result<Option<StatusRecord>> {
        anyhow::bail!("storage unavailable")
    }
}

/// Record source that takes `delay` per category read and finds nothing.
pub struct SlowSource {
    pub delay: Duration,
}

#[async_trait]
impl RecordSource for SlowSource {
    async fn latest(&self, _category: Category, _pond_id: i64) -> anyhow::Result<Option<StatusRecord>> {
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }
}

pub const STATUS_URL: &str = "http://app.test/status";
pub const SIZE_URL: &str = "http://app.test/size";
pub const TANK_URL: &str = "http://app.test/tank";
pub const RUNOUT_URL: &str = "http://app.test/runout";
pub const PUSH_URL: &str = "http://app.test/push";

/// Defaults with storage under `root` and every outbound URL set.
pub fn test_config(root: &Path) -> PondsideConfig {
    let mut config = PondsideConfig::default();
    config.storage.root = root.join("local_storage");
    config.storage.data_ponds_dir = root.join("data_ponds");
    config.storage.logs_dir = root.join("logs");
    config.endpoints.status_url = Some(STATUS_URL.to_owned());
    config.endpoints.size_url = Some(SIZE_URL.to_owned());
    config.endpoints.tank_status_url = Some(TANK_URL.to_owned());
    config.alerts.runout_url = Some(RUNOUT_URL.to_owned());
    config.alerts.push_url = Some(PUSH_URL.to_owned());
    config
}

/// Fully wired ingestion path over fakes.
pub struct Harness {
    pub config: Arc<PondsideConfig>,
    pub store: RecordStore,
    pub state: Arc<SharedState>,
    pub sink: Arc<RecordingSink>,
    pub poster: Arc<RecordingPoster>,
    pub notifier: Arc<Notifier>,
    pub ingestor: Arc<Ingestor>,
}

impl Harness {
    pub fn new(config: PondsideConfig) -> Self {
        let config = Arc::new(config);
        let store = RecordStore::new(
            config.storage.root.clone(),
            config.storage.data_ponds_dir.clone(),
        );
        store.ensure_layout().expect("should create storage layout");

        let state = Arc::new(SharedState::new(
            &config.aggregation.ponds,
            config.heartbeat.timeout_secs,
        ));
        let sink = Arc::new(RecordingSink::default());
        let poster = Arc::new(RecordingPoster::default());
        let notifier = Arc::new(Notifier::new(
            Arc::clone(&poster) as Arc<dyn JsonPoster>,
            Arc::new(NoToken),
            config.alerts.clone(),
            config.aggregation.utc_offset_hours,
        ));
        let doser = Arc::new(AutoDoser::new(
            config.dosing.clone(),
            Arc::clone(&state.cooldowns),
            Arc::clone(&sink) as Arc<dyn CommandSink>,
        ));
        let ingestor = Arc::new(Ingestor::new(
            Arc::clone(&config),
            store.clone(),
            Arc::clone(&state),
            doser,
            Arc::clone(&notifier),
            Arc::clone(&poster) as Arc<dyn JsonPoster>,
        ));

        Self {
            config,
            store,
            state,
            sink,
            poster,
            notifier,
            ingestor,
        }
    }
}

/// Poll `check` until it holds, for spawned best-effort work.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
