//! Tests for alert routing and authentication.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use pondside::config::AlertsConfig;
use pondside::error::TransportError;
use pondside::heartbeat::OfflineDevice;
use pondside::notify::{JsonPoster, NoToken, Notifier, TokenSource};

use crate::support::{RecordingPoster, PUSH_URL, RUNOUT_URL};

struct FixedToken(&'static str);

#[async_trait]
impl TokenSource for FixedToken {
    async fn token(&self) -> Result<Option<String>, TransportError> {
        Ok(Some(self.0.to_owned()))
    }
}

struct BrokenLogin;

#[async_trait]
impl TokenSource for BrokenLogin {
    async fn token(&self) -> Result<Option<String>, TransportError> {
        Err(TransportError::Status {
            status: 401,
            body: String::new(),
        })
    }
}

fn alerts() -> AlertsConfig {
    AlertsConfig {
        runout_url: Some(RUNOUT_URL.to_owned()),
        push_url: Some(PUSH_URL.to_owned()),
        user_id: 42,
        ..AlertsConfig::default()
    }
}

fn notifier(poster: &Arc<RecordingPoster>, tokens: Arc<dyn TokenSource>, config: AlertsConfig) -> Notifier {
    Notifier::new(Arc::clone(poster) as Arc<dyn JsonPoster>, tokens, config, 7)
}

fn offline_device() -> OfflineDevice {
    OfflineDevice {
        device_id: "raspi_pond_4".to_owned(),
        pond_id: Some(4),
        last_seen: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("valid date"),
    }
}

#[tokio::test]
async fn push_alerts_carry_the_login_token() {
    let poster = Arc::new(RecordingPoster::default());
    let notifier = notifier(&poster, Arc::new(FixedToken("tok-123")), alerts());

    let alert = notifier.offline_alert(&offline_device(), Utc::now());
    notifier.send_push(&alert).await;

    let posts = poster.posts_to(PUSH_URL);
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].bearer.as_deref(), Some("tok-123"));
    assert_eq!(posts[0].body["user_id"], 42);
    assert_eq!(posts[0].body["tag"], "general-notification");
    assert_eq!(posts[0].body["data"]["severity"], "high");
    assert_eq!(posts[0].body["data"]["pond_id"], "4");
}

#[tokio::test]
async fn failed_login_drops_the_alert() {
    let poster = Arc::new(RecordingPoster::default());
    let notifier = notifier(&poster, Arc::new(BrokenLogin), alerts());

    let alert = notifier.floating_shrimp_alert(1, None, Utc::now());
    notifier.send_push(&alert).await;

    assert!(poster.posts().is_empty());
}

#[tokio::test]
async fn runout_alerts_skip_login() {
    let poster = Arc::new(RecordingPoster::default());
    let notifier = notifier(&poster, Arc::new(BrokenLogin), alerts());

    let alert = notifier.runout_alert(1, "2025-01-01T07:00:00".to_owned(), vec![0.5, 9.0], vec![1.0, 5.0]);
    notifier.send_runout(&alert).await;

    let posts = poster.posts_to(RUNOUT_URL);
    assert_eq!(posts.len(), 1);
    assert!(posts[0].bearer.is_none());
    assert_eq!(posts[0].body["data"]["powder_remaining_kg"][0], 0.5);
    assert_eq!(posts[0].body["tag"], "shrimp-alert");
}

#[tokio::test]
async fn unconfigured_targets_send_nothing() {
    let poster = Arc::new(RecordingPoster::default());
    let notifier = notifier(&poster, Arc::new(NoToken), AlertsConfig::default());

    notifier
        .send_runout(&notifier.runout_alert(1, "t".to_owned(), vec![], vec![]))
        .await;
    notifier
        .send_push(&notifier.offline_alert(&offline_device(), Utc::now()))
        .await;

    assert!(poster.posts().is_empty());
}
