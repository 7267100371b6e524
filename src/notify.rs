//! Outbound JSON delivery and alert notifications.
//!
//! Everything here is best-effort: a failed post is logged by the caller
//! and never retried. Alerts are built by [`Notifier`] and delivered
//! through a [`JsonPoster`], so tests can swap in a recorder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AlertsConfig;
use crate::error::TransportError;
use crate::heartbeat::OfflineDevice;
use crate::status::format_timestamp;

/// Longest response body kept in a [`TransportError::Status`].
const MAX_ERROR_BODY: usize = 256;

/// Sends a JSON document to a URL.
#[async_trait]
pub trait JsonPoster: Send + Sync {
    /// POST `body` to `url`, optionally with a bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on connection failure or a non-2xx reply.
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        bearer: Option<&str>,
    ) -> Result<(), TransportError>;
}

/// [`JsonPoster`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpPoster {
    client: reqwest::Client,
}

impl HttpPoster {
    /// Poster with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Underlying client, shared with the login flow.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl JsonPoster for HttpPoster {
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        bearer: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut request = self.client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let mut text = response.text().await.unwrap_or_default();
        if text.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|&i| text.is_char_boundary(i))
                .unwrap_or(0);
            text.truncate(cut);
        }
        Err(TransportError::Status {
            status: status.as_u16(),
            body: text,
        })
    }
}

/// Supplies a bearer token for push notifications.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetch a fresh token. `None` means proceed unauthenticated.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the login endpoint is unreachable or
    /// rejects the credentials.
    async fn token(&self) -> Result<Option<String>, TransportError>;
}

/// Form login that returns `{"access_token": ...}`.
pub struct FormLogin {
    client: reqwest::Client,
    url: Option<String>,
    username: String,
    password: String,
}

impl FormLogin {
    /// Login against `config.login_url`; no URL means no token.
    pub fn new(client: reqwest::Client, config: &AlertsConfig) -> Self {
        Self {
            client,
            url: config.login_url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: Option<String>,
}

#[async_trait]
impl TokenSource for FormLogin {
    async fn token(&self) -> Result<Option<String>, TransportError> {
        let Some(url) = self.url.as_deref() else {
            return Ok(None);
        };
        let response = self
            .client
            .post(url)
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        let body: LoginResponse = response.json().await?;
        Ok(body.access_token)
    }
}

/// No authentication.
pub struct NoToken;

#[async_trait]
impl TokenSource for NoToken {
    async fn token(&self) -> Result<Option<String>, TransportError> {
        Ok(None)
    }
}

// ── Alert payloads ──────────────────────────────────────────────

/// Alert body as the farm app expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    /// Recipient.
    pub user_id: i64,
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub body: String,
    /// Image shown with the notification.
    pub image: Option<String>,
    /// Link opened on tap.
    pub url: Option<String>,
    /// Notification grouping tag.
    pub tag: String,
    /// Structured details.
    pub data: AlertData,
}

/// Structured part of an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertData {
    /// Pond, as a string.
    pub pond_id: String,
    /// Local timestamp.
    pub timestamp: String,
    /// `Item-runout`, `DeviceOffline-<id>` or `ShrimpOnWater-<pond>`.
    pub alert_type: String,
    /// Always `high` today.
    pub severity: String,
    /// Powder remaining per channel, runout alerts only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub powder_remaining_kg: Option<Vec<f64>>,
    /// Liquid remaining per channel, runout alerts only.
    #[serde(rename = "water_remaining_L", skip_serializing_if = "Option::is_none")]
    pub water_remaining_l: Option<Vec<f64>>,
    /// Offline device, offline alerts only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl AlertData {
    fn new(pond_id: String, timestamp: String, alert_type: String) -> Self {
        Self {
            pond_id,
            timestamp,
            alert_type,
            severity: "high".to_owned(),
            powder_remaining_kg: None,
            water_remaining_l: None,
            device_id: None,
        }
    }
}

/// Builds and sends alerts.
pub struct Notifier {
    poster: Arc<dyn JsonPoster>,
    tokens: Arc<dyn TokenSource>,
    config: AlertsConfig,
    utc_offset_hours: i32,
}

impl Notifier {
    /// Notifier posting through `poster`.
    pub fn new(
        poster: Arc<dyn JsonPoster>,
        tokens: Arc<dyn TokenSource>,
        config: AlertsConfig,
        utc_offset_hours: i32,
    ) -> Self {
        Self {
            poster,
            tokens,
            config,
            utc_offset_hours,
        }
    }

    /// Consumable runout alert payload.
    pub fn runout_alert(
        &self,
        pond_id: i64,
        timestamp: String,
        powder_remaining_kg: Vec<f64>,
        water_remaining_l: Vec<f64>,
    ) -> AlertPayload {
        let image = Some(self.config.placeholder_image_url.clone());
        let mut data = AlertData::new(pond_id.to_string(), timestamp, "Item-runout".to_owned());
        data.powder_remaining_kg = Some(powder_remaining_kg);
        data.water_remaining_l = Some(water_remaining_l);
        AlertPayload {
            user_id: self.config.user_id,
            title: "Consumables running low".to_owned(),
            body: format!("One or more tanks in pond {pond_id} are nearly empty, refill soon"),
            image: image.clone(),
            url: image,
            tag: "shrimp-alert".to_owned(),
            data,
        }
    }

    /// Device offline alert payload.
    pub fn offline_alert(&self, device: &OfflineDevice, now: DateTime<Utc>) -> AlertPayload {
        let pond = device
            .pond_id
            .map_or_else(|| "unknown".to_owned(), |p| p.to_string());
        let mut data = AlertData::new(
            pond,
            format_timestamp(now, self.utc_offset_hours),
            format!("DeviceOffline-{}", device.device_id),
        );
        data.device_id = Some(device.device_id.clone());
        AlertPayload {
            user_id: self.config.user_id,
            title: "Pond device offline".to_owned(),
            body: format!("{} stopped reporting, check it now", device.device_id),
            image: None,
            url: Some(self.config.placeholder_image_url.clone()),
            tag: "general-notification".to_owned(),
            data,
        }
    }

    /// Floating-shrimp alert payload.
    pub fn floating_shrimp_alert(
        &self,
        pond_id: i64,
        image: Option<String>,
        now: DateTime<Utc>,
    ) -> AlertPayload {
        AlertPayload {
            user_id: self.config.user_id,
            title: "Shrimp floating on the surface".to_owned(),
            body: format!("Floating shrimp detected in pond {pond_id}, inspect immediately"),
            image: image.clone(),
            url: image,
            tag: "shrimp-alert".to_owned(),
            data: AlertData::new(
                pond_id.to_string(),
                format_timestamp(now, self.utc_offset_hours),
                format!("ShrimpOnWater-{pond_id}"),
            ),
        }
    }

    /// Send a runout alert to the runout URL. Skipped when unconfigured.
    pub async fn send_runout(&self, alert: &AlertPayload) {
        let Some(url) = self.config.runout_url.as_deref() else {
            info!(alert_type = %alert.data.alert_type, "no runout url, alert skipped");
            return;
        };
        self.deliver(url, alert, None).await;
    }

    /// Send a push notification, logging in first when configured.
    pub async fn send_push(&self, alert: &AlertPayload) {
        let Some(url) = self.config.push_url.as_deref() else {
            info!(alert_type = %alert.data.alert_type, "no push url, alert skipped");
            return;
        };
        let token = match self.tokens.token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, alert_type = %alert.data.alert_type, "login failed, alert dropped");
                return;
            }
        };
        self.deliver(url, alert, token.as_deref()).await;
    }

    async fn deliver(&self, url: &str, alert: &AlertPayload, bearer: Option<&str>) {
        let body = match serde_json::to_value(alert) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "alert encoding failed");
                return;
            }
        };
        match self.poster.post_json(url, &body, bearer).await {
            Ok(()) => info!(alert_type = %alert.data.alert_type, pond_id = %alert.data.pond_id, "alert sent"),
            Err(e) => warn!(error = %e, alert_type = %alert.data.alert_type, "alert delivery failed"),
        }
    }
}
