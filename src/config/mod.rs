//! Configuration loading and validation.
//!
//! Loads configuration from `./config.toml` (or `$PONDSIDE_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::calibration::CalibrationCurve;

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PondsideConfig {
    /// HTTP ingestion server.
    pub server: ServerConfig,
    /// Durable storage layout.
    pub storage: StorageConfig,
    /// Command channel broker settings.
    pub mqtt: MqttConfig,
    /// Dosing rule constants and actuator geometry.
    pub dosing: DosingConfig,
    /// Consumable tank calibration and thresholds.
    pub tank: TankConfig,
    /// Periodic snapshot loop.
    pub aggregation: AggregationConfig,
    /// Device liveness tracking.
    pub heartbeat: HeartbeatConfig,
    /// External snapshot push targets.
    pub endpoints: EndpointsConfig,
    /// Alert delivery.
    pub alerts: AlertsConfig,
}

impl PondsideConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or
    /// parsed, or if validation fails.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env file");
        }
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config path using a custom env resolver.
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("PONDSIDE_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests never touch the process env.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("PONDSIDE_BIND") {
            self.server.bind = v;
        }

        if let Some(v) = env("PONDSIDE_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(v);
        }
        if let Some(v) = env("PONDSIDE_DATA_PONDS_DIR") {
            self.storage.data_ponds_dir = PathBuf::from(v);
        }
        if let Some(v) = env("PONDSIDE_LOGS_DIR") {
            self.storage.logs_dir = PathBuf::from(v);
        }

        if let Some(v) = env("PONDSIDE_MQTT_HOST") {
            self.mqtt.host = v;
        }
        if let Some(v) = env("PONDSIDE_MQTT_PORT") {
            match v.parse() {
                Ok(n) => self.mqtt.port = n,
                Err(_) => tracing::warn!(
                    var = "PONDSIDE_MQTT_PORT",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Empty strings clear a target, mirroring an unset variable.
        let url = |key: &str| env(key).map(|v| Some(v).filter(|s| !s.trim().is_empty()));
        if let Some(v) = url("PONDSIDE_STATUS_URL") {
            self.endpoints.status_url = v;
        }
        if let Some(v) = url("PONDSIDE_SIZE_URL") {
            self.endpoints.size_url = v;
        }
        if let Some(v) = url("PONDSIDE_TANK_STATUS_URL") {
            self.endpoints.tank_status_url = v;
        }
        if let Some(v) = url("PONDSIDE_RUNOUT_ALERT_URL") {
            self.alerts.runout_url = v;
        }
        if let Some(v) = url("PONDSIDE_PUSH_URL") {
            self.alerts.push_url = v;
        }
        if let Some(v) = url("PONDSIDE_LOGIN_URL") {
            self.alerts.login_url = v;
        }
        if let Some(v) = env("PONDSIDE_LOGIN_USERNAME") {
            self.alerts.username = v;
        }
        if let Some(v) = env("PONDSIDE_LOGIN_PASSWORD") {
            self.alerts.password = v;
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or a curve is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Check cross-field constraints the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.aggregation.interval_secs == 0 {
            anyhow::bail!("aggregation.interval_secs must be positive");
        }
        if self.heartbeat.timeout_secs == 0 {
            anyhow::bail!("heartbeat.timeout_secs must be positive");
        }
        if self.mqtt.reconnect_delay_secs == 0 {
            anyhow::bail!("mqtt.reconnect_delay_secs must be positive");
        }
        if self.tank.powder_curves.is_empty() {
            anyhow::bail!("tank.powder_curves must hold at least one curve");
        }

        let targets = [
            ("endpoints.status_url", &self.endpoints.status_url),
            ("endpoints.size_url", &self.endpoints.size_url),
            ("endpoints.tank_status_url", &self.endpoints.tank_status_url),
            ("alerts.runout_url", &self.alerts.runout_url),
            ("alerts.push_url", &self.alerts.push_url),
            ("alerts.login_url", &self.alerts.login_url),
        ];
        for (name, value) in targets {
            if let Some(raw) = value {
                url::Url::parse(raw).with_context(|| format!("{name} is not a valid URL"))?;
            }
        }
        Ok(())
    }
}

// ── Server ──────────────────────────────────────────────────────

/// HTTP ingestion server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8001".to_owned(),
        }
    }
}

// ── Storage ─────────────────────────────────────────────────────

/// Durable storage layout.
///
/// Category records live in `{root}/{sensor,san,water,shrimp,size,din}`;
/// snapshots are written to `{root}/pond_{id}_status.json` and
/// `{root}/pond_{id}_shrimp_size.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for category records and snapshots.
    pub root: PathBuf,
    /// Directory for posted pond information records.
    pub data_ponds_dir: PathBuf,
    /// Directory for rolling JSON log files.
    pub logs_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/data/local_storage"),
            data_ponds_dir: PathBuf::from("/data/data_ponds"),
            logs_dir: PathBuf::from("/data/logs"),
        }
    }
}

// ── MQTT ────────────────────────────────────────────────────────

/// Command channel broker settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host name.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// Client identifier prefix; a random suffix is added per connection.
    pub client_id: String,
    /// Topic dose commands are published on.
    pub command_topic: String,
    /// Topic tank readings arrive on.
    pub status_topic: String,
    /// MQTT keep-alive in seconds.
    pub keep_alive_secs: u64,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay_secs: u64,
}

impl MqttConfig {
    /// Reconnect delay as a [`Duration`].
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "broker.emqx.io".to_owned(),
            port: 1883,
            client_id: "pondside".to_owned(),
            command_topic: "pond/doser/cmd".to_owned(),
            status_topic: "pond/doser/status".to_owned(),
            keep_alive_secs: 60,
            reconnect_delay_secs: 5,
        }
    }
}

// ── Dosing ──────────────────────────────────────────────────────

/// Dosing rule constants and actuator geometry.
///
/// Rates are per rai of pond surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DosingConfig {
    /// Pond size used when no pond info record carries one.
    pub default_pond_size_rai: f64,
    /// Probiotic dose, ml per rai.
    pub probiotic_ml_per_rai: f64,
    /// Days between probiotic doses.
    pub probiotic_interval_days: i64,
    /// CaCO3 dose, g per rai.
    pub caco3_g_per_rai: f64,
    /// pH below which CaCO3 is dosed.
    pub ph_min: f64,
    /// MgSO4 dose, g per rai.
    pub mgso4_g_per_rai: f64,
    /// Temperature (°C) above which MgSO4 is dosed.
    pub temp_max: f64,
    /// Green extract dose, ml per rai.
    pub green_extract_ml_per_rai: f64,
    /// Servo dispenser cup radius, cm.
    pub servo_radius_cm: f64,
    /// Servo dispenser cup height, cm.
    pub servo_height_cm: f64,
    /// Powder bulk density, g/cm³.
    pub bulk_density: f64,
    /// Liquid pump flow rate, ml/s.
    pub pump_ml_per_sec: f64,
}

impl Default for DosingConfig {
    fn default() -> Self {
        Self {
            default_pond_size_rai: 1.0,
            probiotic_ml_per_rai: 200.0,
            probiotic_interval_days: 7,
            caco3_g_per_rai: 2500.0,
            ph_min: 6.8,
            mgso4_g_per_rai: 2500.0,
            temp_max: 30.0,
            green_extract_ml_per_rai: 150.0,
            servo_radius_cm: 6.5,
            servo_height_cm: 6.5,
            bulk_density: 0.8,
            pump_ml_per_sec: 50.0,
        }
    }
}

// ── Tank ────────────────────────────────────────────────────────

/// Consumable tank calibration and near-empty thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TankConfig {
    /// One curve per powder channel; the last curve is reused for any
    /// extra channels.
    pub powder_curves: Vec<CalibrationCurve>,
    /// Powder distance (cm) above which a hopper is near-empty.
    pub powder_empty_distance_cm: f64,
    /// Liquid volume (L) below which a tank is near-empty.
    pub liquid_floor_l: f64,
}

impl Default for TankConfig {
    fn default() -> Self {
        Self {
            powder_curves: vec![
                CalibrationCurve::default_powder(),
                CalibrationCurve::default_powder(),
            ],
            powder_empty_distance_cm: 15.0,
            liquid_floor_l: 2.0,
        }
    }
}

// ── Aggregation ─────────────────────────────────────────────────

/// Periodic snapshot loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Seconds between cycles.
    pub interval_secs: u64,
    /// Ponds to build snapshots for.
    pub ponds: Vec<i64>,
    /// Fixed UTC offset (hours) used for snapshot timestamps.
    pub utc_offset_hours: i32,
}

impl AggregationConfig {
    /// Cycle interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            ponds: vec![1],
            utc_offset_hours: 7,
        }
    }
}

// ── Heartbeat ───────────────────────────────────────────────────

/// Device liveness settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Seconds of silence after which a device is offline.
    pub timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

// ── Endpoints ───────────────────────────────────────────────────

/// External push targets. `None` means "do not push".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    /// Receives PondStatus snapshots.
    pub status_url: Option<String>,
    /// Receives ShrimpSize snapshots.
    pub size_url: Option<String>,
    /// Receives every processed tank record.
    pub tank_status_url: Option<String>,
}

// ── Alerts ──────────────────────────────────────────────────────

/// Alert delivery settings.
///
/// Runout alerts go straight to `runout_url`. Offline and floating-shrimp
/// alerts go to `push_url`, authenticated with a bearer token from
/// `login_url` when one is configured.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Target for consumable runout alerts.
    pub runout_url: Option<String>,
    /// Target for push notifications.
    pub push_url: Option<String>,
    /// Form-login endpoint issuing an `access_token`.
    pub login_url: Option<String>,
    /// Login user name.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Recipient user id embedded in every alert.
    pub user_id: i64,
    /// Image/link used when an alert has no image of its own.
    pub placeholder_image_url: String,
    /// HTTP timeout for alert and push requests.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for AlertsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertsConfig")
            .field("runout_url", &self.runout_url)
            .field("push_url", &self.push_url)
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .field("password", &"__REDACTED__")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            runout_url: None,
            push_url: None,
            login_url: None,
            username: String::new(),
            password: String::new(),
            user_id: 1,
            placeholder_image_url: "https://drive.google.com/xxx".to_owned(),
            timeout_secs: 10,
        }
    }
}
