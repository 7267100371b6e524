//! Telemetry ingestion: tank readings, sensor records, pond info, analysis
//! results and device heartbeats.
//!
//! Every accepted record is written to durable storage first, then folded
//! into the in-memory state. Validation happens before anything is
//! touched, so a rejected record mutates nothing. External posts (tank
//! status, alerts) are spawned and never hold up ingestion.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::{PondsideConfig, TankConfig};
use crate::dosing::dispatch::{AutoDoser, DoseReport};
use crate::dosing::{ClarityVerdict, DoseInputs};
use crate::error::{value_as_f64, ConversionError};
use crate::notify::{JsonPoster, Notifier};
use crate::state::SharedState;
use crate::status::size_text::average_size;
use crate::status::{record_pond_id, Category, RecordSource, RecordStore, StatusRecord};

/// Sensor defaults used when a water result arrives before any reading.
const DEFAULT_PH: f64 = 7.0;
const DEFAULT_TEMPERATURE: f64 = 28.0;
const DEFAULT_DO: f64 = 5.0;

/// Text the floating-shrimp analyser emits when it finds nothing.
const NO_FLOATING_SHRIMP: &str = "ไม่พบกุ้งลอยผิวน้ำ";

/// Latest-copy file written next to the timestamped tank records.
const LATEST_TANK_STEM: &str = "sent_san";

// ── Errors ──────────────────────────────────────────────────────

/// A posted record was rejected before any state changed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// The body is not a JSON object.
    #[error("expected a JSON object")]
    NotAnObject,
    /// A required field is absent.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    /// A field is present but unusable.
    #[error("field `{field}` is invalid: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// Unknown analysis result category.
    #[error("unknown result category `{0}`")]
    UnknownCategory(String),
}

/// Ingestion failure.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The record was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The record was valid but could not be stored.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

// ── Tank readings ───────────────────────────────────────────────

fn default_pond() -> i64 {
    1
}

/// Raw tank levels reported by the pond controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankReading {
    /// Source pond.
    #[serde(default = "default_pond")]
    pub pond_id: i64,
    /// Ultrasonic distance to the powder surface per hopper, cm.
    #[serde(default)]
    pub powder_distances: Vec<Value>,
    /// Remaining volume per liquid tank, litres.
    #[serde(default)]
    pub water_levels: Vec<Value>,
}

/// Consumable levels derived from one [`TankReading`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumableState {
    /// Source pond.
    pub pond_id: i64,
    /// Remaining powder per hopper, kg, 1 decimal.
    pub powder_remaining_kg: Vec<f64>,
    /// Near-empty flag per hopper.
    pub powder_near_empty: Vec<bool>,
    /// Remaining liquid per tank, litres.
    pub water_remaining_l: Vec<f64>,
    /// Near-empty flag per tank.
    pub water_near_empty: Vec<bool>,
    /// When the reading was processed.
    pub timestamp: DateTime<Utc>,
}

impl ConsumableState {
    /// True when any hopper or tank is near-empty.
    pub fn any_near_empty(&self) -> bool {
        self.powder_near_empty
            .iter()
            .chain(&self.water_near_empty)
            .any(|&flag| flag)
    }

    /// Stored tank record. `remaining_g` packs the two hopper weights (kg)
    /// followed by the two liquid near-empty flags.
    pub fn to_record(&self, timestamp: &str) -> Value {
        let flag = |flags: &[bool], i: usize| flags.get(i).copied().unwrap_or(false).to_string();
        let kg = |i: usize| self.powder_remaining_kg.get(i).copied().unwrap_or(0.0);
        json!({
            "timestamp": timestamp,
            "pond_id": self.pond_id,
            "remaining_g": [
                kg(0),
                kg(1),
                flag(&self.water_near_empty, 0),
                flag(&self.water_near_empty, 1),
            ],
            "powder_remaining_kg": self.powder_remaining_kg,
            "water_remaining_L": self.water_remaining_l,
            "powder_flags": self.powder_near_empty.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "water_flags": self.water_near_empty.iter().map(ToString::to_string).collect::<Vec<_>>(),
        })
    }
}

/// Convert a raw reading to consumable levels.
///
/// A value that does not convert counts as 0 remaining and near-empty.
pub fn assess_tank(reading: &TankReading, config: &TankConfig, now: DateTime<Utc>) -> ConsumableState {
    let mut powder_remaining_kg = Vec::with_capacity(reading.powder_distances.len());
    let mut powder_near_empty = Vec::with_capacity(reading.powder_distances.len());
    for (channel, raw) in reading.powder_distances.iter().enumerate() {
        let curve = config.powder_curves.get(channel).or(config.powder_curves.last());
        match value_as_f64(raw) {
            Ok(distance) => {
                let grams = curve.map_or(0.0, |c| c.interpolate(distance));
                powder_remaining_kg.push(round1(grams / 1000.0));
                powder_near_empty.push(distance > config.powder_empty_distance_cm);
            }
            Err(e) => {
                log_conversion("powder_distances", channel, &e);
                powder_remaining_kg.push(0.0);
                powder_near_empty.push(true);
            }
        }
    }

    let mut water_remaining_l = Vec::with_capacity(reading.water_levels.len());
    let mut water_near_empty = Vec::with_capacity(reading.water_levels.len());
    for (channel, raw) in reading.water_levels.iter().enumerate() {
        match value_as_f64(raw) {
            Ok(litres) => {
                water_remaining_l.push(litres);
                water_near_empty.push(litres < config.liquid_floor_l);
            }
            Err(e) => {
                log_conversion("water_levels", channel, &e);
                water_remaining_l.push(0.0);
                water_near_empty.push(true);
            }
        }
    }

    ConsumableState {
        pond_id: reading.pond_id,
        powder_remaining_kg,
        powder_near_empty,
        water_remaining_l,
        water_near_empty,
        timestamp: now,
    }
}

fn log_conversion(field: &str, channel: usize, error: &ConversionError) {
    warn!(field, channel, error = %error, "tank value unusable, treating as empty");
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ── Ingestor ────────────────────────────────────────────────────

/// Accepted sensor record plus the dosing pass it triggered.
#[derive(Debug)]
pub struct Ingested {
    /// Where the record was written.
    pub saved: PathBuf,
    /// Auto-dose result, for record kinds that trigger one.
    pub dose: Option<DoseReport>,
}

/// Entry point for every inbound record.
pub struct Ingestor {
    config: Arc<PondsideConfig>,
    store: RecordStore,
    state: Arc<SharedState>,
    doser: Arc<AutoDoser>,
    notifier: Arc<Notifier>,
    poster: Arc<dyn JsonPoster>,
}

impl Ingestor {
    /// Wire an ingestor over shared state and collaborators.
    pub fn new(
        config: Arc<PondsideConfig>,
        store: RecordStore,
        state: Arc<SharedState>,
        doser: Arc<AutoDoser>,
        notifier: Arc<Notifier>,
        poster: Arc<dyn JsonPoster>,
    ) -> Self {
        Self {
            config,
            store,
            state,
            doser,
            notifier,
            poster,
        }
    }

    /// Durable store backing this ingestor.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Shared state.
    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Process a tank reading from the controller.
    ///
    /// # Errors
    ///
    /// Returns an error if the tank record cannot be stored.
    pub async fn tank_reading(&self, reading: &TankReading, now: DateTime<Utc>) -> anyhow::Result<ConsumableState> {
        let consumables = assess_tank(reading, &self.config.tank, now);
        let stamp = self.local_timestamp(now);
        let record = consumables.to_record(&stamp);

        let file_stem = format!("san_{}_{}", reading.pond_id, self.file_stamp(now));
        let saved = self.store.save(Category::Tank, &file_stem, &record).await?;
        self.store.save(Category::Tank, LATEST_TANK_STEM, &record).await?;

        self.cache_insert(StatusRecord::from_value(Category::Tank, record.clone()))
            .await;

        info!(
            pond_id = reading.pond_id,
            path = %saved.display(),
            powder_kg = ?consumables.powder_remaining_kg,
            water_l = ?consumables.water_remaining_l,
            "tank reading stored"
        );

        if let Some(url) = self.config.endpoints.tank_status_url.clone() {
            let poster = Arc::clone(&self.poster);
            let body = record.clone();
            tokio::spawn(async move {
                if let Err(e) = poster.post_json(&url, &body, None).await {
                    warn!(error = %e, "tank status post failed");
                }
            });
        }

        if consumables.any_near_empty() {
            let alert = self.notifier.runout_alert(
                reading.pond_id,
                stamp,
                consumables.powder_remaining_kg.clone(),
                consumables.water_remaining_l.clone(),
            );
            let notifier = Arc::clone(&self.notifier);
            tokio::spawn(async move { notifier.send_runout(&alert).await });
        }

        Ok(consumables)
    }

    /// Store a water-quality reading and run the dosing rules on it.
    ///
    /// Required: `pond_id`, `ph`, `temperature`, `do`, `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Validation`] for a malformed record and
    /// [`IngestError::Storage`] if it cannot be written.
    pub async fn sensor_record(&self, body: Value, now: DateTime<Utc>) -> Result<Ingested, IngestError> {
        let fields = require(&body, &["pond_id", "ph", "temperature", "do", "timestamp"])?;
        let pond_id = int_field(fields, "pond_id")?;
        let ph = number_field(fields, "ph")?;
        let temperature = number_field(fields, "temperature")?;
        let dissolved_oxygen = number_field(fields, "do")?;

        let stem = format!("sensor_{}", self.file_stamp(now));
        let saved = self.store.save(Category::Sensor, &stem, &body).await?;
        self.cache_insert(StatusRecord::from_value(Category::Sensor, body))
            .await;
        info!(pond_id, ph, temperature, path = %saved.display(), "sensor record stored");

        let clarity = self.latest_clarity(pond_id).await;
        let inputs = DoseInputs {
            pond_id,
            pond_size_rai: self.pond_size(pond_id).await,
            ph,
            temperature,
            dissolved_oxygen,
            clarity,
            now,
        };
        let dose = self.doser.run(&inputs).await;
        Ok(Ingested {
            saved,
            dose: Some(dose),
        })
    }

    /// Store a pond info record.
    ///
    /// Required: `pond_id`, `date`, `initial_stock`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Validation`] for a malformed record and
    /// [`IngestError::Storage`] if it cannot be written.
    pub async fn pond_info(&self, body: Value, now: DateTime<Utc>) -> Result<Ingested, IngestError> {
        let fields = require(&body, &["pond_id", "date", "initial_stock"])?;
        let pond_id = int_field(fields, "pond_id")?;
        if let Some(size) = fields.get("pond_size_rai") {
            value_as_f64(size).map_err(|e| ValidationError::InvalidField {
                field: "pond_size_rai",
                reason: e.to_string(),
            })?;
        }

        let saved = self
            .store
            .save_pond_info(pond_id, &self.file_stamp(now), &body)
            .await?;
        info!(pond_id, path = %saved.display(), "pond info stored");
        Ok(Ingested { saved, dose: None })
    }

    /// Store an analysis result from an inference worker.
    ///
    /// `kind` is `water`, `shrimp`, `size` or `din`. The record must carry
    /// `pond_id` (or `pond_number`). Water results trigger a dosing pass
    /// using the latest sensor reading; shrimp results reporting floating
    /// shrimp trigger an alert.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Validation`] for a malformed record and
    /// [`IngestError::Storage`] if it cannot be written.
    pub async fn analysis_result(&self, kind: &str, mut body: Value, now: DateTime<Utc>) -> Result<Ingested, IngestError> {
        let category = Category::from_result_kind(kind)
            .ok_or_else(|| ValidationError::UnknownCategory(kind.to_owned()))?;
        let fields = body.as_object().ok_or(ValidationError::NotAnObject)?;
        if !fields.contains_key("pond_id") && !fields.contains_key("pond_number") {
            return Err(ValidationError::MissingField("pond_id").into());
        }
        let pond_id = record_pond_id(&body).ok_or(ValidationError::InvalidField {
            field: "pond_id",
            reason: "not an integer".to_owned(),
        })?;

        if category == Category::Size {
            attach_structured_size(&mut body);
        }

        let stem = format!("{}_{}", category.dir_name(), self.file_stamp(now));
        let saved = self.store.save(category, &stem, &body).await?;
        let record = StatusRecord::from_value(category, body);
        info!(pond_id, category = category.dir_name(), path = %saved.display(), "analysis result stored");

        let mut dose = None;
        match category {
            Category::Water => {
                let clarity = ClarityVerdict::from_text(record.text_content.as_deref().unwrap_or_default());
                dose = Some(self.dose_from_latest_sensor(pond_id, clarity, now).await);
            }
            Category::Shrimp if is_floating_detection(record.text_content.as_deref()) => {
                let image = record.output_image.clone().or_else(|| record.raw_input_image.clone());
                let alert = self.notifier.floating_shrimp_alert(pond_id, image, now);
                let notifier = Arc::clone(&self.notifier);
                tokio::spawn(async move { notifier.send_push(&alert).await });
            }
            _ => {}
        }

        self.cache_insert(record).await;
        Ok(Ingested { saved, dose })
    }

    /// Record a device heartbeat.
    ///
    /// Required: `device_id`, `status`, `timestamp`, `pond_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for a malformed record.
    pub async fn heartbeat(&self, body: &Value, now: DateTime<Utc>) -> Result<String, ValidationError> {
        let fields = require(body, &["device_id", "status", "timestamp", "pond_id"])?;
        let device_id = match fields.get("device_id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_owned(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(ValidationError::InvalidField {
                    field: "device_id",
                    reason: "expected a non-empty string".to_owned(),
                })
            }
        };
        self.state.heartbeats.lock().await.record(&device_id, now);
        debug!(device_id = %device_id, status = ?fields.get("status"), "heartbeat received");
        Ok(device_id)
    }

    async fn dose_from_latest_sensor(&self, pond_id: i64, clarity: ClarityVerdict, now: DateTime<Utc>) -> DoseReport {
        let sensor = match self.store.latest(Category::Sensor, pond_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(pond_id, error = %e, "latest sensor lookup failed, using defaults");
                None
            }
        };
        let reading = |key: &str, default: f64| sensor.as_ref().and_then(|r| r.number(key)).unwrap_or(default);

        let inputs = DoseInputs {
            pond_id,
            pond_size_rai: self.pond_size(pond_id).await,
            ph: reading("ph", DEFAULT_PH),
            temperature: reading("temperature", DEFAULT_TEMPERATURE),
            dissolved_oxygen: reading("do", DEFAULT_DO),
            clarity,
            now,
        };
        self.doser.run(&inputs).await
    }

    async fn latest_clarity(&self, pond_id: i64) -> ClarityVerdict {
        match self.store.latest(Category::Water, pond_id).await {
            Ok(Some(record)) => ClarityVerdict::from_text(record.text_content.as_deref().unwrap_or_default()),
            Ok(None) => ClarityVerdict::NotClear,
            Err(e) => {
                warn!(pond_id, error = %e, "water result lookup failed");
                ClarityVerdict::NotClear
            }
        }
    }

    /// Pond size from the latest pond info, else the configured default.
    async fn pond_size(&self, pond_id: i64) -> f64 {
        let fallback = self.config.dosing.default_pond_size_rai;
        match self.store.latest_pond_info(pond_id).await {
            Ok(Some(info)) => info
                .get("pond_size_rai")
                .and_then(|v| value_as_f64(v).ok())
                .unwrap_or(fallback),
            Ok(None) => fallback,
            Err(e) => {
                warn!(pond_id, error = %e, "pond info lookup failed");
                fallback
            }
        }
    }

    /// Only aggregated ponds are cached; other records stay on disk.
    async fn cache_insert(&self, record: StatusRecord) {
        let Some(slot) = record.pond_id.and_then(|id| self.state.cache(id)) else {
            debug!(pond_id = ?record.pond_id, category = record.category.dir_name(), "pond not aggregated, not cached");
            return;
        };
        slot.lock().await.insert(record);
    }

    fn offset(&self) -> FixedOffset {
        self.config
            .aggregation
            .utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix())
    }

    fn local_timestamp(&self, now: DateTime<Utc>) -> String {
        now.with_timezone(&self.offset())
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string()
    }

    fn file_stamp(&self, now: DateTime<Utc>) -> String {
        now.with_timezone(&self.offset())
            .format("%Y%m%d_%H%M%S_%6f")
            .to_string()
    }
}

/// True when the floating-shrimp analyser reported a detection.
pub fn is_floating_detection(text: Option<&str>) -> bool {
    text.map(str::trim)
        .is_some_and(|t| !t.is_empty() && !t.contains(NO_FLOATING_SHRIMP))
}

/// Add a structured `shrimp_size` to a size result that only has text.
fn attach_structured_size(body: &mut Value) {
    let Some(fields) = body.as_object_mut() else {
        return;
    };
    if fields.contains_key("shrimp_size") {
        return;
    }
    let Some((length_cm, weight_avg_g)) = fields
        .get("text_content")
        .and_then(Value::as_str)
        .and_then(average_size)
    else {
        return;
    };
    let image_url = fields.get("output_image").cloned().unwrap_or(Value::Null);
    fields.insert(
        "shrimp_size".to_owned(),
        json!({
            "length_cm": length_cm,
            "weight_avg_g": weight_avg_g,
            "image_url": image_url,
        }),
    );
}

fn require<'a>(body: &'a Value, keys: &[&'static str]) -> Result<&'a Map<String, Value>, ValidationError> {
    let fields = body.as_object().ok_or(ValidationError::NotAnObject)?;
    for key in keys {
        if !fields.contains_key(*key) {
            return Err(ValidationError::MissingField(*key));
        }
    }
    Ok(fields)
}

fn number_field(fields: &Map<String, Value>, field: &'static str) -> Result<f64, ValidationError> {
    let raw = fields.get(field).ok_or(ValidationError::MissingField(field))?;
    value_as_f64(raw).map_err(|e| ValidationError::InvalidField {
        field,
        reason: e.to_string(),
    })
}

fn int_field(fields: &Map<String, Value>, field: &'static str) -> Result<i64, ValidationError> {
    let raw = fields.get(field).ok_or(ValidationError::MissingField(field))?;
    let parsed = match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ValidationError::InvalidField {
        field,
        reason: "not an integer".to_owned(),
    })
}
