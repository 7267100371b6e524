//! Snapshot builders: merge the cached records into the two app-facing
//! views. Missing sources fall back to null / zero / "unknown"; building
//! never fails.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::cache::{StatusCache, StatusRecord};
use super::size_text::average_size;
use super::store::Category;

/// Water-quality and consumables view of one pond.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PondStatus {
    /// Pond id, as a string.
    #[serde(rename = "pondId")]
    pub pond_id: String,
    /// Build time, local to the configured offset.
    pub timestamp: String,
    /// Dissolved oxygen.
    #[serde(rename = "DO")]
    pub dissolved_oxygen: Option<f64>,
    /// pH.
    #[serde(rename = "PH")]
    pub ph: Option<f64>,
    /// Water temperature.
    #[serde(rename = "Temp")]
    pub temperature: Option<f64>,
    /// Water colour verdict text.
    #[serde(rename = "ColorWater")]
    pub color_water: String,
    /// Powder channel 0 remaining, kg.
    #[serde(rename = "Mineral_1")]
    pub mineral_1: f64,
    /// Powder channel 1 remaining, kg.
    #[serde(rename = "Mineral_2")]
    pub mineral_2: f64,
    /// Liquid channel 0 near-empty flag, `"true"` / `"false"`.
    #[serde(rename = "Mineral_3")]
    pub mineral_3: String,
    /// Liquid channel 1 near-empty flag, `"true"` / `"false"`.
    #[serde(rename = "Mineral_4")]
    pub mineral_4: String,
    /// Water colour image.
    #[serde(rename = "PicColorWater")]
    pub pic_color_water: Option<String>,
    /// Floating shrimp image.
    #[serde(rename = "PicKungOnWater")]
    pub pic_kung_on_water: Option<String>,
}

/// Shrimp growth view of one pond.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShrimpSize {
    /// Pond id.
    #[serde(rename = "pondId")]
    pub pond_id: i64,
    /// Build time, local to the configured offset.
    pub timestamp: String,
    /// Mean length, cm, 2 decimals.
    #[serde(rename = "Size_CM")]
    pub size_cm: Option<f64>,
    /// Mean weight, g, 2 decimals.
    #[serde(rename = "Size_gram")]
    pub size_gram: Option<f64>,
    /// Size analysis image.
    #[serde(rename = "SizePic")]
    pub size_pic: Option<String>,
    /// Feeding tray image: raw input, else the size image.
    #[serde(rename = "PicFood")]
    pub pic_food: Option<String>,
    /// Shrimp activity video.
    #[serde(rename = "PicKungDin")]
    pub pic_kung_din: Option<String>,
}

/// Format `now` as `%Y-%m-%dT%H:%M:%S` at a fixed UTC offset.
///
/// An out-of-range offset falls back to UTC.
pub fn format_timestamp(now: DateTime<Utc>, utc_offset_hours: i32) -> String {
    let offset = utc_offset_hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix());
    now.with_timezone(&offset)
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

/// Build the PondStatus view from the cache.
pub fn build_pond_status(cache: &StatusCache, timestamp: String) -> PondStatus {
    let sensor = cache.get(Category::Sensor);
    let tank = cache.get(Category::Tank);
    let water = cache.get(Category::Water);
    let shrimp = cache.get(Category::Shrimp);

    let sensor_value = |key: &str| sensor.and_then(|r| r.number(key));

    let remaining: &[Value] = tank
        .and_then(|r| r.payload.get("remaining_g"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let color_water = water
        .and_then(|r| r.text_content.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("unknown")
        .to_owned();

    PondStatus {
        pond_id: cache.pond_id().to_string(),
        timestamp,
        dissolved_oxygen: sensor_value("do"),
        ph: sensor_value("ph"),
        temperature: sensor_value("temperature"),
        color_water,
        mineral_1: kg_slot(remaining.first()),
        mineral_2: kg_slot(remaining.get(1)),
        mineral_3: flag_slot(remaining.get(2)),
        mineral_4: flag_slot(remaining.get(3)),
        pic_color_water: water.and_then(|r| r.output_image.clone()),
        pic_kung_on_water: shrimp.and_then(|r| r.output_image.clone()),
    }
}

/// Build the ShrimpSize view from the cache.
pub fn build_shrimp_size(cache: &StatusCache, timestamp: String) -> ShrimpSize {
    let size = cache.get(Category::Size);
    let video = cache.get(Category::Video);

    let (length, weight) = size.map_or((None, None), extract_size);
    let size_pic = size.and_then(|r| r.output_image.clone());
    let pic_food = size
        .and_then(|r| r.raw_input_image.clone())
        .or_else(|| size_pic.clone());

    ShrimpSize {
        pond_id: cache.pond_id(),
        timestamp,
        size_cm: length.map(round2),
        size_gram: weight.map(round2),
        size_pic,
        pic_food,
        pic_kung_din: video.and_then(|r| r.output_video.clone()),
    }
}

/// Length and weight from the structured `shrimp_size` field, else from
/// the analyser text.
fn extract_size(record: &StatusRecord) -> (Option<f64>, Option<f64>) {
    if let Some(structured) = record.payload.get("shrimp_size").filter(|v| v.is_object()) {
        let field = |key: &str| {
            structured
                .get(key)
                .and_then(|v| crate::error::value_as_f64(v).ok())
        };
        return (field("length_cm"), field("weight_avg_g"));
    }
    record
        .text_content
        .as_deref()
        .and_then(average_size)
        .map_or((None, None), |(l, w)| (Some(l), Some(w)))
}

fn kg_slot(value: Option<&Value>) -> f64 {
    value.and_then(Value::as_f64).filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn flag_slot(value: Option<&Value>) -> String {
    let near_empty = match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };
    near_empty.to_string()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
