//! Status aggregation: durable per-category records, the per-pond cache
//! of the freshest record in each category, and the snapshot builders.

pub mod builder;
pub mod cache;
pub mod size_text;
pub mod store;

use serde_json::Value;

pub use builder::{build_pond_status, build_shrimp_size, format_timestamp, PondStatus, ShrimpSize};
pub use cache::{fetch_latest, StatusCache, StatusRecord};
pub use size_text::parse_size_text;
pub use store::{Category, RecordSource, RecordStore};

/// Normalize an image/video reference that may be a string or a list of
/// strings to its first entry.
pub fn first_ref(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(first_ref),
        _ => None,
    }
}

/// Pond id of a stored record: `pond_id`, else the legacy `pond_number`.
/// Integers and integer strings are accepted.
pub fn record_pond_id(value: &Value) -> Option<i64> {
    let raw = value.get("pond_id").or_else(|| value.get("pond_number"))?;
    match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
