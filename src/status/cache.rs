//! Most-recent record per category, for one pond.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use super::store::{Category, RecordSource};
use super::{first_ref, record_pond_id};

/// One ingested record, with the fields the builders read pulled out at
/// the boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    /// Category the record came from.
    pub category: Category,
    /// `pond_id` (or legacy `pond_number`), if the record carries one.
    pub pond_id: Option<i64>,
    /// Output image reference, first entry when the record held a list.
    pub output_image: Option<String>,
    /// Raw input image reference.
    pub raw_input_image: Option<String>,
    /// Output video reference.
    pub output_video: Option<String>,
    /// Analyser free text.
    pub text_content: Option<String>,
    /// The record as stored.
    pub payload: Value,
}

impl StatusRecord {
    /// Wrap a stored JSON record.
    pub fn from_value(category: Category, payload: Value) -> Self {
        let text = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_owned)
        };
        Self {
            category,
            pond_id: record_pond_id(&payload),
            output_image: payload.get("output_image").and_then(first_ref),
            raw_input_image: payload.get("raw_input_image").and_then(first_ref),
            output_video: payload.get("output_video").and_then(first_ref),
            text_content: text("text_content"),
            payload,
        }
    }

    /// Numeric or numeric-string field of the payload.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.payload
            .get(key)
            .and_then(|v| crate::error::value_as_f64(v).ok())
    }
}

/// Latest record per category for a single pond.
///
/// Records for other ponds are dropped on insert. A category with no new
/// record keeps whatever it last held.
#[derive(Debug, Clone)]
pub struct StatusCache {
    pond_id: i64,
    records: HashMap<Category, StatusRecord>,
}

impl StatusCache {
    /// Empty cache for `pond_id`.
    pub fn new(pond_id: i64) -> Self {
        Self {
            pond_id,
            records: HashMap::new(),
        }
    }

    /// Pond this cache belongs to.
    pub fn pond_id(&self) -> i64 {
        self.pond_id
    }

    /// Replace the category's record. Returns false (and keeps the old
    /// record) when the record belongs to another pond.
    pub fn insert(&mut self, record: StatusRecord) -> bool {
        if record.pond_id != Some(self.pond_id) {
            return false;
        }
        self.records.insert(record.category, record);
        true
    }

    /// Latest record of a category.
    pub fn get(&self, category: Category) -> Option<&StatusRecord> {
        self.records.get(&category)
    }

    /// Insert every record that belongs to this pond.
    pub fn apply(&mut self, records: impl IntoIterator<Item = StatusRecord>) {
        for record in records {
            self.insert(record);
        }
    }

    /// Pull the newest record of every category from `source`.
    pub async fn refresh(&mut self, source: &dyn RecordSource) {
        let records = fetch_latest(source, self.pond_id).await;
        self.apply(records);
    }
}

/// Newest record of every category for `pond_id`.
///
/// A failing category is logged and left out, so the cache keeps what it
/// held for it; the others still refresh.
pub async fn fetch_latest(source: &dyn RecordSource, pond_id: i64) -> Vec<StatusRecord> {
    let mut records = Vec::with_capacity(Category::ALL.len());
    for category in Category::ALL {
        match source.latest(category, pond_id).await {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(e) => warn!(
                pond_id,
                category = category.dir_name(),
                error = %e,
                "record refresh failed"
            ),
        }
    }
    records
}
