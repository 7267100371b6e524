//! Durable per-category record storage on the local filesystem.
//!
//! Every ingested record is written as its own timestamped JSON file under
//! `{root}/{category}/`. The newest file (by modification time) whose pond
//! id matches is the category's latest record. Snapshots are written with
//! temp-file-then-rename so readers never see a partial file.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::StatusRecord;

/// Source category of a status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Water quality sensor readings.
    Sensor,
    /// Consumable tank levels.
    Tank,
    /// Water colour image analysis.
    Water,
    /// Floating shrimp image analysis.
    Shrimp,
    /// Shrimp size image analysis.
    Size,
    /// Shrimp activity video analysis.
    Video,
}

impl Category {
    /// Every category.
    pub const ALL: [Self; 6] = [
        Self::Sensor,
        Self::Tank,
        Self::Water,
        Self::Shrimp,
        Self::Size,
        Self::Video,
    ];

    /// Directory name under the storage root.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Sensor => "sensor",
            Self::Tank => "san",
            Self::Water => "water",
            Self::Shrimp => "shrimp",
            Self::Size => "size",
            Self::Video => "din",
        }
    }

    /// Parse an analysis result kind as posted by the inference workers.
    pub fn from_result_kind(kind: &str) -> Option<Self> {
        match kind {
            "water" => Some(Self::Water),
            "shrimp" => Some(Self::Shrimp),
            "size" => Some(Self::Size),
            "din" | "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// Reads the latest record of a category for a pond.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Newest record in `category` belonging to `pond_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures; an absent or empty
    /// category is `Ok(None)`.
    async fn latest(&self, category: Category, pond_id: i64) -> anyhow::Result<Option<StatusRecord>>;
}

/// Filesystem-backed record store.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
    data_ponds_dir: PathBuf,
}

impl RecordStore {
    /// Create a store rooted at `root`, with pond info under `data_ponds_dir`.
    pub fn new(root: PathBuf, data_ponds_dir: PathBuf) -> Self {
        Self {
            root,
            data_ponds_dir,
        }
    }

    /// Create every category directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        for category in Category::ALL {
            let dir = self.category_dir(category);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        std::fs::create_dir_all(&self.data_ponds_dir)
            .with_context(|| format!("failed to create {}", self.data_ponds_dir.display()))?;
        Ok(())
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one category's records.
    pub fn category_dir(&self, category: Category) -> PathBuf {
        self.root.join(category.dir_name())
    }

    /// Path of the PondStatus snapshot for a pond.
    pub fn status_snapshot_path(&self, pond_id: i64) -> PathBuf {
        self.root.join(format!("pond_{pond_id}_status.json"))
    }

    /// Path of the ShrimpSize snapshot for a pond.
    pub fn size_snapshot_path(&self, pond_id: i64) -> PathBuf {
        self.root.join(format!("pond_{pond_id}_shrimp_size.json"))
    }

    /// Persist a record as `{category}/{stem}.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn save(
        &self,
        category: Category,
        stem: &str,
        record: &serde_json::Value,
    ) -> anyhow::Result<PathBuf> {
        let dir = self.category_dir(category);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(format!("{stem}.json"));
        write_json_atomic(&path, record).await?;
        debug!(path = %path.display(), "record saved");
        Ok(path)
    }

    /// Persist a pond info record as `pond_{id}_{stamp}.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn save_pond_info(
        &self,
        pond_id: i64,
        stamp: &str,
        record: &serde_json::Value,
    ) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.data_ponds_dir)
            .await
            .with_context(|| format!("failed to create {}", self.data_ponds_dir.display()))?;
        let path = self
            .data_ponds_dir
            .join(format!("pond_{pond_id}_{stamp}.json"));
        write_json_atomic(&path, record).await?;
        Ok(path)
    }

    /// Latest posted pond info for a pond (file names sort by stamp).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be read.
    pub async fn latest_pond_info(&self, pond_id: i64) -> anyhow::Result<Option<serde_json::Value>> {
        let dir = self.data_ponds_dir.clone();
        let prefix = format!("pond_{pond_id}_");
        tokio::task::spawn_blocking(move || latest_pond_info_sync(&dir, &prefix))
            .await
            .context("pond info reader panicked")?
    }

    /// Read a persisted snapshot, if one has been written.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is unreadable or malformed.
    pub async fn read_snapshot(&self, path: &Path) -> anyhow::Result<Option<serde_json::Value>> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => serde_json::from_str(&text)
                .map(Some)
                .with_context(|| format!("malformed snapshot {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::anyhow!("failed to read {}: {e}", path.display())),
        }
    }
}

#[async_trait]
impl RecordSource for RecordStore {
    async fn latest(&self, category: Category, pond_id: i64) -> anyhow::Result<Option<StatusRecord>> {
        let dir = self.category_dir(category);
        let value = tokio::task::spawn_blocking(move || latest_json_sync(&dir, pond_id))
            .await
            .context("record reader panicked")??;
        Ok(value.map(|v| StatusRecord::from_value(category, v)))
    }
}

/// Write JSON to `path` via a sibling temp file and rename.
///
/// # Errors
///
/// Returns an error if serialization, the write, or the rename fails.
pub async fn write_json_atomic(path: &Path, value: &impl Serialize) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize record")?;

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("failed to rename {}", tmp_path.display()))?;
    Ok(())
}

/// Newest `.json` file in `dir` whose pond id matches.
///
/// Unreadable or malformed files are skipped.
fn latest_json_sync(dir: &Path, pond_id: i64) -> anyhow::Result<Option<serde_json::Value>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(anyhow::anyhow!("failed to read {}: {e}", dir.display())),
    };

    let mut files: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|ext| ext.to_str()) == Some("json"))
        .filter_map(|p| {
            let modified = std::fs::metadata(&p).and_then(|m| m.modified()).ok()?;
            Some((modified, p))
        })
        .collect();
    files.sort_by(|a, b| b.cmp(a));

    for (_, path) in files {
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
            continue;
        };
        if super::record_pond_id(&value) == Some(pond_id) {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn latest_pond_info_sync(dir: &Path, prefix: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(anyhow::anyhow!("failed to read {}: {e}", dir.display())),
    };

    let latest = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name.starts_with(prefix) && name.ends_with(".json"))
        .max();

    let Some(name) = latest else {
        return Ok(None);
    };
    let path = dir.join(name);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .map(Some)
        .with_context(|| format!("malformed pond info {}", path.display()))
}
