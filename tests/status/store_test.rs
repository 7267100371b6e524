//! Tests for the filesystem record store.

use std::time::Duration;

use serde_json::json;

use pondside::status::{Category, RecordSource, RecordStore};

fn store(root: &std::path::Path) -> RecordStore {
    let store = RecordStore::new(root.join("local_storage"), root.join("data_ponds"));
    store.ensure_layout().expect("should create storage layout");
    store
}

#[tokio::test]
async fn latest_skips_other_ponds() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let store = store(dir.path());

    store
        .save(Category::Water, "water_a", &json!({"pond_id": 1, "text_content": "clear"}))
        .await
        .expect("should save");
    tokio::time::sleep(Duration::from_millis(20)).await;
    store
        .save(Category::Water, "water_b", &json!({"pond_number": 2, "text_content": "green"}))
        .await
        .expect("should save");

    let pond1 = store
        .latest(Category::Water, 1)
        .await
        .expect("should scan")
        .expect("pond 1 has a record");
    assert_eq!(pond1.text_content.as_deref(), Some("clear"));

    let pond2 = store
        .latest(Category::Water, 2)
        .await
        .expect("should scan")
        .expect("pond 2 has a record");
    assert_eq!(pond2.text_content.as_deref(), Some("green"));

    assert!(store.latest(Category::Water, 3).await.expect("should scan").is_none());
}

#[tokio::test]
async fn latest_prefers_newest_file() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let store = store(dir.path());

    store
        .save(Category::Sensor, "sensor_z_old", &json!({"pond_id": 1, "ph": 6.0}))
        .await
        .expect("should save");
    tokio::time::sleep(Duration::from_millis(20)).await;
    store
        .save(Category::Sensor, "sensor_a_new", &json!({"pond_id": 1, "ph": 7.5}))
        .await
        .expect("should save");

    let latest = store
        .latest(Category::Sensor, 1)
        .await
        .expect("should scan")
        .expect("pond 1 has a record");
    assert_eq!(latest.number("ph"), Some(7.5));
}

#[tokio::test]
async fn malformed_files_are_skipped() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let store = store(dir.path());

    store
        .save(Category::Shrimp, "shrimp_ok", &json!({"pond_id": 1, "text_content": "ok"}))
        .await
        .expect("should save");
    tokio::time::sleep(Duration::from_millis(20)).await;
    std::fs::write(store.category_dir(Category::Shrimp).join("broken.json"), "{not json")
        .expect("should write broken file");

    let latest = store
        .latest(Category::Shrimp, 1)
        .await
        .expect("should scan")
        .expect("the valid record survives");
    assert_eq!(latest.text_content.as_deref(), Some("ok"));
}

#[tokio::test]
async fn missing_category_dir_is_empty() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let store = RecordStore::new(dir.path().join("nowhere"), dir.path().join("nope"));
    assert!(store.latest(Category::Video, 1).await.expect("should scan").is_none());
    assert!(store.latest_pond_info(1).await.expect("should scan").is_none());
}

#[tokio::test]
async fn latest_pond_info_sorts_by_stamp() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let store = store(dir.path());

    store
        .save_pond_info(1, "20250102_000000_000000", &json!({"pond_id": 1, "pond_size_rai": 2}))
        .await
        .expect("should save");
    store
        .save_pond_info(1, "20250101_000000_000000", &json!({"pond_id": 1, "pond_size_rai": 1}))
        .await
        .expect("should save");
    store
        .save_pond_info(12, "20250301_000000_000000", &json!({"pond_id": 12, "pond_size_rai": 9}))
        .await
        .expect("should save");

    let info = store
        .latest_pond_info(1)
        .await
        .expect("should scan")
        .expect("pond 1 has info");
    assert_eq!(info["pond_size_rai"], 2);
}

#[tokio::test]
async fn snapshots_round_trip_through_disk() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let store = store(dir.path());
    let path = store.status_snapshot_path(4);

    assert!(store.read_snapshot(&path).await.expect("should read").is_none());

    pondside::status::store::write_json_atomic(&path, &json!({"pondId": "4"}))
        .await
        .expect("should write");
    let read = store.read_snapshot(&path).await.expect("should read");
    assert_eq!(read, Some(json!({"pondId": "4"})));
    assert!(!path.with_extension("json.tmp").exists());
}
