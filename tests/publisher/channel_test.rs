//! Tests for the MQTT command channel.

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use pondside::config::MqttConfig;
use pondside::dosing::{CommandKind, DoseCommand};
use pondside::error::TransportError;
use pondside::publisher::{decode_tank_reading, CommandSink, MqttPublisher, ReconnectPolicy};

fn unreachable_broker() -> MqttConfig {
    MqttConfig {
        host: "127.0.0.1".to_owned(),
        port: 1,
        reconnect_delay_secs: 1,
        ..MqttConfig::default()
    }
}

#[test]
fn status_payload_with_powder_distances_is_a_tank_reading() {
    let reading = decode_tank_reading(br#"{"pond_id": 2, "powder_distances": [12, "14.5"], "water_levels": [3]}"#)
        .expect("should decode tank reading");
    assert_eq!(reading.pond_id, 2);
    assert_eq!(reading.powder_distances.len(), 2);
    assert_eq!(reading.water_levels.len(), 1);
}

#[test]
fn pond_defaults_to_one() {
    let reading = decode_tank_reading(br#"{"powder_distances": [10]}"#).expect("should decode tank reading");
    assert_eq!(reading.pond_id, 1);
    assert!(reading.water_levels.is_empty());
}

#[test]
fn other_status_messages_are_ignored() {
    assert!(decode_tank_reading(br#"{"status": "online"}"#).is_none());
    assert!(decode_tank_reading(br#"{"water_levels": [1, 2]}"#).is_none());
    assert!(decode_tank_reading(b"not json").is_none());
    assert!(decode_tank_reading(br#"{"powder_distances": 5}"#).is_none());
}

#[test]
fn default_reconnect_delay_is_fixed() {
    let policy = ReconnectPolicy::default();
    assert_eq!(policy.next(0), Duration::from_secs(5));
    assert_eq!(policy.next(7), Duration::from_secs(5));
}

#[tokio::test]
async fn commands_are_rejected_while_disconnected() {
    let (tx, _rx) = mpsc::channel(1);
    let (publisher, _supervisor) = MqttPublisher::new(&unreachable_broker(), tx);

    assert!(!publisher.is_connected());
    let command = DoseCommand::new(CommandKind::Liquid, 1, vec![4, 0]);
    match publisher.publish(&command).await {
        Err(TransportError::Disconnected) => {}
        other => panic!("expected Disconnected, got {other:?}"),
    }
}

#[tokio::test]
async fn supervisor_survives_failures_and_stops_on_shutdown() {
    let (tx, _rx) = mpsc::channel(1);
    let (publisher, supervisor) = MqttPublisher::new(&unreachable_broker(), tx);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(supervisor.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());
    assert!(!publisher.is_connected());

    shutdown_tx.send(true).expect("supervisor should be listening");
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("supervisor should stop promptly")
        .expect("supervisor should not panic");
}
