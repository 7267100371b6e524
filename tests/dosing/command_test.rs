//! Tests for the dose command wire format.

use pondside::dosing::{CommandKind, DoseCommand};

#[test]
fn encode_decode_preserves_pond_and_magnitudes() {
    let command = DoseCommand::new(CommandKind::Powder, 3, vec![4, 0]);
    let bytes = command.encode().expect("should encode");
    let decoded = DoseCommand::decode(&bytes).expect("should decode");
    assert_eq!(decoded.pond_id(), 3);
    assert_eq!(decoded.magnitudes(), &[4, 0]);
    assert_eq!(decoded.kind(), CommandKind::Powder);
}

#[test]
fn wire_shape_matches_controller_firmware() {
    let servo = DoseCommand::new(CommandKind::Powder, 1, vec![4, 4]);
    let value: serde_json::Value =
        serde_json::from_slice(&servo.encode().expect("should encode")).expect("valid json");
    assert_eq!(
        value,
        serde_json::json!({"type": "dose_servo", "pond_id": 1, "rounds": [4, 4]})
    );

    let pump = DoseCommand::new(CommandKind::Liquid, 2, vec![4, 3]);
    let value: serde_json::Value =
        serde_json::from_slice(&pump.encode().expect("should encode")).expect("valid json");
    assert_eq!(
        value,
        serde_json::json!({"type": "dose_pump", "pond_id": 2, "durations": [4, 3]})
    );
}

#[test]
fn decode_rejects_unknown_type_and_negative_magnitudes() {
    assert!(DoseCommand::decode(br#"{"type":"dose_laser","pond_id":1,"rounds":[1]}"#).is_err());
    assert!(DoseCommand::decode(br#"{"type":"dose_servo","pond_id":1,"rounds":[-1]}"#).is_err());
    assert!(DoseCommand::decode(br#"{"type":"dose_pump","pond_id":1}"#).is_err());
}

#[test]
fn all_zero_command_is_noop() {
    assert!(DoseCommand::new(CommandKind::Liquid, 1, vec![0, 0]).is_noop());
    assert!(!DoseCommand::new(CommandKind::Liquid, 1, vec![0, 1]).is_noop());
}
