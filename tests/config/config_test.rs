//! Coverage for the shipped sample config and loading precedence.

use std::path::PathBuf;

use pondside::config::PondsideConfig;

const SAMPLE: &str = include_str!("../../config.example.toml");

#[test]
fn sample_config_parses_and_validates() {
    let config = match PondsideConfig::from_toml(SAMPLE) {
        Ok(config) => config,
        Err(err) => panic!("sample config should parse: {err:#}"),
    };
    assert!(config.validate().is_ok());
    assert_eq!(config.server.bind, "0.0.0.0:8001");
    assert_eq!(config.tank.powder_curves.len(), 2);
    assert!((config.tank.powder_curves[0].interpolate(7.5) - 12_500.0).abs() < 1e-9);
    assert!(config.endpoints.status_url.is_none());
    assert!(config.alerts.login_url.is_none());
}

#[test]
fn sample_config_matches_defaults() {
    let sample = PondsideConfig::from_toml(SAMPLE).expect("sample config should parse");
    let defaults = PondsideConfig::default();

    assert_eq!(sample.storage.root, defaults.storage.root);
    assert_eq!(sample.mqtt.command_topic, defaults.mqtt.command_topic);
    assert_eq!(sample.aggregation.ponds, defaults.aggregation.ponds);
    assert_eq!(sample.heartbeat.timeout_secs, defaults.heartbeat.timeout_secs);
    assert_eq!(sample.dosing.probiotic_interval_days, defaults.dosing.probiotic_interval_days);
    assert_eq!(sample.tank.powder_curves, defaults.tank.powder_curves);
}

#[test]
fn env_wins_over_sample_file() {
    let mut config = PondsideConfig::from_toml(SAMPLE).expect("sample config should parse");
    config.apply_overrides(|key| match key {
        "PONDSIDE_DATA_PONDS_DIR" => Some("/tmp/ponds".to_owned()),
        "PONDSIDE_PUSH_URL" => Some("https://push.example/api".to_owned()),
        "PONDSIDE_BIND" => Some("127.0.0.1:9000".to_owned()),
        _ => None,
    });

    assert_eq!(config.storage.data_ponds_dir, PathBuf::from("/tmp/ponds"));
    assert_eq!(config.alerts.push_url.as_deref(), Some("https://push.example/api"));
    assert_eq!(config.server.bind, "127.0.0.1:9000");
    assert!(config.validate().is_ok());
}

#[test]
fn malformed_toml_is_an_error() {
    assert!(PondsideConfig::from_toml("[aggregation\ninterval_secs = 1").is_err());
    assert!(PondsideConfig::from_toml("[aggregation]\ninterval_secs = \"soon\"").is_err());
}
