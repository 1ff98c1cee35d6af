use gcodelink_settings::{Config, SettingsError, WireEncoding};
use std::fs;

#[test]
fn test_toml_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("printer.toml");

    let mut config = Config::for_port("/dev/ttyACM0", 250_000);
    config.protocol.encoding = WireEncoding::Utf8;
    config.protocol.max_consecutive_resends = Some(20);
    config.multipliers.speed = Some(1.2);
    config.low_power = true;
    config.save_to_file(&path).unwrap();

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_json_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("printer.json");

    let mut config = Config::default();
    config.responses.online = vec!["start".to_string()];
    config.save_to_file(&path).unwrap();

    assert_eq!(Config::load_from_file(&path).unwrap(), config);
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.toml");
    fs::write(
        &path,
        "[connection]\nport = \"/dev/ttyUSB0\"\nbaud_rate = 115200\n\n[responses]\ngood = [\"ok\", \"OK\"]\n",
    )
    .unwrap();

    let config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB0"));
    assert_eq!(config.connection.read_timeout_ms, 100);
    assert_eq!(config.responses.good, vec!["ok", "OK"]);
    assert_eq!(config.responses.resend, vec!["rs", "resend"]);
    assert_eq!(config.protocol.bring_up_query, "M105");
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[protocol]\nresend_window = 0\n").unwrap();

    let err = Config::load_from_file(&path).unwrap_err();
    assert!(matches!(err, SettingsError::InvalidSetting { .. }));
}

#[test]
fn test_missing_file() {
    let err = Config::load_from_file(std::path::Path::new("/no/such/config.toml")).unwrap_err();
    assert!(matches!(err, SettingsError::LoadError(_)));
}
