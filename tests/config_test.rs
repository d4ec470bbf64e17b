//! Configuration files

use pretty_assertions::assert_eq;
use remote_marshal::config::{validate_config, Config, ConfigError, ConfigLoader};
use remote_marshal::StringEncoding;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_round_trip_through_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("remote-marshal.toml");
    let loader = ConfigLoader::new(&path);

    let mut config = Config::default();
    config.memory.max_string_bytes = 1024;
    config.logging.level = "debug".to_string();
    loader.save(&config).unwrap();

    let loaded = loader.load().unwrap();
    assert_eq!(loaded.memory.max_string_bytes, 1024);
    assert_eq!(loaded.logging.level, "debug");
    assert!(validate_config(&loaded).is_ok());
}

#[test]
fn test_sections_fall_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("partial.toml");
    fs::write(&path, "[scanner]\nparallel = false\n").unwrap();

    let config = ConfigLoader::new(&path).load().unwrap();
    assert!(!config.scanner.parallel);
    assert_eq!(config.memory.default_encoding, StringEncoding::Utf8);
    assert_eq!(config.memory.max_read_size, 10485760);
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[logging]\nlevel = \"loud\"\n").unwrap();

    let config = ConfigLoader::new(&path).load().unwrap();
    assert!(matches!(
        validate_config(&config),
        Err(ConfigError::Invalid(_))
    ));
}
