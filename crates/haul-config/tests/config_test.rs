//! Integration tests for haul-config
//!
//! These tests exercise config loading with real files on disk.

use std::path::PathBuf;

use haul_config::{Config, ConfigError, DedupGranularity, LogLevel, OverlapPolicy};
use tempfile::tempdir;

const FULL_CONFIG: &str = r#"
[remote]
root = "/data"
mount = "/mnt/sftp"

[local]
target = "/srv/haul/target"
staging = "/srv/haul/staging"

[store]
path = "/var/lib/haul/completions.lmdb"

[engine]
concurrency = 8
progress_interval_secs = 2
granularity = "per-leaf"
overlap = "queue"

[schedule]
every_secs = 900

[log]
level = "debug"
"#;

#[test]
fn test_load_explicit_config_file() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, FULL_CONFIG).unwrap();

    let config = Config::from_file(&path).unwrap();

    assert_eq!(config.remote.root, "/data");
    assert_eq!(config.remote.mount, PathBuf::from("/mnt/sftp"));
    assert_eq!(config.local.staging, PathBuf::from("/srv/haul/staging"));
    assert_eq!(config.engine.concurrency, 8);
    assert_eq!(config.engine.granularity, DedupGranularity::PerLeaf);
    assert_eq!(config.engine.overlap, OverlapPolicy::Queue);
    assert_eq!(config.schedule.every_secs, 900);
    assert_eq!(config.log.level, LogLevel::Debug);
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_file_keeps_defaults() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[remote]
root = "/data"
"#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.remote.root, "/data");
    assert_eq!(config.engine.concurrency, 4);
    assert_eq!(config.schedule.every_secs, 3600);
    assert!(matches!(
        config.validate(),
        Err(ConfigError::Missing("remote.mount"))
    ));
}

#[test]
fn test_project_file_overrides_global() {
    let temp = tempdir().unwrap();
    let global_path = temp.path().join("global.toml");
    let project_path = temp.path().join("haul.toml");
    std::fs::write(&global_path, FULL_CONFIG).unwrap();
    std::fs::write(
        &project_path,
        r#"
[remote]
root = "/exports/nightly"

[engine]
concurrency = 2
"#,
    )
    .unwrap();

    let mut config = Config::from_file(&global_path).unwrap();
    config.merge(Config::from_file(&project_path).unwrap());

    assert_eq!(config.remote.root, "/exports/nightly");
    assert_eq!(config.engine.concurrency, 2);
    // Untouched by the project file
    assert_eq!(config.remote.mount, PathBuf::from("/mnt/sftp"));
    assert_eq!(config.engine.granularity, DedupGranularity::PerLeaf);
}

#[test]
fn test_load_with_missing_explicit_file_fails() {
    let temp = tempdir().unwrap();
    let err = Config::load(Some(&temp.path().join("nope.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_malformed_toml_is_reported() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[engine]\nconcurrency = \"lots\"\n").unwrap();

    assert!(matches!(
        Config::from_file(&path).unwrap_err(),
        ConfigError::Toml(_)
    ));
}
