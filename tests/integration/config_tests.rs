use std::fs;

use clap::Parser;
use drivedupe::cli::{Cli, Commands};
use drivedupe::config::Config;
use drivedupe::hasher::HashAlgorithm;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use tempfile::tempdir;

use crate::ENV_MUTEX;

#[test]
fn test_config_load_defaults() {
    // No Env provider so other tests cannot interfere
    let figment = Figment::from(Serialized::defaults(Config::default()));
    let config: Config = figment.extract().unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.hash.algorithm, HashAlgorithm::Sha256);
    assert_eq!(config.tracker.subscriber_buffer, 64);
}

#[test]
fn test_config_load_from_toml() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
[hash]
algorithm = "blake3"
worker_count = 8
max_retries = 5

[retry]
initial_backoff_ms = 250
multiplier = 1.5

[tracker]
max_notifications_per_second = 0

[grouping]
min_size = 4096
mime_types = ["image/*"]
"#,
    )
    .unwrap();

    let figment =
        Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(&config_path));
    let config: Config = figment.extract().unwrap();

    assert_eq!(config.hash.algorithm, HashAlgorithm::Blake3);
    assert_eq!(config.hash.worker_count, 8);
    assert_eq!(config.hash.max_retries, 5);
    assert_eq!(config.retry.initial_backoff_ms, 250);
    assert_eq!(config.retry.max_backoff_ms, 30_000);
    assert!((config.retry.multiplier - 1.5).abs() < f64::EPSILON);
    assert_eq!(config.tracker.max_notifications_per_second, 0);
    assert_eq!(config.grouping.min_size, 4096);
    assert_eq!(config.grouping.mime_types, vec!["image/*"]);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_load_from_env() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    std::env::set_var("DRIVEDUPE_HASH__ALGORITHM", "blake3");
    std::env::set_var("DRIVEDUPE_HASH__WORKER_COUNT", "16");
    std::env::set_var("DRIVEDUPE_GROUPING__MIN_GROUP_SIZE", "3");

    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Env::prefixed("DRIVEDUPE_").split("__"));
    let config: Result<Config, _> = figment.extract();

    std::env::remove_var("DRIVEDUPE_HASH__ALGORITHM");
    std::env::remove_var("DRIVEDUPE_HASH__WORKER_COUNT");
    std::env::remove_var("DRIVEDUPE_GROUPING__MIN_GROUP_SIZE");

    let config = config.unwrap();
    assert_eq!(config.hash.algorithm, HashAlgorithm::Blake3);
    assert_eq!(config.hash.worker_count, 16);
    assert_eq!(config.grouping.min_group_size, 3);
}

#[test]
fn test_env_overrides_file() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[hash]\nmax_retries = 7\n").unwrap();

    std::env::set_var("DRIVEDUPE_HASH__MAX_RETRIES", "2");
    let config = Config::load_from_path(&config_path);
    std::env::remove_var("DRIVEDUPE_HASH__MAX_RETRIES");

    assert_eq!(config.unwrap().hash.max_retries, 2);
}

#[test]
fn test_invalid_toml_is_an_error_for_explicit_path() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "invalid = toml").unwrap();

    assert!(Config::load_from_path(&config_path).is_err());
}

#[test]
fn test_invalid_values_fall_back_to_defaults() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[retry]\nmultiplier = 0.1\n").unwrap();

    assert!(Config::load_from_path(&config_path).is_err());
    assert_eq!(Config::load(Some(&config_path)), Config::default());
}

#[test]
fn test_missing_explicit_file() {
    let temp_dir = tempdir().unwrap();
    assert!(Config::load_from_path(&temp_dir.path().join("nope.toml")).is_err());
}

#[test]
fn test_save_round_trip() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.hash.algorithm = HashAlgorithm::Blake3;
    config.grouping.extensions = vec!["jpg".into()];
    config.save_to(&config_path).unwrap();

    let saved = fs::read_to_string(&config_path).unwrap();
    assert!(saved.contains("algorithm = \"blake3\""));
    assert_eq!(Config::load_from_path(&config_path).unwrap(), config);
}

#[test]
fn test_cli_flags_override_config() {
    let cli = Cli::try_parse_from([
        "drivedupe",
        "scan",
        "/tmp",
        "--workers",
        "3",
        "--algorithm",
        "blake3",
        "--min-size",
        "1KiB",
        "--ext",
        "png",
        "--max-results",
        "5",
    ])
    .unwrap();
    let Commands::Scan(args) = cli.command else {
        panic!("Expected Scan command");
    };

    let mut config = Config::default();
    config.hash.worker_count = 12;
    config.merge_scan_args(&args);

    assert_eq!(config.hash.worker_count, 3);
    assert_eq!(config.hash.algorithm, HashAlgorithm::Blake3);
    assert_eq!(config.grouping.min_size, 1024);
    assert_eq!(config.grouping.extensions, vec!["png"]);

    let settings = config.service_settings();
    assert_eq!(settings.worker_count, 3);
    assert_eq!(settings.max_results, Some(5));
}
