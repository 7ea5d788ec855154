//! Integration tests for environment-driven configuration.

use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;
use url_archiver::config::Config;

const VARS: &[&str] = &[
    "ARCHIVER_DATA_DIR",
    "ARCHIVER_DATABASE_PATH",
    "ARCHIVER_WEB_PORT",
    "ARCHIVER_WORKER_CONCURRENCY",
    "ARCHIVER_JOB_TIMEOUT_SECS",
    "ARCHIVER_MAX_ATTEMPTS",
    "ARCHIVER_ALLOW_DELETE",
    "ARCHIVER_STATIC_DIR",
    "ARCHIVER_YT_DLP_PATH",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_defaults_without_environment() {
    clear_env();

    let config = Config::from_env().expect("defaults should load");

    assert_eq!(config.data_dir, PathBuf::from("./data"));
    assert_eq!(
        config.database_path,
        PathBuf::from("./data").join("archiver.sqlite")
    );
    assert_eq!(config.web_port, 8080);
    assert_eq!(config.max_attempts, 1);
    assert!(config.allow_delete);
    assert!(config.static_dir.is_none());
    assert_eq!(config.yt_dlp_path, "yt-dlp");
    config.validate().expect("defaults should be valid");
}

#[test]
#[serial]
fn test_environment_overrides() {
    clear_env();
    std::env::set_var("ARCHIVER_DATA_DIR", "/srv/archiver");
    std::env::set_var("ARCHIVER_WEB_PORT", "9000");
    std::env::set_var("ARCHIVER_WORKER_CONCURRENCY", "4");
    std::env::set_var("ARCHIVER_JOB_TIMEOUT_SECS", "90");
    std::env::set_var("ARCHIVER_ALLOW_DELETE", "false");
    std::env::set_var("ARCHIVER_YT_DLP_PATH", "/opt/bin/yt-dlp");

    let config = Config::from_env().expect("overrides should load");
    clear_env();

    assert_eq!(config.data_dir, PathBuf::from("/srv/archiver"));
    assert_eq!(
        config.database_path,
        PathBuf::from("/srv/archiver/archiver.sqlite")
    );
    assert_eq!(config.archives_dir(), PathBuf::from("/srv/archiver/archives"));
    assert_eq!(config.web_port, 9000);
    assert_eq!(config.worker_concurrency, 4);
    assert_eq!(config.job_timeout, Duration::from_secs(90));
    assert!(!config.allow_delete);
    assert_eq!(config.yt_dlp_path, "/opt/bin/yt-dlp");
}

#[test]
#[serial]
fn test_explicit_database_path() {
    clear_env();
    std::env::set_var("ARCHIVER_DATABASE_PATH", "/var/lib/archive.db");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.database_path, PathBuf::from("/var/lib/archive.db"));
}

#[test]
#[serial]
fn test_unparseable_values_are_errors() {
    clear_env();
    std::env::set_var("ARCHIVER_WEB_PORT", "eighty");
    let port = Config::from_env();
    clear_env();
    assert!(port.is_err());

    std::env::set_var("ARCHIVER_ALLOW_DELETE", "maybe");
    let flag = Config::from_env();
    clear_env();
    assert!(flag.is_err());
}

#[test]
#[serial]
fn test_zero_attempts_fails_validation() {
    clear_env();
    std::env::set_var("ARCHIVER_MAX_ATTEMPTS", "0");

    let config = Config::from_env().unwrap();
    clear_env();

    assert!(config.validate().is_err());
}
