//! Tests for configuration file resolution and graceful degradation
//!
//! Tests that manipulate PARTYQ_* environment variables are marked
//! #[serial] so they never run concurrently with each other.

use partyq_common::config::{
    resolve_config_path, BackendKind, TomlConfig, CONFIG_PATH_ENV, SPOTIFY_CLIENT_ID_ENV,
    SPOTIFY_CLIENT_SECRET_ENV, SPOTIFY_REFRESH_TOKEN_ENV,
};
use partyq_common::Error;
use serial_test::serial;
use std::env;
use std::io::Write;

#[test]
#[serial]
fn test_explicit_path_wins_over_env() {
    env::set_var(CONFIG_PATH_ENV, "/tmp/partyq-from-env.toml");
    let explicit = std::path::Path::new("/tmp/partyq-explicit.toml");

    let resolved = resolve_config_path(Some(explicit));
    assert_eq!(resolved.as_deref(), Some(explicit));

    env::remove_var(CONFIG_PATH_ENV);
}

#[test]
#[serial]
fn test_env_path_used_without_explicit() {
    env::set_var(CONFIG_PATH_ENV, "/tmp/partyq-from-env.toml");

    let resolved = resolve_config_path(None);
    assert_eq!(
        resolved.as_deref(),
        Some(std::path::Path::new("/tmp/partyq-from-env.toml"))
    );

    env::remove_var(CONFIG_PATH_ENV);
}

#[test]
fn test_missing_file_degrades_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("does-not-exist.toml");

    let config = TomlConfig::load_or_default(Some(&path)).unwrap();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.playback.backend, BackendKind::Spotify);
}

#[test]
fn test_no_path_degrades_to_defaults() {
    let config = TomlConfig::load_or_default(None).unwrap();
    assert_eq!(config.scheduler.interval_ms, 1000);
}

#[test]
fn test_load_full_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[server]
bind = "127.0.0.1"
port = 7000

[scheduler]
interval_ms = 250
check_attempts = 3
end_of_track_threshold_ms = 500

[playback]
backend = "memory"
volume_step = 5

[party]
admin_password = "hunter2"

[logging]
level = "debug"
"#
    )
    .unwrap();

    let config = TomlConfig::load_or_default(Some(file.path())).unwrap();
    assert_eq!(config.server.bind, "127.0.0.1");
    assert_eq!(config.server.port, 7000);
    assert_eq!(config.scheduler.interval_ms, 250);
    assert_eq!(config.scheduler.check_attempts, 3);
    assert_eq!(config.scheduler.end_of_track_threshold_ms, 500);
    assert_eq!(config.playback.backend, BackendKind::Memory);
    assert_eq!(config.playback.volume_step, 5);
    assert_eq!(config.party.admin_password.as_deref(), Some("hunter2"));
    assert_eq!(config.logging.level, "debug");
    assert!(config.validate().is_ok());
}

#[test]
fn test_malformed_file_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[scheduler]\ninterval_ms = \"fast\"").unwrap();

    let err = TomlConfig::load_or_default(Some(file.path())).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
#[serial]
fn test_env_supplies_spotify_credentials() {
    env::set_var(SPOTIFY_CLIENT_ID_ENV, "env-id");
    env::set_var(SPOTIFY_CLIENT_SECRET_ENV, "env-secret");
    env::set_var(SPOTIFY_REFRESH_TOKEN_ENV, "env-refresh");

    let mut config = TomlConfig::from_toml_str(
        r#"
        [spotify]
        client_id = "file-id"
        "#,
    )
    .unwrap();
    config.apply_env_overrides();

    assert_eq!(config.spotify.client_id.as_deref(), Some("env-id"));
    assert_eq!(config.spotify.client_secret.as_deref(), Some("env-secret"));
    assert_eq!(config.spotify.refresh_token.as_deref(), Some("env-refresh"));
    assert!(config.validate().is_ok());

    env::remove_var(SPOTIFY_CLIENT_ID_ENV);
    env::remove_var(SPOTIFY_CLIENT_SECRET_ENV);
    env::remove_var(SPOTIFY_REFRESH_TOKEN_ENV);
}

#[test]
#[serial]
fn test_incomplete_credentials_fail_validation() {
    env::remove_var(SPOTIFY_CLIENT_ID_ENV);
    env::remove_var(SPOTIFY_CLIENT_SECRET_ENV);
    env::remove_var(SPOTIFY_REFRESH_TOKEN_ENV);

    let mut config = TomlConfig::from_toml_str(
        r#"
        [spotify]
        client_id = "id"
        client_secret = ""
        refresh_token = "refresh"
        "#,
    )
    .unwrap();
    config.apply_env_overrides();

    assert!(matches!(config.validate(), Err(Error::NotInitialized(_))));
}
