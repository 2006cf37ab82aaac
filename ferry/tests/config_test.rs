//! Tests for config module

use ferry::config::Config;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_default_config() {
    let config = Config::default();

    assert_eq!(config.server.bind_addr, "127.0.0.1:9080");
    assert_eq!(config.staging.max_sessions, 64);
    assert_eq!(config.staging.max_age(), Duration::from_secs(3600));
    assert_eq!(config.security.default_login, "admin");
    assert!(config.security.jwt_secret.is_none());
    assert!(config.license.path.is_none());
    assert!(config.observability.metrics_enabled);
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = Config::from_toml(
        r#"
        [staging]
        max_sessions = 4
        max_age_secs = 120

        [security]
        default_login = "operator"
        "#,
    )
    .unwrap();

    assert_eq!(config.staging.max_sessions, 4);
    assert_eq!(config.staging.max_age(), Duration::from_secs(120));
    assert_eq!(config.staging.sweep_interval(), Duration::from_secs(60));
    assert_eq!(config.security.default_login, "operator");
    assert_eq!(
        config.security.break_glass_paths,
        vec!["/health", "/api/v2/settings/license"]
    );
}

#[test]
fn test_unpack_limits_from_staging_section() {
    let defaults = Config::default().staging.unpack_limits();
    assert_eq!(defaults.max_entries, 10_000);
    assert_eq!(defaults.max_bytes, 2 * 1024 * 1024 * 1024);

    let config = Config::from_toml(
        r#"
        [staging]
        max_entries = 500
        "#,
    )
    .unwrap();
    let limits = config.staging.unpack_limits();
    assert_eq!(limits.max_entries, 500);
    assert_eq!(limits.max_bytes, defaults.max_bytes);
}

#[test]
fn test_explicit_paths_override_data_dir() {
    let config = Config::from_toml(
        r#"
        [storage]
        data_dir = "/srv/ferry"
        database = "/db/ferry.sqlite"

        [staging]
        root = "/scratch/staging"
        "#,
    )
    .unwrap();

    assert_eq!(config.database_path(), PathBuf::from("/db/ferry.sqlite"));
    assert_eq!(config.staging_root(), PathBuf::from("/scratch/staging"));
}

#[test]
fn test_load_or_create_writes_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("conf").join("ferry.toml");

    let created = Config::load_or_create(&path).unwrap();
    assert!(path.exists());

    let reloaded = Config::load_or_create(&path).unwrap();
    assert_eq!(reloaded.server.bind_addr, created.server.bind_addr);
    assert_eq!(reloaded.staging.max_unpacked_bytes, created.staging.max_unpacked_bytes);
}

#[test]
fn test_invalid_toml_is_rejected() {
    assert!(Config::from_toml("[staging]\nmax_sessions = \"many\"").is_err());
}
