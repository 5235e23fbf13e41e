//! Config file loading and credential resolution
//!
//! Tests touching process environment run serially.

use atlas_etl::config::{load_config, EtlConfig};
use serial_test::serial;
use std::io::Write;

#[test]
#[serial]
fn test_env_credentials_override_toml() {
    let config: EtlConfig = toml::from_str(
        r#"
        [credentials.tabular]
        username = "from-file"
        api_key = "file-key"
        "#,
    )
    .unwrap();

    std::env::set_var("ATLAS_TABULAR_API_KEY", "env-key");
    let creds = config.credentials_for("tabular");
    std::env::remove_var("ATLAS_TABULAR_API_KEY");

    assert_eq!(creds.get("username").map(String::as_str), Some("from-file"));
    assert_eq!(creds.get("api_key").map(String::as_str), Some("env-key"));
}

#[test]
#[serial]
fn test_env_only_credentials() {
    std::env::set_var("ATLAS_TABULAR_USERNAME", "ada");
    let creds = EtlConfig::default().credentials_for("tabular");
    std::env::remove_var("ATLAS_TABULAR_USERNAME");

    assert_eq!(creds.get("username").map(String::as_str), Some("ada"));
    assert!(EtlConfig::default().credentials_for("graph").is_empty());
}

#[test]
fn test_load_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[windowing]\nstep_years = 20\nmin_granularity_years = 2\n\n[dedup]\nyear_tolerance = 5"
    )
    .unwrap();

    let config = load_config(Some(file.path())).unwrap();
    assert_eq!(config.windowing.step_years, 20);
    assert_eq!(config.windowing.min_granularity_years, 2);
    assert_eq!(config.dedup.year_tolerance, 5);
    assert_eq!(config.tabular.process_limit, 2000);
}

#[test]
fn test_invalid_config_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[tabular]\nprocess_limit = 0").unwrap();
    assert!(load_config(Some(file.path())).is_err());
}

#[test]
fn test_missing_config_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config.windowing.query_limit, 500);
}
