//! Unit tests for configuration and root folder resolution
//!
//! Tests that manipulate ATLAS_ROOT_FOLDER or ATLAS_CONFIG are marked with
//! #[serial] so they run sequentially.

use atlas_common::config::{
    load_toml_or_default, CompiledDefaults, RootFolderInitializer, RootFolderResolver,
    CONFIG_PATH_ENV, ROOT_FOLDER_ENV,
};
use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize, PartialEq)]
struct SampleConfig {
    #[serde(default)]
    root_folder: Option<PathBuf>,
    #[serde(default)]
    step_years: Option<i32>,
}

#[test]
fn test_compiled_defaults_for_current_platform() {
    let defaults = CompiledDefaults::for_current_platform();
    assert!(!defaults.root_folder.as_os_str().is_empty());
    assert_eq!(defaults.log_level, "info");
}

#[test]
#[serial]
fn test_resolver_with_no_overrides_uses_default() {
    env::remove_var(ROOT_FOLDER_ENV);

    let resolver = RootFolderResolver::new("atlas-test");
    let root_folder = resolver.resolve(None, None);

    assert_eq!(root_folder, CompiledDefaults::for_current_platform().root_folder);
}

#[test]
#[serial]
fn test_resolver_cli_arg_wins_over_env() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/atlas-env-folder");

    let resolver = RootFolderResolver::new("atlas-test");
    let cli = PathBuf::from("/tmp/atlas-cli-folder");
    let root_folder = resolver.resolve(Some(&cli), None);

    assert_eq!(root_folder, cli);
    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_env_var_wins_over_toml() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("atlas-etl.toml");
    std::fs::write(&config_path, "root_folder = \"/tmp/atlas-toml-folder\"\n").unwrap();

    env::set_var(ROOT_FOLDER_ENV, "/tmp/atlas-env-folder");
    let resolver = RootFolderResolver::new("atlas-test");
    assert_eq!(
        resolver.resolve(None, Some(&config_path)),
        PathBuf::from("/tmp/atlas-env-folder")
    );

    env::remove_var(ROOT_FOLDER_ENV);
    assert_eq!(
        resolver.resolve(None, Some(&config_path)),
        PathBuf::from("/tmp/atlas-toml-folder")
    );
}

#[test]
#[serial]
fn test_config_path_env_override() {
    env::set_var(CONFIG_PATH_ENV, "/tmp/custom-atlas.toml");
    let resolver = RootFolderResolver::new("atlas-test");
    assert_eq!(
        resolver.config_path(None),
        Some(PathBuf::from("/tmp/custom-atlas.toml"))
    );
    env::remove_var(CONFIG_PATH_ENV);

    let path = resolver.config_path(None);
    if let Some(path) = path {
        assert!(path.ends_with("atlas/atlas-test.toml"));
    }
}

#[test]
fn test_initializer_creates_nested_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("a").join("b").join("atlas");
    let initializer = RootFolderInitializer::new(root.clone());

    assert!(!initializer.database_exists());
    initializer.ensure_directory_exists().unwrap();
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert_eq!(initializer.database_path(), root.join("atlas.db"));
}

#[test]
fn test_missing_toml_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    let config: SampleConfig = load_toml_or_default(Some(&missing)).unwrap();
    assert_eq!(config, SampleConfig::default());

    let config: SampleConfig = load_toml_or_default(None).unwrap();
    assert_eq!(config, SampleConfig::default());
}

#[test]
fn test_malformed_toml_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "step_years = [unterminated").unwrap();

    let result: atlas_common::Result<SampleConfig> = load_toml_or_default(Some(&path));
    assert!(matches!(result, Err(atlas_common::Error::Config(_))));
}

#[test]
fn test_toml_values_are_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ok.toml");
    std::fs::write(&path, "step_years = 25\n").unwrap();

    let config: SampleConfig = load_toml_or_default(Some(&path)).unwrap();
    assert_eq!(config.step_years, Some(25));
}
