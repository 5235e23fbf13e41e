//! Configuration loading and root folder resolution
//!
//! Resolution priority for the root folder (holds the SQLite database):
//! 1. Command-line argument (highest priority)
//! 2. `ATLAS_ROOT_FOLDER` environment variable
//! 3. `root_folder` key in the module TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing TOML file is never fatal: callers get compiled defaults and a warning.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "ATLAS_ROOT_FOLDER";

/// Environment variable overriding the config file path
pub const CONFIG_PATH_ENV: &str = "ATLAS_CONFIG";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "atlas.db";

/// Compiled-in defaults for the current platform
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: "info".to_string(),
        }
    }
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/atlas (or /var/lib/atlas for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("atlas"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/atlas"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("atlas"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/atlas"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("atlas"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\atlas"))
    } else {
        PathBuf::from("./atlas_data")
    }
}

/// Resolves config file and root folder locations for one module
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
        }
    }

    /// Default config file location: `<config dir>/atlas/<module>.toml`
    pub fn default_config_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("atlas").join(format!("{}.toml", self.module_name)))
    }

    /// Config file path: explicit argument, then `ATLAS_CONFIG`, then the default location
    pub fn config_path(&self, cli_arg: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = cli_arg {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        self.default_config_path()
    }

    /// Resolve the root folder following the documented priority order
    pub fn resolve(&self, cli_arg: Option<&Path>, config_path: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = config_path {
            if let Some(root) = read_root_folder_key(path) {
                return root;
            }
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Read `root_folder` from a TOML file, ignoring any error
fn read_root_folder_key(path: &Path) -> Option<PathBuf> {
    let content = std::fs::read_to_string(path).ok()?;
    let value = toml::from_str::<toml::Value>(&content).ok()?;
    value
        .get("root_folder")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
}

/// Creates the root folder and locates the database inside it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder (and parents) if missing. Idempotent.
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder).map_err(|e| {
            Error::Config(format!(
                "Failed to create root folder {}: {}",
                self.root_folder.display(),
                e
            ))
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }
}

/// Load a TOML config file, falling back to `T::default()` when the file is missing
///
/// A file that exists but cannot be parsed is an error.
pub fn load_toml_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        warn!("No config file location available, using compiled defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using compiled defaults");
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    debug!(path = %path.display(), "Config file loaded");
    Ok(config)
}

/// Standard User-Agent for outbound HTTP clients
pub fn get_user_agent() -> String {
    format!(
        "AtlasEtl/{} (https://github.com/atlas-historico/atlas)",
        env!("CARGO_PKG_VERSION")
    )
}
