//! Bootstrap configuration loading and root folder resolution
//!
//! Bootstrap values are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is never fatal: a warning is logged and defaults apply.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ENV_ROOT_FOLDER: &str = "RESTYLE_ROOT_FOLDER";
/// Environment variable overriding the HTTP bind address
pub const ENV_BIND_ADDRESS: &str = "RESTYLE_BIND_ADDRESS";
/// Environment variable overriding the public base URL of published artifacts
pub const ENV_PUBLIC_BASE_URL: &str = "RESTYLE_PUBLIC_BASE_URL";
/// Environment variable pointing at the TOML config file
pub const ENV_CONFIG_PATH: &str = "RESTYLE_CONFIG";

/// Default HTTP bind address
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5740";

/// Sub-directory of the root folder holding per-job working directories
pub const STAGING_DIR_NAME: &str = "staging";
/// Sub-directory of the root folder holding published artifacts
pub const PUBLISHED_DIR_NAME: &str = "published";

/// Bootstrap configuration loaded from TOML file
///
/// Unknown keys are ignored so that service crates can read their own
/// sections (e.g. `[pipeline]`) from the same file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding `staging/` and `published/`
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP bind address (e.g. "127.0.0.1:5740")
    #[serde(default)]
    pub bind_address: Option<String>,

    /// Base URL under which published artifacts are retrievable
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Locate the TOML config file
///
/// Uses `RESTYLE_CONFIG` when set, otherwise `<config dir>/restyle/restyle.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("restyle").join("restyle.toml"))
}

/// Read and deserialize a TOML file
///
/// Returns `Ok(None)` when the file does not exist. Parse failures are
/// reported as `Error::Config` rather than silently ignored.
pub fn read_toml_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML {} failed: {}", path.display(), e)))?;

    toml::from_str(&content)
        .map(Some)
        .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))
}

/// Load bootstrap config, falling back to defaults when the file is missing
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        warn!("No config file location could be determined, using defaults");
        return Ok(TomlConfig::default());
    };

    match read_toml_file::<TomlConfig>(path)? {
        Some(config) => {
            info!("Loaded config from {}", path.display());
            Ok(config)
        }
        None => {
            warn!("Config file {} not found, using defaults", path.display());
            Ok(TomlConfig::default())
        }
    }
}

/// Compiled default root folder for the current platform
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("restyle"))
        .unwrap_or_else(|| PathBuf::from("./restyle_data"))
}

/// Resolves a bootstrap value following CLI → ENV → TOML → default
fn resolve_value<T>(
    cli_arg: Option<T>,
    env_var_name: &str,
    toml_value: Option<T>,
    parse_env: impl Fn(String) -> T,
    default: impl FnOnce() -> T,
) -> T {
    if let Some(value) = cli_arg {
        return value;
    }
    if let Ok(value) = std::env::var(env_var_name) {
        if !value.trim().is_empty() {
            return parse_env(value);
        }
    }
    if let Some(value) = toml_value {
        return value;
    }
    default()
}

/// Root folder resolution
pub struct RootFolderResolver<'a> {
    toml: &'a TomlConfig,
}

impl<'a> RootFolderResolver<'a> {
    pub fn new(toml: &'a TomlConfig) -> Self {
        Self { toml }
    }

    /// Resolve the root folder
    pub fn resolve(&self, cli_arg: Option<PathBuf>) -> PathBuf {
        resolve_value(
            cli_arg,
            ENV_ROOT_FOLDER,
            self.toml.root_folder.clone(),
            PathBuf::from,
            default_root_folder,
        )
    }

    /// Resolve the HTTP bind address
    pub fn bind_address(&self, cli_arg: Option<String>) -> String {
        resolve_value(
            cli_arg,
            ENV_BIND_ADDRESS,
            self.toml.bind_address.clone(),
            |v| v,
            || DEFAULT_BIND_ADDRESS.to_string(),
        )
    }

    /// Resolve the public base URL for published artifacts
    ///
    /// Defaults to the `/artifacts` route served by this process.
    pub fn public_base_url(&self, cli_arg: Option<String>, bind_address: &str) -> String {
        let url = resolve_value(
            cli_arg,
            ENV_PUBLIC_BASE_URL,
            self.toml.public_base_url.clone(),
            |v| v,
            || format!("http://{}/artifacts", bind_address),
        );
        url.trim_end_matches('/').to_string()
    }
}

/// Creates the directory layout beneath the root folder
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create root, staging and published directories if missing
    pub fn ensure_directories_exist(&self) -> Result<()> {
        for dir in [self.root_folder.clone(), self.staging_dir(), self.published_dir()] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)?;
                info!("Created directory: {}", dir.display());
            }
        }
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Per-job working directories live here
    pub fn staging_dir(&self) -> PathBuf {
        self.root_folder.join(STAGING_DIR_NAME)
    }

    /// Published artifacts live here
    pub fn published_dir(&self) -> PathBuf {
        self.root_folder.join(PUBLISHED_DIR_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_defaults() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.level, "info");
        assert!(logging.file.is_none());
    }

    #[test]
    fn test_toml_ignores_unknown_sections() {
        let config: TomlConfig = toml::from_str(
            r#"
            root_folder = "/srv/restyle"

            [pipeline]
            worker_pool_size = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.root_folder, Some(PathBuf::from("/srv/restyle")));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_initializer_paths() {
        let init = RootFolderInitializer::new(PathBuf::from("/tmp/restyle-root"));
        assert_eq!(init.staging_dir(), PathBuf::from("/tmp/restyle-root/staging"));
        assert_eq!(init.published_dir(), PathBuf::from("/tmp/restyle-root/published"));
    }
}
