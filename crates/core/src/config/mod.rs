//! Application configuration with layered loading.
//!
//! Configuration is loaded with figment from, highest precedence first:
//!
//! 1. Environment variables (TASKCACHE_*)
//! 2. TOML config file (if TASKCACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::options::DEFAULT_CATEGORY;
use crate::pipeline::DEFAULT_CONCURRENCY;
use crate::task::events::DEFAULT_MAX_LISTENERS;

mod validation;

pub use validation::ConfigError;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_FILE_ENV: &str = "TASKCACHE_CONFIG_FILE";

const ENV_PREFIX: &str = "TASKCACHE_";

/// Application configuration with layered loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite cache database.
    ///
    /// Set via TASKCACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Category new caching tasks store their results under.
    ///
    /// Set via TASKCACHE_CATEGORY environment variable.
    #[serde(default = "default_category")]
    pub category: String,

    /// Listener budget of each proxied task before leak warnings start.
    #[serde(default = "default_max_listeners")]
    pub max_listeners: usize,

    /// Records processed at once by a caching task.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Queue fresh results and store them when the input ends.
    ///
    /// Set via TASKCACHE_DEFERRED_WRITES environment variable.
    #[serde(default)]
    pub deferred_writes: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./taskcache.sqlite")
}

fn default_category() -> String {
    DEFAULT_CATEGORY.into()
}

fn default_max_listeners() -> usize {
    DEFAULT_MAX_LISTENERS
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            category: default_category(),
            max_listeners: default_max_listeners(),
            concurrency: default_concurrency(),
            deferred_writes: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `TASKCACHE_CONFIG_FILE` names a file that does not exist
    /// - The file or environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let config_file = std::env::var(CONFIG_FILE_ENV).ok();
        Self::load_from(config_file.as_deref().map(Path::new))
    }

    /// Load with an explicit config file instead of `TASKCACHE_CONFIG_FILE`.
    pub fn load_from(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = config_file {
            if !path.exists() {
                return Err(ConfigError::Missing {
                    field: "config_file".into(),
                    hint: format!("{} does not exist", path.display()),
                });
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(
            Env::prefixed(ENV_PREFIX)
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
