//! Configuration validation rules.

use crate::config::AppConfig;
use thiserror::Error;

/// Upper bound on records processed at once.
pub const MAX_CONCURRENCY: usize = 256;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `category` is empty or whitespace
    /// - `db_path` is empty
    /// - `concurrency` is 0 or exceeds 256
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.category.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "category".into(), reason: "must not be empty".into() });
        }

        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid { field: "db_path".into(), reason: "must not be empty".into() });
        }

        if self.concurrency == 0 {
            return Err(ConfigError::Invalid { field: "concurrency".into(), reason: "must be greater than 0".into() });
        }
        if self.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::Invalid {
                field: "concurrency".into(),
                reason: format!("must not exceed {MAX_CONCURRENCY}"),
            });
        }

        if self.max_listeners == 0 {
            tracing::warn!("max_listeners is 0; listener leak detection is disabled");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validate_default_config() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_empty_category() {
        let config = AppConfig { category: "  ".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "category"));
    }

    #[test]
    fn test_validate_empty_db_path() {
        let config = AppConfig { db_path: PathBuf::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "db_path"));
    }

    #[test]
    fn test_validate_concurrency_zero() {
        let config = AppConfig { concurrency: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "concurrency"));
    }

    #[test]
    fn test_validate_concurrency_bounds() {
        let config = AppConfig { concurrency: MAX_CONCURRENCY + 1, ..Default::default() };
        assert!(config.validate().is_err());

        let config = AppConfig { concurrency: MAX_CONCURRENCY, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_unlimited_listeners() {
        let config = AppConfig { max_listeners: 0, ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
