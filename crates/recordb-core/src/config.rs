use crate::error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

///
/// ConfigError
///
/// Errors raised while parsing or validating runtime configuration.
///

#[derive(Debug, ThisError)]
pub enum ConfigError {
    /// TOML could not be parsed into the expected structure.
    #[error("toml error: {0}")]
    CannotParseToml(String),

    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<ConfigError> for InternalError {
    fn from(err: ConfigError) -> Self {
        Self::with_detail(
            ErrorClass::InvalidArgument,
            ErrorOrigin::Config,
            ErrorDetail::Config(err),
        )
    }
}

///
/// RuntimeConfig
///
/// Knobs shared by every environment spawned from one database.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Limit applied when a search is given no explicit limit.
    pub default_search_limit: usize,

    /// Principal that bypasses the access policy.
    pub superuser_id: u64,

    /// Upper bound on the number of tuples `cartesian_product` may build.
    pub max_cartesian_results: usize,

    /// Maintain `CreateDate` / `WriteDate` on create and write.
    pub track_write_dates: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_search_limit: 80,
            superuser_id: crate::SUPERUSER_ID,
            max_cartesian_results: 1_000_000,
            track_write_dates: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a config from TOML; absent keys keep their defaults.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(source).map_err(|e| ConfigError::CannotParseToml(e.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_search_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "default_search_limit",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_cartesian_results == 0 {
            return Err(ConfigError::Invalid {
                field: "max_cartesian_results",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}
