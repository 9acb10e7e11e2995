//! Configuration for the graph API.
//!
//! Loaded from (in priority order):
//! 1. Environment variables (`RIBBON_API__` prefix)
//! 2. Config file (`ribbon.toml`, `[api]` section)
//! 3. Defaults

use serde::Deserialize;

use crate::query::{DEFAULT_LIMIT, DEFAULT_SKIP};

/// Defaults applied to query levels that leave paging unspecified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_limit")]
    pub default_limit: u64,

    #[serde(default = "default_skip")]
    pub default_skip: u64,
}

fn default_limit() -> u64 {
    DEFAULT_LIMIT
}

fn default_skip() -> u64 {
    DEFAULT_SKIP
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            default_skip: default_skip(),
        }
    }
}

impl ApiConfig {
    /// Load the `[api]` section from `{file_prefix}.toml` (optional) and the
    /// environment; falls back to defaults when the section is absent.
    pub fn load(file_prefix: &str) -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("RIBBON")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match cfg.get::<ApiConfig>("api") {
            Ok(c) => Ok(c),
            Err(config::ConfigError::NotFound(_)) => Ok(ApiConfig::default()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert_eq!(config.default_limit, 100);
        assert_eq!(config.default_skip, 0);
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let config: ApiConfig = serde_json::from_str(r#"{"default_limit": 25}"#).unwrap();
        assert_eq!(config.default_limit, 25);
        assert_eq!(config.default_skip, 0);
    }

    #[test]
    fn test_load_without_file() {
        let config = ApiConfig::load("ribbon-config-that-does-not-exist").unwrap();
        assert_eq!(config, ApiConfig::default());
    }
}
