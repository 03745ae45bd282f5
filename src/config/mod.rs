// Configuration module
// Author: kelexine (https://github.com/kelexine)

mod models;

pub use models::*;

use crate::error::{CacheError, Result};
use config::{Config, Environment, File};
use std::path::PathBuf;

impl CacheSettings {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest)
    /// 2. Config file
    /// 3. Defaults (lowest)
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_config_path())
    }

    /// Same as [`CacheSettings::load`] with an explicit config file path.
    /// A missing file is not an error.
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::with_name(path).required(false))
            // Override with environment variables (prefix: IMGCACHE_, nested with __)
            .add_source(
                Environment::with_prefix("IMGCACHE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| CacheError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| CacheError::Config(e.to_string()))
    }

    fn default_config_path() -> String {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".imgcache")
            .join("config.toml")
            .to_string_lossy()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::KeyStrategy;
    use crate::utils::logging::Verbosity;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = CacheSettings::default();
        assert_eq!(settings.client.request_timeout_ms, 5_000);
        assert_eq!(settings.direct.retention_ms, 604_800_000);
        assert_eq!(settings.direct.retry.max_attempts, 3);
        assert_eq!(settings.worker.key_strategy, KeyStrategy::FileName);
        assert_eq!(settings.direct.key_strategy, KeyStrategy::FullPath);
        assert_eq!(settings.worker.verbosity, Verbosity::Summary);
        assert!(settings.worker.retention_ms.is_none());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imgcache.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[client]\nrequest_timeout_ms = 250\n\n[worker]\nverbosity = \"detailed\"\nkey_strategy = \"full_path\""
        )
        .unwrap();

        let settings = CacheSettings::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.client.request_timeout_ms, 250);
        assert_eq!(settings.worker.verbosity, Verbosity::Detailed);
        assert_eq!(settings.worker.key_strategy, KeyStrategy::FullPath);
        // Untouched sections keep their defaults
        assert_eq!(settings.loader.concurrency, 3);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let settings = CacheSettings::load_from("/nonexistent/imgcache/config.toml").unwrap();
        assert_eq!(settings.store.reset_timeout_ms, 5_000);
    }
}
