mod defaults;
mod env;
pub mod types;
mod validation;

use std::path::Path;

pub use types::*;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing environment variables: {0:?}")]
    MissingEnvVars(Vec<String>),

    #[error("Invalid remote URL '{0}': {1}")]
    InvalidRemoteUrl(String, String),

    #[error("Invalid mount point '{0}': {1}")]
    InvalidMountPoint(String, String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DriveConfig {
    /// Parse a drive configuration from a YAML string.
    /// Environment variables in the format `${VAR_NAME}` will be interpolated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let interpolated = env::interpolate_env(yaml)?;
        let config: DriveConfig = serde_yaml::from_str(&interpolated)?;
        Ok(config)
    }

    /// Load a drive configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
remote:
  base_url: https://api.example.com
cache:
  dir: /tmp/matterfs-cache
mount:
  point: /mnt/matters
"#;

        let config = DriveConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.remote.base_url, "https://api.example.com");
        assert_eq!(config.cache.dir, "/tmp/matterfs-cache");
        assert_eq!(config.mount.point, "/mnt/matters");
    }

    #[test]
    fn test_parse_with_env_vars() {
        std::env::set_var("MATTERFS_TEST_CACHE", "/tmp/env-cache");

        let yaml = r#"
remote:
  base_url: https://api.example.com
cache:
  dir: ${MATTERFS_TEST_CACHE}
mount:
  point: /mnt/matters
"#;

        let config = DriveConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.cache.dir, "/tmp/env-cache");
    }

    #[test]
    fn test_missing_env_var() {
        let yaml = r#"
remote:
  base_url: ${MATTERFS_MISSING_VAR_99}
cache:
  dir: /tmp/cache
mount:
  point: /mnt/matters
"#;

        let result = DriveConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::MissingEnvVars(_))));
    }

    #[test]
    fn test_effective_clamps_sync_interval() {
        let yaml = r#"
remote:
  base_url: https://api.example.com
cache:
  dir: /tmp/cache
sync:
  interval: 1s
mount:
  point: /mnt/matters
"#;

        let config = DriveConfig::from_yaml(yaml).unwrap();
        let effective = config.effective();
        assert_eq!(
            effective.sync.interval.as_duration(),
            defaults::MIN_SYNC_INTERVAL
        );
    }

    #[test]
    fn test_validation_ok() {
        let yaml = r#"
remote:
  base_url: https://api.example.com
cache:
  dir: /tmp/cache
mount:
  point: /mnt/matters
"#;

        let config = DriveConfig::from_yaml(yaml).unwrap();
        assert!(config.validate().is_empty());
    }
}
