use crate::types::DriveConfig;
use crate::ConfigError;

impl DriveConfig {
    /// Validate the configuration and return a list of errors.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.remote.base_url.trim().is_empty() {
            errors.push(ConfigError::InvalidRemoteUrl(
                self.remote.base_url.clone(),
                "Remote base_url must not be empty".to_string(),
            ));
        } else if !self.remote.base_url.starts_with("http://")
            && !self.remote.base_url.starts_with("https://")
        {
            errors.push(ConfigError::InvalidRemoteUrl(
                self.remote.base_url.clone(),
                "Remote base_url must start with http:// or https://".to_string(),
            ));
        }

        if self.cache.dir.trim().is_empty() {
            errors.push(ConfigError::InvalidConfig(
                "Cache dir must not be empty".to_string(),
            ));
        }

        if self.cache.max_size.as_bytes() == 0 {
            errors.push(ConfigError::InvalidConfig(
                "Cache max_size must be greater than zero".to_string(),
            ));
        }

        if self.sync.retry_limit == 0 {
            errors.push(ConfigError::InvalidConfig(
                "Sync retry_limit must be at least 1".to_string(),
            ));
        }

        if self.mount.point.trim().is_empty() {
            errors.push(ConfigError::InvalidMountPoint(
                self.mount.point.clone(),
                "Mount point must not be empty".to_string(),
            ));
        }

        errors
    }

    /// Validate and return Ok(()) if valid, or Err with the first error.
    pub fn validate_or_err(&self) -> Result<(), ConfigError> {
        let mut errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.remove(0))
        }
    }
}
