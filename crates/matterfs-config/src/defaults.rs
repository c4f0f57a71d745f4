use crate::types::{DriveConfig, HumanDuration, HumanSize};

/// Hard floor for the periodic sync interval.
pub const MIN_SYNC_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

pub(crate) fn remote_timeout() -> HumanDuration {
    HumanDuration::from_secs(30)
}

pub(crate) fn cache_max_size() -> HumanSize {
    HumanSize(1024 * 1024 * 1024)
}

pub(crate) fn cache_persist_debounce() -> HumanDuration {
    HumanDuration::from_secs(5)
}

pub(crate) fn sync_interval() -> HumanDuration {
    HumanDuration::from_secs(30)
}

pub(crate) fn write_settle() -> HumanDuration {
    HumanDuration::from_secs(2)
}

pub(crate) fn retry_limit() -> u32 {
    3
}

impl DriveConfig {
    /// Apply default inference rules to the configuration in place.
    pub fn apply_defaults(&mut self) {
        if self.sync.interval.as_duration() < MIN_SYNC_INTERVAL {
            self.sync.interval = HumanDuration(MIN_SYNC_INTERVAL);
        }
    }

    /// Returns a new config with all defaults applied.
    pub fn effective(&self) -> DriveConfig {
        let mut config = self.clone();
        config.apply_defaults();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CacheConfig, MountConfig, RemoteConfig, SyncConfig};

    fn base_config() -> DriveConfig {
        DriveConfig {
            remote: RemoteConfig {
                base_url: "https://api.example.com".to_string(),
                token: None,
                timeout: remote_timeout(),
            },
            cache: CacheConfig {
                dir: "/tmp/cache".to_string(),
                max_size: cache_max_size(),
                persist_debounce: cache_persist_debounce(),
            },
            sync: SyncConfig::default(),
            mount: MountConfig {
                point: "/mnt/matters".to_string(),
                strategy: Default::default(),
            },
        }
    }

    #[test]
    fn test_interval_floor() {
        let mut config = base_config();
        config.sync.interval = HumanDuration(std::time::Duration::from_millis(500));
        config.apply_defaults();
        assert_eq!(config.sync.interval.as_duration(), MIN_SYNC_INTERVAL);
    }

    #[test]
    fn test_interval_above_floor_untouched() {
        let mut config = base_config();
        config.sync.interval = HumanDuration::from_secs(60);
        config.apply_defaults();
        assert_eq!(
            config.sync.interval.as_duration(),
            std::time::Duration::from_secs(60)
        );
    }
}
