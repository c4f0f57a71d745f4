pub mod config;
pub mod log;
pub mod matters;
pub mod mount;
pub mod resolve;
pub mod status;
pub mod sync;
pub mod verify;

use std::path::Path;
use std::sync::Arc;

use matterfs_config::DriveConfig;
use matterfs_core::{FileCache, FileCacheConfig, SyncLog};
use matterfs_remote::remote::{HttpRemoteClient, HttpRemoteConfig};
use matterfs_remote::MountManager;

pub type CommandError = Box<dyn std::error::Error>;

/// Load, validate, and default-fill the configuration.
pub fn load_config(path: &Path) -> Result<DriveConfig, CommandError> {
    let config = DriveConfig::from_file(path).map_err(|e| {
        format!(
            "could not load config from {}: {}",
            path.display(),
            e
        )
    })?;
    config.validate_or_err()?;
    Ok(config.effective())
}

/// Build the full stack: remote client, cache, log, mount manager.
pub async fn build_manager(config: DriveConfig) -> Result<Arc<MountManager>, CommandError> {
    let remote = HttpRemoteClient::new(HttpRemoteConfig {
        base_url: config.remote.base_url.clone(),
        token: config.remote.token.clone(),
        timeout: config.remote.timeout.as_duration(),
    })?;

    let cache = FileCache::open(FileCacheConfig {
        root: config.cache.dir.clone().into(),
        max_size: config.cache.max_size.as_bytes(),
        persist_debounce: config.cache.persist_debounce.as_duration(),
    })
    .await?;

    Ok(MountManager::new(
        config,
        Arc::new(remote),
        Arc::new(cache),
        Arc::new(SyncLog::new()),
    ))
}
