use std::path::Path;

use matterfs_core::{FileCache, FileCacheConfig};

use super::{load_config, CommandError};

/// Verify cache integrity; corrupted or missing entries are dropped.
pub async fn run(config_path: &Path) -> Result<(), CommandError> {
    let config = load_config(config_path)?;
    let cache = FileCache::open(FileCacheConfig {
        root: config.cache.dir.clone().into(),
        max_size: config.cache.max_size.as_bytes(),
        persist_debounce: config.cache.persist_debounce.as_duration(),
    })
    .await?;

    let report = cache.verify().await;
    cache.persist().await?;

    println!("Valid:   {}", report.valid);
    println!("Invalid: {} (dropped)", report.invalid);
    println!("Missing: {} (dropped)", report.missing);
    Ok(())
}
