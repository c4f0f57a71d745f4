use std::path::Path;

use super::{build_manager, load_config, CommandError};

/// Show mount, cache, and sync status.
pub async fn run(config_path: &Path) -> Result<(), CommandError> {
    let config = load_config(config_path)?;
    let manager = build_manager(config).await?;
    manager.mount().await?;

    let mount = manager.status().await;
    let cache = manager.cache().stats().await;
    let sync = manager.engine().status().await;

    println!("Mount");
    println!("  strategy:     {:?}", mount.strategy);
    println!("  matters:      {}", mount.matters);
    println!("  files:        {}", mount.files);
    println!();
    println!("Cache");
    println!("  entries:      {}", cache.entries);
    println!("  size:         {} / {} bytes", cache.total_size, cache.max_size);
    println!("  dirty:        {}", cache.dirty);
    println!();
    println!("Sync");
    println!("  state:        {:?}", sync.state);
    match sync.last_sync {
        Some(at) => println!("  last sync:    {}", at.to_rfc3339()),
        None => println!("  last sync:    never"),
    }
    if let Some(err) = sync.last_error {
        println!("  last error:   {}", err);
    }

    let failed = manager.engine().failed_files().await;
    if !failed.is_empty() {
        println!();
        println!("Needs attention (upload retries exhausted):");
        for file in failed {
            println!(
                "  {} ({}): {}",
                file.remote_path,
                file.document_id,
                file.last_error.unwrap_or_default()
            );
        }
    }

    manager.unmount().await;
    Ok(())
}
