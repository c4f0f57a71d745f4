use std::path::Path;

use super::{build_manager, load_config, CommandError};

/// Trigger one sync cycle and report the outcome.
pub async fn run(config_path: &Path) -> Result<(), CommandError> {
    let config = load_config(config_path)?;
    let manager = build_manager(config).await?;
    manager.mount().await?;

    let report = manager.run_sync_cycle().await?;
    println!("Uploaded:   {}", report.uploaded.len());
    println!("Downloaded: {}", report.downloaded.len());
    println!("Conflicts:  {}", report.conflicts.len());
    if !report.failed.is_empty() {
        println!("Failed:");
        for (document_id, error) in &report.failed {
            println!("  {}: {}", document_id, error);
        }
    }

    manager.unmount().await;
    Ok(())
}
