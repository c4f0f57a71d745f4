use std::path::Path;

use super::{build_manager, load_config, CommandError};

/// Show recent sync activity.
pub async fn run(config_path: &Path, count: usize) -> Result<(), CommandError> {
    let config = load_config(config_path)?;
    let manager = build_manager(config).await?;
    manager.mount().await?;
    manager.run_sync_cycle().await?;

    let entries = manager.sync_log().recent(count);
    if entries.is_empty() {
        println!("No sync activity");
    }
    for entry in entries {
        let doc = entry
            .document_id
            .map(|id| format!(" [{}]", id))
            .unwrap_or_default();
        println!(
            "{}  {:?}  {}{}",
            entry.timestamp.to_rfc3339(),
            entry.kind,
            entry.message,
            doc
        );
    }

    manager.unmount().await;
    Ok(())
}
