use std::path::Path;

use matterfs_remote::ConflictChoice;

use super::{build_manager, load_config, CommandError};

/// List documents parked on an unresolved conflict.
pub async fn list(config_path: &Path) -> Result<(), CommandError> {
    let config = load_config(config_path)?;
    let manager = build_manager(config).await?;
    manager.mount().await?;
    manager.run_sync_cycle().await?;

    let pending = manager.engine().pending_conflicts().await;
    if pending.is_empty() {
        println!("No pending conflicts");
    } else {
        for document_id in pending {
            println!("{}", document_id);
        }
    }

    manager.unmount().await;
    Ok(())
}

/// Apply a decision to a parked conflict.
pub async fn run(
    config_path: &Path,
    document_id: &str,
    choice: &str,
) -> Result<(), CommandError> {
    let choice = match choice {
        "local" => ConflictChoice::Local,
        "server" => ConflictChoice::Server,
        "both" => ConflictChoice::Both,
        other => return Err(format!("unknown choice '{}': use local, server, or both", other).into()),
    };

    let config = load_config(config_path)?;
    let manager = build_manager(config).await?;
    manager.mount().await?;
    manager.run_sync_cycle().await?;

    manager.resolve_conflict(document_id, choice).await?;
    println!("Resolved {} as {:?}", document_id, choice);

    manager.unmount().await;
    Ok(())
}
