use std::path::Path;

use matterfs_config::MountStrategy;
use tracing::info;

use super::{build_manager, load_config, CommandError};

/// Mount the drive and serve until ctrl-c.
pub async fn run(config_path: &Path) -> Result<(), CommandError> {
    let config = load_config(config_path)?;
    let strategy = config.mount.strategy;
    let mount_point = config.mount.point.clone();
    let manager = build_manager(config).await?;

    manager.mount().await?;
    println!("Mounted at {}", mount_point);

    match strategy {
        MountStrategy::Bridge => serve_bridge(manager.clone(), &mount_point).await?,
        MountStrategy::Shallow => {
            // The watcher and sync timer run inside the manager; just wait.
            tokio::signal::ctrl_c().await?;
        }
    }

    info!("shutting down");
    manager.unmount().await;
    println!("Unmounted");
    Ok(())
}

#[cfg(all(unix, feature = "fuse"))]
async fn serve_bridge(
    manager: std::sync::Arc<matterfs_remote::MountManager>,
    mount_point: &str,
) -> Result<(), CommandError> {
    use matterfs_fuse::fs::MatterFuse;
    use matterfs_fuse::BridgeClient;

    let client = std::sync::Arc::new(BridgeClient::in_process(manager));
    let fuse = MatterFuse::new(client)?;

    // fuser::mount2 blocks until the kernel unmounts; run it off the
    // async runtime and race it against ctrl-c.
    let point = mount_point.to_string();
    let mount_task = tokio::task::spawn_blocking(move || fuse.run(&point));
    tokio::select! {
        result = mount_task => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {}
    }
    Ok(())
}

#[cfg(not(all(unix, feature = "fuse")))]
async fn serve_bridge(
    _manager: std::sync::Arc<matterfs_remote::MountManager>,
    _mount_point: &str,
) -> Result<(), CommandError> {
    Err("bridge mounts need the 'fuse' feature on a unix host; \
         set mount.strategy to 'shallow' as the fallback"
        .into())
}
