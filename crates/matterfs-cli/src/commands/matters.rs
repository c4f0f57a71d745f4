use std::path::Path;

use matterfs_core::RemoteStore;
use matterfs_remote::remote::{HttpRemoteClient, HttpRemoteConfig};

use super::{load_config, CommandError};

/// List matters visible to the current user.
pub async fn run(config_path: &Path) -> Result<(), CommandError> {
    let config = load_config(config_path)?;
    let remote = HttpRemoteClient::new(HttpRemoteConfig {
        base_url: config.remote.base_url.clone(),
        token: config.remote.token.clone(),
        timeout: config.remote.timeout.as_duration(),
    })?;

    let matters = remote.list_matters().await?;
    if matters.is_empty() {
        println!("No matters visible");
        return Ok(());
    }
    for matter in matters {
        println!("{}  {}", matter.id, matter.folder_name());
    }
    Ok(())
}
