use std::path::Path;

use super::{load_config, CommandError};

/// Print the effective configuration (defaults filled, floors applied).
pub async fn run(config_path: &Path) -> Result<(), CommandError> {
    let config = load_config(config_path)?;
    let yaml = serde_yaml::to_string(&config)?;
    print!("{}", yaml);
    Ok(())
}
