//! Scaffold a relay configuration file with every field set to its
//! default, for the operator to edit in place.

use std::path::PathBuf;

use anyhow::{bail, Result};
use servidesk_relay_server::RelayConfig;

pub async fn run(file: PathBuf, force: bool) -> Result<()> {
    if !force && tokio::fs::try_exists(&file).await? {
        bail!("{} already exists, pass --force to overwrite", file.display());
    }

    let toml = toml::to_string_pretty(&RelayConfig::default())?;
    if let Some(parent) = file.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(&file, toml).await?;
    tracing::info!(path = %file.display(), "wrote default relay config");
    Ok(())
}
