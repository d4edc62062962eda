pub mod commit;
pub mod diff;
pub mod init;
pub mod journal;
pub mod log;
pub mod prune;
pub mod rollback;
pub mod status;
pub mod watch;

use anyhow::{Context, Result};
use confvault_core::config::METADATA_DIR;
use confvault_core::{Vault, YamlValidator};
use std::path::Path;
use std::sync::Arc;

/// Opens an already initialized vault with YAML validation enabled.
pub fn open_vault(dir: &Path) -> Result<Vault> {
    if !dir.join(METADATA_DIR).exists() {
        anyhow::bail!(
            "No confvault history found in {}. Run 'confvault init' first.",
            dir.display()
        );
    }
    let vault = Vault::open(dir)
        .with_context(|| format!("Failed to open history in {}", dir.display()))?;
    Ok(vault.with_validator(Arc::new(YamlValidator)))
}
