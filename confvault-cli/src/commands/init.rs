use anyhow::{Context, Result};
use colored::Colorize;
use confvault_core::{Vault, VaultConfig};
use std::path::PathBuf;

pub async fn run(path: PathBuf) -> Result<()> {
    let abs_path = std::fs::canonicalize(&path)
        .with_context(|| format!("Cannot access {}", path.display()))?;

    let config_path = VaultConfig::path(&abs_path);
    let config = if config_path.exists() {
        VaultConfig::load(&abs_path)?
    } else {
        let config = VaultConfig::default();
        config.save(&abs_path)?;
        config
    };

    let vault = Vault::open_with_config(&abs_path, config)?;
    let had_history = vault.head()?.is_some();
    let head = vault.initialize().await?;

    if had_history {
        println!("{}", "Already initialized".yellow());
    } else {
        println!("{}", "✓ Versioning started".green().bold());
    }
    println!("   {}: {}", "Directory".bold(), abs_path.display());
    println!("   {}: {}", "Head".bold(), head.id.yellow());
    println!(
        "   {}: {} revisions",
        "Retention".bold(),
        vault.config().max_backups
    );
    println!("   {}: {}", "Config".bold(), config_path.display());

    Ok(())
}
