use crate::watcher::AutoCommitter;
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub async fn run(dir: PathBuf, debounce_ms: u64) -> Result<()> {
    let vault = Arc::new(super::open_vault(&dir)?);

    if !vault.config().auto_commit {
        anyhow::bail!(
            "Auto-commit is disabled. Set auto_commit = true in .confvault/config.toml or CONFVAULT_AUTO_COMMIT=1."
        );
    }

    let head = vault.initialize().await?;
    let watcher = AutoCommitter::start(Arc::clone(&vault), Duration::from_millis(debounce_ms))?;

    println!("{}", "Watching for changes...".bold().cyan());
    println!("   {}: {}", "Directory".bold(), vault.root().display());
    println!("   {}: {}", "Head".bold(), head.short_id().yellow());
    println!("   {}: {}ms", "Debounce".bold(), debounce_ms);
    println!();
    println!("{}", "Press Ctrl+C to stop".dimmed());

    tokio::signal::ctrl_c().await?;
    drop(watcher);
    println!();
    println!("{}", "Stopped".dimmed());

    Ok(())
}
