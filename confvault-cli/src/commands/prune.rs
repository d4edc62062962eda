use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(dir: PathBuf) -> Result<()> {
    let vault = super::open_vault(&dir)?;
    let report = vault.prune()?;

    if report.is_empty() && report.revisions_deferred == 0 {
        println!(
            "{}",
            format!("Nothing to prune (keeping {} revisions)", vault.config().max_backups).green()
        );
        return Ok(());
    }

    println!("{}", "✓ Pruned history".green().bold());
    println!("  {}: {}", "Revisions removed".bold(), report.revisions_removed);
    println!("  {}: {}", "Blobs reclaimed".bold(), report.blobs_removed);
    if report.revisions_deferred > 0 {
        println!(
            "  {}: {}",
            "Deferred (in use)".bold(),
            report.revisions_deferred.to_string().yellow()
        );
    }

    Ok(())
}
