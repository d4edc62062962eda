use crate::display::{format_time, kind_label};
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(dir: PathBuf) -> Result<()> {
    let vault = super::open_vault(&dir)?;
    let changes = vault.status()?;

    println!("{}", "Status".bold().cyan());
    println!("  {}: {}", "Root".bold(), vault.root().display());
    match vault.head_revision()? {
        Some(head) => {
            println!("  {}: {} {}", "Head".bold(), head.short_id().yellow(), head.subject());
            println!("  {}: {}", "Committed".bold(), format_time(&head.timestamp));
        }
        None => println!("  {}: {}", "Head".bold(), "none".dimmed()),
    }
    println!();

    if changes.is_empty() {
        println!("{}", "No uncommitted changes".green());
        return Ok(());
    }

    println!(
        "{} {}",
        "Uncommitted changes:".bold(),
        format!("({})", changes.len()).yellow()
    );
    println!();

    for change in changes.iter().take(10) {
        println!("  {} {}", kind_label(change.kind), change.path);
    }

    if changes.len() > 10 {
        println!();
        println!(
            "  {} and {} more...",
            "...".dimmed(),
            (changes.len() - 10).to_string().yellow()
        );
    }

    println!();
    println!(
        "Run {} to commit these changes",
        "confvault commit \"message\"".cyan()
    );

    Ok(())
}
