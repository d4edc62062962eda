use crate::display::{change_line, format_time, print_changes};
use anyhow::{Context, Result};
use colored::Colorize;
use confvault_core::{Error, RollbackOptions};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn run(
    dir: PathBuf,
    revision: String,
    dry_run: bool,
    yes: bool,
    no_validate: bool,
    author: Option<String>,
) -> Result<()> {
    let vault = super::open_vault(&dir)?;
    let target = vault
        .revision(&revision)
        .with_context(|| format!("Unknown revision {}", revision))?;

    println!("{}", "Rollback Preview".bold().cyan());
    println!("  {}: {}", "Target".bold(), target.id);
    println!("  {}: {}", "Message".bold(), target.subject());
    println!("  {}: {}", "Author".bold(), target.author);
    println!("  {}: {}", "Date".bold(), format_time(&target.timestamp));
    println!();

    let changes = vault.dry_run_diff(&target.id)?;
    let uncommitted = vault.status()?;

    if changes.is_empty() && uncommitted.is_empty() {
        println!("{}", "Directory already matches this revision".yellow());
        return Ok(());
    }

    if dry_run {
        print_changes(&changes);
    } else {
        println!("{}", "Files to be restored:".bold());
        for change in &changes {
            println!("  {}", change_line(change));
        }
        println!();
    }
    if !uncommitted.is_empty() {
        println!(
            "{}",
            format!(
                "{} uncommitted change(s) will be kept in a safety snapshot",
                uncommitted.len()
            )
            .yellow()
        );
        println!();
    }

    if dry_run {
        println!("{}", "This is a preview only.".yellow());
        return Ok(());
    }

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Roll back to {}?", target.short_id()))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("{}", "Aborted".yellow());
            return Ok(());
        }
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Rolling back to {}...", target.short_id()));

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let options = RollbackOptions {
        author,
        validate: !no_validate,
        cancel: Some(cancel),
        ..Default::default()
    };
    let result = vault.rollback_with(&target.id, options).await;
    ctrl_c.abort();
    spinner.finish_and_clear();

    match result {
        Ok(head) => {
            println!("{}", "✓ Rollback complete".green().bold());
            println!("  {}: {}", "New head".bold(), head.id);
            println!("  {}: {} file(s)", "Restored".bold(), changes.len());
            Ok(())
        }
        Err(e) => {
            if let Error::ValidationFailed(issues) = e.root() {
                println!("{}", "Target revision failed validation:".red().bold());
                for issue in issues {
                    println!("  {} {}", "✗".red(), issue);
                }
                println!();
                println!("Run with {} to restore it anyway", "--no-validate".cyan());
            }
            Err(e.into())
        }
    }
}
