use crate::display::format_time;
use anyhow::Result;
use colored::Colorize;
use confvault_core::models::short;
use confvault_core::Outcome;
use std::path::PathBuf;

pub fn run(dir: PathBuf, limit: usize) -> Result<()> {
    let vault = super::open_vault(&dir)?;
    let records = vault.journal().recent(limit)?;

    if records.is_empty() {
        println!("{}", "No operations recorded".yellow());
        return Ok(());
    }

    println!("{}", "Operation Journal".bold().cyan());
    println!();

    for record in &records {
        let status = match &record.outcome {
            Outcome::Success => "ok".green(),
            Outcome::Failure { .. } => "failed".red(),
        };
        let revision = record
            .revision
            .as_deref()
            .map(short)
            .unwrap_or("-");

        println!(
            "{} {:<10} {:<6} {} {} {}",
            format_time(&record.timestamp).dimmed(),
            record.operation.as_str().bold(),
            status,
            revision.yellow(),
            record.author,
            record.description.lines().next().unwrap_or_default()
        );

        if let Outcome::Failure { kind, stage, error } = &record.outcome {
            let stage = stage.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
            println!("    {} {:?} during {}: {}", "└".dimmed(), kind, stage, error);
        }
    }

    Ok(())
}
