use crate::display::format_time;
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(dir: PathBuf, limit: usize, offset: usize) -> Result<()> {
    let vault = super::open_vault(&dir)?;
    let summaries = vault.history(limit, offset)?;

    if summaries.is_empty() {
        println!("{}", "No revisions".yellow());
        return Ok(());
    }

    println!("{}", "Revision History".bold().cyan());
    println!();

    for summary in &summaries {
        let revision = &summary.revision;

        println!("{} {}", "revision".yellow().bold(), revision.id.yellow());
        println!("{}: {}", "Author".bold(), revision.author);
        println!("{}: {}", "Date".bold(), format_time(&revision.timestamp));
        println!();
        for line in revision.message.lines() {
            println!("    {}", line);
        }
        println!();
        println!("    {} file(s)", summary.file_count.to_string().cyan());
        println!();
    }

    if summaries.len() == limit {
        println!(
            "Use {} to see older revisions",
            format!("--offset {}", offset + limit).cyan()
        );
    }

    Ok(())
}
