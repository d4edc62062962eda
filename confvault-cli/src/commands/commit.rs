use anyhow::Result;
use colored::Colorize;
use confvault_core::CommitOptions;
use std::path::PathBuf;

pub async fn run(
    dir: PathBuf,
    message: String,
    author: String,
    description: Option<String>,
) -> Result<()> {
    let vault = super::open_vault(&dir)?;

    let changes = vault.status()?;
    if changes.is_empty() {
        println!("{}", "No changes to commit".yellow());
        return Ok(());
    }

    println!("{}", "Creating commit...".bold());
    println!("  {}: {}", "Changes".bold(), changes.len());
    println!();

    let options = CommitOptions {
        description,
        ..Default::default()
    };
    let revision = vault.commit_with(&message, &author, options).await?;

    println!("{}", "✓ Commit created successfully!".green().bold());
    println!("  {}: {}", "Revision".bold(), revision.id);
    println!("  {}: {}", "Message".bold(), revision.subject());
    println!("  {}: {}", "Author".bold(), revision.author);

    Ok(())
}
