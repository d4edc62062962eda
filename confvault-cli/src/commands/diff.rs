use crate::display::print_changes;
use anyhow::Result;
use colored::Colorize;
use confvault_core::RevisionRef;
use std::path::PathBuf;

pub fn run(dir: PathBuf, from: String, to: String) -> Result<()> {
    let vault = super::open_vault(&dir)?;
    let from = RevisionRef::parse(&from);
    let to = RevisionRef::parse(&to);

    let changes = vault.diff(&from, &to)?;

    if changes.is_empty() {
        println!("{}", format!("No differences between {} and {}", from, to).green());
        return Ok(());
    }

    println!("{}", format!("Diff {}..{}", from, to).bold().cyan());
    println!();
    print_changes(&changes);

    Ok(())
}
