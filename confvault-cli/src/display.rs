use chrono::{DateTime, Local, Utc};
use colored::{ColoredString, Colorize};
use confvault_core::{ChangeKind, FileChange};

pub fn format_time(timestamp: &DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

pub fn kind_label(kind: ChangeKind) -> ColoredString {
    match kind {
        ChangeKind::Added => "NEW".green(),
        ChangeKind::Modified => "MOD".yellow(),
        ChangeKind::Removed => "DEL".red(),
        ChangeKind::Renamed => "REN".blue(),
    }
}

pub fn change_line(change: &FileChange) -> String {
    match &change.old_path {
        Some(old) => format!("{} {} -> {}", kind_label(change.kind), old, change.path),
        None => format!("{} {}", kind_label(change.kind), change.path),
    }
}

/// Prints every change with its colored hunk.
pub fn print_changes(changes: &[FileChange]) {
    for change in changes {
        println!("{}", "━".repeat(80).bright_black());
        println!("{}", change_line(change).bold());
        println!();

        if change.binary {
            println!("  {}", "[Binary file]".dimmed());
        } else if let Some(hunk) = &change.hunk {
            for line in hunk.lines() {
                println!("{}", colorize_line(line));
            }
        }
        println!();
    }
}

fn colorize_line(line: &str) -> ColoredString {
    if line.starts_with("+++") || line.starts_with("---") {
        line.bold()
    } else if line.starts_with("@@") {
        line.cyan()
    } else if line.starts_with('+') {
        line.green()
    } else if line.starts_with('-') {
        line.red()
    } else {
        line.normal()
    }
}
