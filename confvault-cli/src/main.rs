use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod watcher;

use commands::{commit, diff, init, journal, log, prune, rollback, status, watch};

#[derive(Parser)]
#[command(name = "confvault")]
#[command(version, about = "Versioned backups for a configuration directory", long_about = None)]
struct Cli {
    /// Managed directory (defaults to current directory)
    #[arg(short = 'C', long, global = true, default_value = ".")]
    dir: PathBuf,

    /// Log engine activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start versioning a directory
    Init {
        /// Directory to version (overrides --dir)
        path: Option<PathBuf>,
    },

    /// Record the current state of the directory
    Commit {
        /// Commit message
        message: String,

        /// Who made the change
        #[arg(short, long, default_value = "cli-user")]
        author: String,

        /// Why the change was made
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Show revision history, newest first
    Log {
        /// Number of revisions to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Skip this many revisions
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show uncommitted changes
    Status,

    /// Show differences between two revisions
    Diff {
        /// Revision id, prefix, HEAD or working
        #[arg(default_value = "HEAD")]
        from: String,

        /// Revision id, prefix, HEAD or working
        #[arg(default_value = "working")]
        to: String,
    },

    /// Restore the directory to an earlier revision
    Rollback {
        /// Revision id or prefix to restore
        revision: String,

        /// Only show what would change
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Restore even if the target does not validate
        #[arg(long)]
        no_validate: bool,

        /// Who requested the rollback
        #[arg(short, long)]
        author: Option<String>,
    },

    /// Show recent operations
    Journal {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Drop revisions outside the retention window
    Prune,

    /// Commit automatically whenever files change
    Watch {
        /// Quiet period before changes are committed
        #[arg(long, default_value = "2000")]
        debounce_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let dir = cli.dir;
    match cli.command {
        Commands::Init { path } => {
            init::run(path.unwrap_or(dir)).await?;
        }
        Commands::Commit {
            message,
            author,
            description,
        } => {
            commit::run(dir, message, author, description).await?;
        }
        Commands::Log { limit, offset } => {
            log::run(dir, limit, offset)?;
        }
        Commands::Status => {
            status::run(dir)?;
        }
        Commands::Diff { from, to } => {
            diff::run(dir, from, to)?;
        }
        Commands::Rollback {
            revision,
            dry_run,
            yes,
            no_validate,
            author,
        } => {
            rollback::run(dir, revision, dry_run, yes, no_validate, author).await?;
        }
        Commands::Journal { limit } => {
            journal::run(dir, limit)?;
        }
        Commands::Prune => {
            prune::run(dir)?;
        }
        Commands::Watch { debounce_ms } => {
            watch::run(dir, debounce_ms).await?;
        }
    }

    Ok(())
}
