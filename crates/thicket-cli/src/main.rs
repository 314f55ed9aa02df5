//! Thicket CLI - Command-line interface for Thicket
//!
//! Builds and maintains a code knowledge graph for one or more repositories,
//! either on demand (`sync`) or continuously (`watch`).

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod hook;

#[derive(Parser)]
#[command(name = "thicket")]
#[command(author = "Thicket Contributors")]
#[command(version)]
#[command(about = "Keeps a code knowledge graph in step with your repositories", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize Thicket in a directory
    Init {
        /// Path to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Bring the graph up to date with the working tree
    Sync {
        /// Re-index everything instead of applying changes
        #[arg(long)]
        full: bool,

        /// Branch to write to (defaults to the current git branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// Skip importing the export file into an empty database
        #[arg(long)]
        no_import: bool,
    },

    /// Index, then re-index files as they change
    Watch,

    /// Show graph statistics and sync state
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Export the current branch as JSON lines
    Export {
        /// Output file (defaults to the configured export file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import an export file
    Import {
        /// Input file (defaults to the configured export file)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Remove graph data for git branches that no longer exist
    PruneBranches,

    /// Manage the git post-commit hook that runs `thicket sync`
    Hook {
        #[command(subcommand)]
        action: HookAction,
    },
}

#[derive(Subcommand)]
enum HookAction {
    /// Install the post-commit hook
    Install,
    /// Remove the post-commit hook
    Remove,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let result = match cli.command {
        Commands::Init { path } => commands::init(&path),
        Commands::Sync {
            full,
            branch,
            no_import,
        } => commands::sync(full, branch.as_deref(), no_import),
        Commands::Watch => commands::watch().await,
        Commands::Status { json } => commands::status(json),
        Commands::Export { output } => commands::export(output),
        Commands::Import { input } => commands::import(input),
        Commands::PruneBranches => commands::prune_branches(),
        Commands::Hook { action } => match action {
            HookAction::Install => commands::hook_install(),
            HookAction::Remove => commands::hook_remove(),
        },
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
