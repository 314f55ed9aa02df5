//! CLI command implementations.

use crate::config::Project;
use crate::hook::{self, Installed, Removed};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thicket_core::{NodeFilter, ParserRegistry};
use thicket_graph::{read_export_branch, BranchStore, GraphStore, SledStore, DEFAULT_BRANCH};
use thicket_watcher::{
    cleanup_stale_branches, group_nodes_by_top_dir, IndexStats, Indexer,
    IndexerConfig, LiveIndexer, SyncEngine, SyncOutcome, SyncState, GitCli, VersionControl,
    WatcherConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn open_project() -> Result<Project> {
    Ok(Project::discover(&std::env::current_dir()?)?)
}

/// Branch from `--branch`, then the config, then git, then `default`.
fn resolve_branch(project: &Project, vcs: &dyn VersionControl, flag: Option<&str>) -> String {
    if let Some(branch) = flag.or(project.config.branch.as_deref()) {
        return branch.to_string();
    }
    project
        .repositories()
        .iter()
        .find(|repo| vcs.is_repository(repo))
        .and_then(|repo| match vcs.current_branch(repo) {
            Ok(branch) if branch != "HEAD" => Some(branch),
            Ok(_) => None,
            Err(e) => {
                debug!("Could not read current branch: {}", e);
                None
            }
        })
        .unwrap_or_else(|| DEFAULT_BRANCH.to_string())
}

fn open_store(project: &Project, branch: &str) -> Result<Arc<SledStore>> {
    Ok(Arc::new(SledStore::open(project.db_path(), branch)?))
}

fn build_indexer(project: &Project, store: Arc<SledStore>) -> Indexer {
    let config = IndexerConfig {
        repo_roots: project.repositories(),
        exclude_patterns: project.exclude_patterns(),
        follow_symlinks: project.config.follow_symlinks,
    };
    Indexer::new(store, Arc::new(ParserRegistry::with_defaults()), config)
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message(message.to_string());
    Ok(spinner)
}

fn print_errors(stats: &IndexStats) {
    if stats.errors.is_empty() {
        return;
    }
    println!("\n{} {} files failed:", "⚠".yellow(), stats.errors.len());
    for error in stats.errors.iter().take(5) {
        println!("  {}", error.red());
    }
    if stats.errors.len() > 5 {
        println!("  ... and {} more", stats.errors.len() - 5);
    }
}

/// Initialize Thicket in a directory.
pub fn init(path: &Path) -> Result<()> {
    if !Project::init(path)? {
        println!("{} Already initialized", "✓".green());
        return Ok(());
    }

    println!("{} Initialized Thicket in {}", "✓".green(), path.display());
    println!("  Run {} to build the graph", "thicket sync".cyan());
    Ok(())
}

/// Bring the graph up to date with the working tree.
pub fn sync(full: bool, branch: Option<&str>, no_import: bool) -> Result<()> {
    let project = open_project()?;
    let vcs = GitCli;
    let branch = resolve_branch(&project, &vcs, branch);
    let store = open_store(&project, &branch)?;
    let export_path = project.export_path();

    let indexer = build_indexer(&project, Arc::clone(&store));
    let mut engine = SyncEngine::new(&indexer, &vcs);
    if !no_import {
        engine = engine.with_auto_import(store.as_ref(), &export_path);
    }
    let progress = spinner(&format!("Syncing branch {}...", branch))?;
    let report = engine.sync(&project.repositories(), &project.state_path(), full, &branch);
    progress.finish_and_clear();
    let report = report?;

    if let Some(target) = &report.imported {
        println!("{} Imported export into branch {}", "✓".green(), target.cyan());
    }

    for path_sync in &report.paths {
        let what = match &path_sync.outcome {
            SyncOutcome::FullIndex => "full index".to_string(),
            SyncOutcome::UpToDate => "up to date".to_string(),
            SyncOutcome::Incremental { changed, deleted } => {
                format!("{} changed, {} deleted", changed, deleted)
            }
            SyncOutcome::FallbackFull => "full index (diff unavailable)".to_string(),
            SyncOutcome::Directory { reindexed, removed } => {
                format!("{} re-indexed, {} removed", reindexed, removed)
            }
        };
        println!("{} {} {}", "✓".green(), path_sync.path.display(), what.dimmed());
    }

    let stats = indexer.stats();
    println!(
        "{} Branch {}: {} files parsed, {} nodes, {} edges",
        "✓".green(),
        report.branch.cyan(),
        stats.files_indexed.to_string().cyan(),
        stats.nodes_total.to_string().cyan(),
        stats.edges_total.to_string().cyan()
    );
    print_errors(&stats);
    Ok(())
}

/// Index everything, then follow file changes until Ctrl+C.
pub async fn watch() -> Result<()> {
    let project = open_project()?;
    let branch = resolve_branch(&project, &GitCli, None);
    let store = open_store(&project, &branch)?;
    let indexer = Arc::new(build_indexer(&project, store));

    let repositories = project.repositories();
    let config = WatcherConfig::new(repositories.clone(), project.exclude_patterns())
        .with_debounce(project.debounce());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    println!(
        "{} Watching {} on branch {} (Ctrl+C to stop)",
        "👀".cyan(),
        repositories
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
        branch.cyan()
    );
    LiveIndexer::new(Arc::clone(&indexer), config).run(cancel).await?;

    let stats = indexer.stats();
    println!(
        "{} Stopped: {} files parsed, {} nodes, {} edges",
        "✓".green(),
        stats.files_indexed,
        stats.nodes_total,
        stats.edges_total
    );
    print_errors(&stats);
    Ok(())
}

/// Show graph statistics and sync markers.
pub fn status(json: bool) -> Result<()> {
    let project = open_project()?;
    let branch = resolve_branch(&project, &GitCli, None);
    let store = open_store(&project, &branch)?;
    let state = SyncState::load(&project.state_path())?;

    let stats = store.stats()?;
    let groups: BTreeMap<String, usize> = group_nodes_by_top_dir(store.query_nodes(&NodeFilter::default())?)
        .into_iter()
        .map(|(name, nodes)| (name, nodes.len()))
        .collect();
    let marker = state.branch_state(&branch);

    if json {
        let out = serde_json::json!({
            "branch": branch,
            "branches": store.list_branches()?,
            "last_commit": marker.map(|m| m.last_commit.as_str()),
            "last_sync": marker.and_then(|m| m.timestamp),
            "last_import": state.last_import_time,
            "stats": stats,
            "groups": groups,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", "📊 Thicket Status".cyan().bold());
    println!();
    println!("  {} {}", "Project:".dimmed(), project.root.display());
    println!("  {} {}", "Branch:".dimmed(), branch.cyan());
    match marker {
        Some(m) if !m.last_commit.is_empty() => {
            let when = m
                .timestamp
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_default();
            println!("  {} {} {}", "Synced at:".dimmed(), m.last_commit, when.dimmed());
        }
        _ => println!("  {} {}", "Synced at:".dimmed(), "never".yellow()),
    }
    println!("  {} {}", "Nodes:".dimmed(), stats.node_count);
    println!("  {} {}", "Edges:".dimmed(), stats.edge_count);

    if !stats.nodes_by_type.is_empty() {
        println!();
        println!("{}", "Nodes by type".cyan().bold());
        for (node_type, count) in &stats.nodes_by_type {
            println!("  {:<16} {}", node_type.to_string(), count);
        }
    }
    if !groups.is_empty() {
        println!();
        println!("{}", "📁 Groups".cyan().bold());
        for (group, count) in &groups {
            println!("  {:<24} {}", group, count.to_string().dimmed());
        }
    }
    Ok(())
}

/// Write the current branch as JSON lines.
pub fn export(output: Option<PathBuf>) -> Result<()> {
    let project = open_project()?;
    let branch = resolve_branch(&project, &GitCli, None);
    let store = open_store(&project, &branch)?;
    let output = output.unwrap_or_else(|| project.export_path());

    let mut out = BufWriter::new(File::create(&output)?);
    store.export_branch(&branch, &mut out)?;
    out.flush()?;

    println!(
        "{} Exported branch {} to {}",
        "✓".green(),
        branch.cyan(),
        output.display()
    );
    Ok(())
}

/// Load an export into the branch it names, or the current branch.
pub fn import(input: Option<PathBuf>) -> Result<()> {
    let project = open_project()?;
    let branch = resolve_branch(&project, &GitCli, None);
    let store = open_store(&project, &branch)?;
    let input = input.unwrap_or_else(|| project.export_path());

    let named = read_export_branch(&mut BufReader::new(File::open(&input)?))?;
    let target = if named.is_empty() { branch } else { named };
    store.import_into_branch(&mut BufReader::new(File::open(&input)?), &target)?;

    let state_path = project.state_path();
    let mut state = SyncState::load(&state_path)?;
    state.last_import_time = Some(chrono::Utc::now());
    state.save(&state_path)?;

    println!("{} Imported {} into branch {}", "✓".green(), input.display(), target.cyan());
    Ok(())
}

/// Drop graph data and sync markers of deleted git branches.
pub fn prune_branches() -> Result<()> {
    let project = open_project()?;
    let vcs = GitCli;
    let Some(repo) = project.repositories().into_iter().find(|r| vcs.is_repository(r)) else {
        warn!("No git repository configured, nothing to prune");
        return Ok(());
    };

    let branch = resolve_branch(&project, &vcs, None);
    let store = open_store(&project, &branch)?;
    let state_path = project.state_path();
    let mut state = SyncState::load(&state_path)?;

    let cleaned = cleanup_stale_branches(store.as_ref(), &vcs, &repo, &mut state)?;
    state.save(&state_path)?;

    if cleaned.is_empty() {
        println!("{} No stale branches", "✓".green());
    } else {
        println!("{} Removed {} stale branches:", "✓".green(), cleaned.len());
        for branch in cleaned {
            println!("  {}", branch.dimmed());
        }
    }
    Ok(())
}

/// Add `thicket sync` to the repository's post-commit hook.
pub fn hook_install() -> Result<()> {
    let git_dir = hook::find_git_dir(&std::env::current_dir()?)?;
    let path = hook::hook_path(&git_dir);
    match hook::install(&git_dir)? {
        Installed::AlreadyPresent => println!("{} Hook already installed", "✓".green()),
        Installed::Created | Installed::Appended => {
            println!("{} Installed post-commit hook at {}", "✓".green(), path.display())
        }
    }
    Ok(())
}

/// Take `thicket sync` back out of the post-commit hook.
pub fn hook_remove() -> Result<()> {
    let git_dir = hook::find_git_dir(&std::env::current_dir()?)?;
    let path = hook::hook_path(&git_dir);
    match hook::remove(&git_dir)? {
        Removed::NoHook => println!("{} No post-commit hook found", "✓".green()),
        Removed::NotInstalled => println!("{} No Thicket section in {}", "✓".green(), path.display()),
        Removed::Deleted => println!("{} Removed post-commit hook at {}", "✓".green(), path.display()),
        Removed::Stripped => println!("{} Removed Thicket section from {}", "✓".green(), path.display()),
    }
    Ok(())
}
