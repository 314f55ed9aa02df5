//! Incremental indexing.
//!
//! The indexer owns the path from a file on disk to graph entries: pick a
//! parser by extension, parse, classify, then replace everything the graph
//! holds for that file. Graph entries are keyed by the path relative to the
//! first repository root containing the file, so the same checkout indexes
//! identically wherever it lives on disk.

use crate::error::IndexError;
use crate::exclude::IgnoreMatcher;
use crate::watcher::{ChangeEvent, EventOp};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thicket_core::{Classifier, DefaultClassifier, Node, NodeFilter, ParserRegistry};
use thicket_graph::GraphStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Group name for files directly under a repository root.
pub const ROOT_GROUP: &str = "(root)";

#[derive(Debug, Clone, Default)]
pub struct IndexerConfig {
    /// Roots used to relativize paths and to discover `.gitignore` files.
    pub repo_roots: Vec<PathBuf>,
    pub exclude_patterns: Vec<String>,
    pub follow_symlinks: bool,
}

/// Snapshot of indexing progress.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub files_indexed: usize,
    pub nodes_total: i64,
    pub edges_total: i64,
    pub last_index_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Work run after indexing, such as summarization, scoped to the
/// top-level directory groups that changed.
pub trait PostIndexHook: Send + Sync {
    fn run(&self, store: &dyn GraphStore, groups: &BTreeMap<String, Vec<Node>>);
}

#[derive(Default)]
struct IndexState {
    files_indexed: usize,
    errors: Vec<String>,
    last_index: Option<DateTime<Utc>>,
    changed_files: BTreeSet<String>,
}

pub struct Indexer {
    store: Arc<dyn GraphStore>,
    registry: Arc<ParserRegistry>,
    classifier: Arc<dyn Classifier>,
    matcher: IgnoreMatcher,
    config: IndexerConfig,
    hook: Option<Arc<dyn PostIndexHook>>,
    state: Mutex<IndexState>,
}

impl Indexer {
    pub fn new(store: Arc<dyn GraphStore>, registry: Arc<ParserRegistry>, config: IndexerConfig) -> Self {
        let mut matcher =
            IgnoreMatcher::new(config.repo_roots.clone(), config.exclude_patterns.clone());
        matcher.load();

        Self {
            store,
            registry,
            classifier: Arc::new(DefaultClassifier),
            matcher,
            config,
            hook: None,
            state: Mutex::new(IndexState::default()),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_post_index_hook(mut self, hook: Arc<dyn PostIndexHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn store(&self) -> &dyn GraphStore {
        self.store.as_ref()
    }

    pub fn repo_roots(&self) -> &[PathBuf] {
        &self.config.repo_roots
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.matcher.is_match(path)
    }

    /// Like [`is_excluded`](Self::is_excluded) when the caller already
    /// knows whether `path` is a directory.
    pub fn excludes(&self, path: &Path, is_dir: bool) -> bool {
        self.matcher.matched(path, is_dir)
    }

    fn state(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_error(&self, message: String) {
        self.state().errors.push(message);
    }

    /// Path relative to the first root containing `path`, with `/`
    /// separators. Paths outside every root come back unchanged.
    pub fn to_relative_path(&self, path: &Path) -> String {
        let rel = self
            .config
            .repo_roots
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
            .filter(|rel| !rel.as_os_str().is_empty());
        match rel {
            Some(rel) => slash_path(rel),
            None => path.to_string_lossy().into_owned(),
        }
    }

    /// Re-indexes one file, replacing whatever the graph held for it.
    ///
    /// Files without a registered parser are skipped and return `Ok`.
    pub fn index_file(&self, path: &Path) -> Result<(), IndexError> {
        let Some(parser) = self.registry.get_for_path(path) else {
            return Ok(());
        };

        let content = fs::read(path).map_err(|source| IndexError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let rel = self.to_relative_path(path);
        debug!("Parsing {} ({})", rel, parser.language());

        let result = parser
            .parse_file(&rel, &content)
            .map_err(|source| IndexError::Parse {
                path: PathBuf::from(&rel),
                source,
            })?;
        let result = self.classifier.classify(result);

        self.store.delete_by_file(&rel)?;
        for node in &result.nodes {
            self.store.add_node(node)?;
        }
        for edge in &result.edges {
            self.store.add_edge(edge)?;
        }
        debug!("  -> {} nodes, {} edges", result.nodes.len(), result.edges.len());

        let mut state = self.state();
        state.files_indexed += 1;
        state.last_index = Some(Utc::now());
        state.changed_files.insert(rel);
        Ok(())
    }

    /// Walks `root` and indexes every non-excluded file, then drops graph
    /// entries of files under `root` that are gone or now excluded. The
    /// result matches indexing `root` into an empty store.
    ///
    /// Only an unreadable root is fatal. Unreadable entries are skipped and
    /// per-file failures land in [`IndexStats::errors`].
    pub fn index_directory(&self, root: &Path, cancel: &CancellationToken) -> Result<(), IndexError> {
        fs::metadata(root).map_err(|source| IndexError::Root {
            path: root.to_path_buf(),
            source,
        })?;

        info!("Scanning directory: {}", root.display());
        let start = Instant::now();
        let before = self.state().files_indexed;
        let mut visited = HashSet::new();

        let mut walker = WalkDir::new(root)
            .follow_links(self.config.follow_symlinks)
            .into_iter();
        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }

            let path = entry.path();
            let is_dir = entry.file_type().is_dir();
            if self.matcher.matched(path, is_dir) {
                if is_dir {
                    debug!("Skipping directory: {} (excluded)", path.display());
                    walker.skip_current_dir();
                }
                continue;
            }
            if is_dir {
                continue;
            }

            visited.insert(self.to_relative_path(path));
            if let Err(e) = self.index_file(path) {
                warn!("Failed to index {}: {}", path.display(), e);
                self.record_error(format!("{}: {}", path.display(), e));
            }
        }

        let pruned = match self.prune_unvisited(root, &visited) {
            Ok(pruned) => pruned,
            Err(e) => {
                warn!("Failed to prune stale entries under {}: {}", root.display(), e);
                0
            }
        };

        let indexed = self.state().files_indexed - before;
        info!(
            "Directory complete: {} ({} files indexed, {} removed in {:?})",
            root.display(),
            indexed,
            pruned,
            start.elapsed()
        );
        Ok(())
    }

    /// Where a stored file path may live on disk.
    fn locations(&self, rel: &str) -> Vec<PathBuf> {
        let path = Path::new(rel);
        if path.is_absolute() {
            return vec![path.to_path_buf()];
        }
        self.config.repo_roots.iter().map(|r| r.join(path)).collect()
    }

    /// Forgets files whose graph key places them under `root` but which the
    /// walk did not visit and no other root still provides.
    fn prune_unvisited(&self, root: &Path, visited: &HashSet<String>) -> Result<usize, IndexError> {
        let files: BTreeSet<String> = self
            .store
            .query_nodes(&NodeFilter::default())?
            .into_iter()
            .map(|n| n.file_path)
            .filter(|f| !f.is_empty() && !visited.contains(f))
            .collect();

        let mut pruned = 0;
        for rel in files {
            let locations = self.locations(&rel);
            if !locations.iter().any(|p| p.starts_with(root)) {
                continue;
            }
            if locations
                .iter()
                .any(|p| p.is_file() && !self.matcher.matched(p, false))
            {
                continue;
            }
            debug!("Removing stale {}", rel);
            self.store.delete_by_file(&rel)?;
            self.state().changed_files.insert(rel);
            pruned += 1;
        }
        Ok(pruned)
    }

    /// Drops every graph entry of a file. `path` may be absolute or already
    /// relative to a root.
    pub fn forget_file(&self, path: &Path) -> Result<(), IndexError> {
        let rel = self.to_relative_path(path);
        debug!("Removing {}", rel);
        self.store.delete_by_file(&rel)?;
        Ok(())
    }

    /// Applies one watcher event. Failures are recorded, not returned.
    pub fn handle_event(&self, event: &ChangeEvent) {
        match event.op {
            EventOp::Create | EventOp::Write => {
                if let Err(e) = self.index_file(&event.path) {
                    warn!("Failed to index {}: {}", event.path.display(), e);
                    self.record_error(format!("index {}: {}", event.path.display(), e));
                }
            }
            EventOp::Remove | EventOp::Rename => {
                if let Err(e) = self.forget_file(&event.path) {
                    let rel = self.to_relative_path(&event.path);
                    warn!("Failed to delete {}: {}", rel, e);
                    self.record_error(format!("delete {}: {}", rel, e));
                }
            }
        }
    }

    pub fn stats(&self) -> IndexStats {
        let mut stats = {
            let state = self.state();
            IndexStats {
                files_indexed: state.files_indexed,
                last_index_time: state.last_index,
                errors: state.errors.clone(),
                ..IndexStats::default()
            }
        };
        match self.store.stats() {
            Ok(graph) => {
                stats.nodes_total = graph.node_count;
                stats.edges_total = graph.edge_count;
            }
            Err(e) => warn!("Failed to read graph stats: {}", e),
        }
        stats
    }

    /// Relative paths indexed since the last reset, sorted.
    pub fn changed_files(&self) -> Vec<String> {
        self.state().changed_files.iter().cloned().collect()
    }

    pub fn has_changes(&self) -> bool {
        !self.state().changed_files.is_empty()
    }

    pub fn reset_changes(&self) {
        self.state().changed_files.clear();
    }

    /// Runs the post-index hook over the groups touched by changed files.
    pub fn run_post_index(&self) {
        let changed = self.changed_files();
        if changed.is_empty() {
            return;
        }
        self.post_index(Some(affected_groups(&changed)));
    }

    /// Runs the post-index hook over every group.
    pub fn run_post_index_all(&self) {
        self.post_index(None);
    }

    fn post_index(&self, scope: Option<BTreeSet<String>>) {
        let Some(hook) = &self.hook else {
            return;
        };

        let nodes = match self.store.query_nodes(&NodeFilter::default()) {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("Post-index: failed to query nodes: {}", e);
                return;
            }
        };
        if nodes.is_empty() {
            return;
        }

        let mut groups = group_nodes_by_top_dir(nodes);
        if let Some(scope) = &scope {
            groups.retain(|name, _| {
                let keep = scope.contains(name);
                if !keep {
                    debug!("Skipping unchanged group: {}", name);
                }
                keep
            });
        }
        if groups.is_empty() {
            return;
        }

        info!("Running post-index work on {} groups", groups.len());
        hook.run(self.store.as_ref(), &groups);
    }
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Top-level directory of a relative path, or [`ROOT_GROUP`] for files
/// sitting directly under a root.
pub fn top_level_group(rel_path: &str) -> &str {
    match rel_path.split_once('/') {
        Some((top, _)) if !top.is_empty() => top,
        _ => ROOT_GROUP,
    }
}

pub fn affected_groups(changed_files: &[String]) -> BTreeSet<String> {
    changed_files
        .iter()
        .map(|f| top_level_group(f).to_string())
        .collect()
}

pub fn group_nodes_by_top_dir(nodes: Vec<Node>) -> BTreeMap<String, Vec<Node>> {
    let mut groups: BTreeMap<String, Vec<Node>> = BTreeMap::new();
    for node in nodes {
        let group = top_level_group(&node.file_path).to_string();
        groups.entry(group).or_default().push(node);
    }
    groups
}
