//! One-shot synchronisation of the graph with the working tree.
//!
//! Repositories under version control are brought up to date from the diff
//! between the last synced revision and `HEAD`; anything else falls back
//! to comparing file modification times. Progress markers live in a
//! [`SyncState`] file that is loaded once and saved once per run.

use crate::error::{IndexError, SyncError};
use crate::indexer::Indexer;
use crate::state::SyncState;
use crate::vcs::{ChangeSet, VersionControl};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use thicket_graph::{read_export_branch, BranchStore, DEFAULT_BRANCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Branch receiving exports written before exports carried a branch.
pub const LEGACY_EXPORT_BRANCH: &str = "main";

/// What happened to one path during a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No revision recorded for the branch, or a full sync was requested.
    FullIndex,
    /// Recorded revision equals `HEAD`.
    UpToDate,
    /// Applied the diff since the recorded revision.
    Incremental { changed: usize, deleted: usize },
    /// The diff could not be computed, so the repository was re-indexed.
    FallbackFull,
    /// Directory without version control, compared by modification time.
    Directory { reindexed: usize, removed: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSync {
    pub path: PathBuf,
    pub outcome: SyncOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub branch: String,
    /// Branch an export file was imported into before syncing.
    pub imported: Option<String>,
    pub paths: Vec<PathSync>,
}

impl SyncReport {
    /// Whether any path had work to do.
    pub fn changed(&self) -> bool {
        self.paths.iter().any(|p| {
            !matches!(
                p.outcome,
                SyncOutcome::UpToDate | SyncOutcome::Directory { reindexed: 0, removed: 0 }
            )
        })
    }
}

pub struct SyncEngine<'a> {
    indexer: &'a Indexer,
    vcs: &'a dyn VersionControl,
    cancel: CancellationToken,
    import: Option<(&'a dyn BranchStore, &'a Path)>,
}

impl<'a> SyncEngine<'a> {
    pub fn new(indexer: &'a Indexer, vcs: &'a dyn VersionControl) -> Self {
        Self {
            indexer,
            vcs,
            cancel: CancellationToken::new(),
            import: None,
        }
    }

    /// Token checked during directory walks. Diffs are applied to
    /// completion regardless.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Imports `export_file` into `store` at the start of each sync when it
    /// changed since the last import. See [`auto_import_if_needed`].
    pub fn with_auto_import(mut self, store: &'a dyn BranchStore, export_file: &'a Path) -> Self {
        self.import = Some((store, export_file));
        self
    }

    /// Syncs every path in order and saves the state file.
    ///
    /// `branch` selects which recorded revision is compared against `HEAD`.
    pub fn sync(
        &self,
        paths: &[PathBuf],
        state_file: &Path,
        full: bool,
        branch: &str,
    ) -> Result<SyncReport, SyncError> {
        let mut state = SyncState::load(state_file)?;
        state.migrate_legacy(branch);

        let imported = match self.import {
            Some((store, export_file)) => auto_import_if_needed(store, export_file, &mut state)?,
            None => None,
        };

        let mut report = SyncReport {
            branch: branch.to_string(),
            imported,
            paths: Vec::with_capacity(paths.len()),
        };
        for path in paths {
            let outcome = if self.vcs.is_repository(path) {
                self.sync_repository(path, &mut state, full, branch)?
            } else {
                self.sync_directory(path, paths, &mut state, full)?
            };
            debug!("{}: {:?}", path.display(), outcome);
            report.paths.push(PathSync {
                path: path.clone(),
                outcome,
            });
        }

        state.save(state_file)?;
        self.indexer.store().flush()?;
        Ok(report)
    }

    fn sync_repository(
        &self,
        repo: &Path,
        state: &mut SyncState,
        full: bool,
        branch: &str,
    ) -> Result<SyncOutcome, SyncError> {
        let head = self.vcs.current_revision(repo)?;
        let last = state
            .branch_state(branch)
            .map(|s| s.last_commit.clone())
            .unwrap_or_default();

        let outcome = if last.is_empty() || full {
            info!("Full index of {} at {}", repo.display(), short(&head));
            self.indexer.index_directory(repo, &self.cancel)?;
            SyncOutcome::FullIndex
        } else if last == head {
            info!("{} is up to date at {}", repo.display(), short(&head));
            return Ok(SyncOutcome::UpToDate);
        } else {
            match self.vcs.changed_since(repo, &last) {
                Ok(changes) => {
                    info!(
                        "Syncing {} from {} to {}",
                        repo.display(),
                        short(&last),
                        short(&head)
                    );
                    self.apply_changes(repo, &changes)
                }
                Err(e) => {
                    warn!(
                        "Diff of {} since {} failed, re-indexing: {}",
                        repo.display(),
                        short(&last),
                        e
                    );
                    self.indexer.index_directory(repo, &self.cancel)?;
                    SyncOutcome::FallbackFull
                }
            }
        };

        let marker = state.branch_state_mut(branch);
        marker.last_commit = head;
        marker.timestamp = Some(Utc::now());
        Ok(outcome)
    }

    fn apply_changes(&self, repo: &Path, changes: &ChangeSet) -> SyncOutcome {
        let mut deleted = 0;
        for rel in &changes.deleted {
            match self.indexer.forget_file(&repo.join(rel)) {
                Ok(()) => deleted += 1,
                Err(e) => warn!("Failed to delete {}: {}", rel, e),
            }
        }

        let mut changed = 0;
        for rel in changes.added.iter().chain(&changes.modified) {
            let path = repo.join(rel);
            if self.indexer.is_excluded(&path) {
                debug!("Skipping excluded {}", rel);
                continue;
            }
            match self.indexer.index_file(&path) {
                Ok(()) => changed += 1,
                Err(e) => warn!("Failed to index {}: {}", rel, e),
            }
        }

        SyncOutcome::Incremental { changed, deleted }
    }

    fn sync_directory(
        &self,
        dir: &Path,
        all_paths: &[PathBuf],
        state: &mut SyncState,
        full: bool,
    ) -> Result<SyncOutcome, SyncError> {
        if full {
            info!("Full index of {} (no version control)", dir.display());
            state.file_times.retain(|key, _| {
                let key = Path::new(key);
                key.is_absolute() && !key.starts_with(dir)
            });
            self.indexer.index_directory(dir, &self.cancel)?;
            return Ok(SyncOutcome::FullIndex);
        }

        let mut seen = HashSet::new();
        let mut reindexed = 0;

        let mut walker = WalkDir::new(dir).into_iter();
        while let Some(entry) = walker.next() {
            let Ok(entry) = entry else {
                continue;
            };
            if self.cancel.is_cancelled() {
                return Err(IndexError::Cancelled.into());
            }

            let path = entry.path();
            let is_dir = entry.file_type().is_dir();
            if self.indexer.excludes(path, is_dir) {
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }
            if is_dir {
                continue;
            }
            let Some(modified) = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from)
            else {
                continue;
            };

            let rel = self.indexer.to_relative_path(path);
            seen.insert(rel.clone());

            let stale = state.file_times.get(&rel).map_or(true, |prev| modified > *prev);
            if stale {
                if let Err(e) = self.indexer.index_file(path) {
                    warn!("Failed to index {}: {}", path.display(), e);
                }
                state.file_times.insert(rel, modified);
                reindexed += 1;
            }
        }

        // A key unseen here may still belong to another configured root.
        let others: Vec<&PathBuf> = all_paths.iter().filter(|p| p.as_path() != dir).collect();
        let gone: Vec<String> = state
            .file_times
            .keys()
            .filter(|key| !seen.contains(*key))
            .filter(|key| !others.iter().any(|root| root.join(key.as_str()).exists()))
            .cloned()
            .collect();
        for rel in &gone {
            if let Err(e) = self.indexer.forget_file(Path::new(rel)) {
                warn!("Failed to delete {}: {}", rel, e);
            }
            state.file_times.remove(rel);
        }

        info!(
            "{}: {} files re-indexed, {} removed",
            dir.display(),
            reindexed,
            gone.len()
        );
        Ok(SyncOutcome::Directory {
            reindexed,
            removed: gone.len(),
        })
    }
}

fn short(revision: &str) -> &str {
    revision.get(..8).unwrap_or(revision)
}

/// Imports `export_file` when it changed since the last import.
///
/// The export goes into the branch it names, or [`LEGACY_EXPORT_BRANCH`]
/// if it names none. Returns the branch imported into, if any.
pub fn auto_import_if_needed(
    store: &dyn BranchStore,
    export_file: &Path,
    state: &mut SyncState,
) -> Result<Option<String>, SyncError> {
    let export_err = |source| SyncError::Export {
        path: export_file.to_path_buf(),
        source,
    };

    let meta = match fs::metadata(export_file) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(export_err(e)),
    };
    let modified = DateTime::<Utc>::from(meta.modified().map_err(export_err)?);
    if state.last_import_time.is_some_and(|last| modified <= last) {
        return Ok(None);
    }

    let mut reader = BufReader::new(File::open(export_file).map_err(export_err)?);
    let named = read_export_branch(&mut reader)?;
    let target = if named.is_empty() {
        LEGACY_EXPORT_BRANCH.to_string()
    } else {
        named
    };

    info!("Auto-importing {} into branch {}", export_file.display(), target);
    let mut reader = BufReader::new(File::open(export_file).map_err(export_err)?);
    store.import_into_branch(&mut reader, &target)?;

    state.last_import_time = Some(Utc::now());
    Ok(Some(target))
}

/// Drops sync state and graph data of branches that no longer exist in
/// `repo`. [`DEFAULT_BRANCH`] is always kept. Returns the cleaned names.
pub fn cleanup_stale_branches(
    store: &dyn BranchStore,
    vcs: &dyn VersionControl,
    repo: &Path,
    state: &mut SyncState,
) -> Result<Vec<String>, SyncError> {
    let mut existing: HashSet<String> = vcs.list_branches(repo)?.into_iter().collect();
    existing.insert(DEFAULT_BRANCH.to_string());

    let mut cleaned: BTreeSet<String> = state.cleanup_stale_branches(&existing).into_iter().collect();

    for branch in store.list_branches()? {
        if !existing.contains(&branch) {
            info!("Cleaning up stale branch data: {}", branch);
            store.delete_branch(&branch)?;
            cleaned.insert(branch);
        }
    }

    if !cleaned.is_empty() {
        info!("Cleaned up {} stale branches", cleaned.len());
    }
    Ok(cleaned.into_iter().collect())
}
