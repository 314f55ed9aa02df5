//! Thicket Watcher - keeping the graph in step with the working tree
//!
//! This crate handles the file system side of things:
//! - Deciding which paths are excluded (`.gitignore` plus configured patterns)
//! - Watching for changes, debounced per path
//! - Re-indexing changed files, replacing their old graph entries
//! - One-shot sync driven by version control or modification times
//! - Watch mode, which combines a full index with the watcher

pub mod error;
pub mod exclude;
pub mod indexer;
pub mod live;
pub mod state;
pub mod sync;
pub mod vcs;
pub mod watcher;

pub use error::{IndexError, LiveError, StateError, SyncError, VcsError, WatchError};
pub use exclude::IgnoreMatcher;
pub use indexer::{
    affected_groups, group_nodes_by_top_dir, top_level_group, IndexStats, Indexer, IndexerConfig,
    PostIndexHook, ROOT_GROUP,
};
pub use live::LiveIndexer;
pub use state::{BranchSyncState, SyncState};
pub use sync::{
    auto_import_if_needed, cleanup_stale_branches, PathSync, SyncEngine, SyncOutcome, SyncReport,
    LEGACY_EXPORT_BRANCH,
};
pub use vcs::{ChangeSet, GitCli, VersionControl};
pub use watcher::{
    ChangeEvent, ChangeWatcher, EventOp, WatcherConfig, DEFAULT_DEBOUNCE, DEFAULT_NOTIFY_BUFFER,
};
