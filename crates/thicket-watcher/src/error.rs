//! Error types for watching, indexing and sync.

use std::path::PathBuf;
use thicket_core::ParseError;
use thicket_graph::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("watch root '{0}' is not a directory")]
    NotADirectory(PathBuf),

    #[error("directory registration task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("read file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cannot read root '{path}': {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("indexing cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("read sync state '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write sync state '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed sync state '{path}': {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum VcsError {
    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("read export '{path}': {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum LiveError {
    #[error("initial index of '{path}' failed: {source}")]
    InitialIndex {
        path: PathBuf,
        #[source]
        source: IndexError,
    },

    #[error("start watcher: {0}")]
    Watch(#[from] WatchError),

    #[error("indexing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
