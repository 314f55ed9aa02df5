//! Persistent sync bookkeeping.
//!
//! Stored as pretty-printed JSON next to the graph database. Older files
//! kept a single flat `last_commit`/`timestamp` pair; those fields are still
//! read and moved under a branch by [`SyncState::migrate_legacy`].

use crate::error::StateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSyncState {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub branch_states: BTreeMap<String, BranchSyncState>,

    /// When the export file was last imported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_import_time: Option<DateTime<Utc>>,

    /// Modification times of files in directories without version control,
    /// keyed by relative path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file_times: BTreeMap<String, DateTime<Utc>>,

    // Pre-branch layout. Only ever read.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl SyncState {
    /// Reads the state file. A missing file yields an empty state.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(StateError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_slice(&data).map_err(|source| StateError::Format {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the state through a temporary file and a rename, so readers
    /// never observe a half-written file.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let write_err = |source| StateError::Write {
            path: path.to_path_buf(),
            source,
        };

        let data = serde_json::to_vec_pretty(self).map_err(|source| StateError::Format {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        fs::write(&tmp, data).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)
    }

    /// Moves the flat legacy fields under `branch`. Does nothing once any
    /// branch state exists or when there is nothing to move.
    pub fn migrate_legacy(&mut self, branch: &str) {
        if self.last_commit.is_empty() && self.timestamp.is_none() {
            return;
        }
        if !self.branch_states.is_empty() {
            return;
        }
        let state = BranchSyncState {
            last_commit: std::mem::take(&mut self.last_commit),
            timestamp: self.timestamp.take(),
        };
        self.branch_states.insert(branch.to_string(), state);
    }

    pub fn branch_state(&self, branch: &str) -> Option<&BranchSyncState> {
        self.branch_states.get(branch)
    }

    /// State for `branch`, created empty if absent.
    pub fn branch_state_mut(&mut self, branch: &str) -> &mut BranchSyncState {
        self.branch_states.entry(branch.to_string()).or_default()
    }

    /// Drops states of branches not in `existing`. Returns the dropped
    /// names, sorted.
    pub fn cleanup_stale_branches(&mut self, existing: &HashSet<String>) -> Vec<String> {
        let stale: Vec<String> = self
            .branch_states
            .keys()
            .filter(|b| !existing.contains(*b))
            .cloned()
            .collect();
        for branch in &stale {
            self.branch_states.remove(branch);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = tempdir().unwrap();
        let state = SyncState::load(&dir.path().join("sync.state")).unwrap();
        assert_eq!(state, SyncState::default());
    }

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".thicket/sync.state");
        let when = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap();

        let mut state = SyncState::default();
        *state.branch_state_mut("main") = BranchSyncState {
            last_commit: "abc123".into(),
            timestamp: Some(when),
        };
        state.file_times.insert("notes/a.py".into(), when);
        state.last_import_time = Some(when);
        state.save(&path).unwrap();

        let loaded = SyncState::load(&path).unwrap();
        assert_eq!(loaded, state);
        assert!(!dir.path().join(".thicket/sync.state.tmp").exists());

        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("\"last_commit\": \"\""));
    }

    #[test]
    fn test_malformed_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.state");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(SyncState::load(&path), Err(StateError::Format { .. })));
    }

    #[test]
    fn test_migrate_legacy() {
        let legacy = r#"{"last_commit":"deadbeef","timestamp":"2024-01-02T03:04:05Z"}"#;
        let mut state: SyncState = serde_json::from_str(legacy).unwrap();

        state.migrate_legacy("main");
        let main = state.branch_state("main").unwrap();
        assert_eq!(main.last_commit, "deadbeef");
        assert!(main.timestamp.is_some());
        assert!(state.last_commit.is_empty());
        assert!(state.timestamp.is_none());

        let snapshot = state.clone();
        state.migrate_legacy("other");
        assert_eq!(state, snapshot);
    }

    #[test]
    fn test_migrate_keeps_existing_branches() {
        let mut state = SyncState {
            last_commit: "old".into(),
            ..SyncState::default()
        };
        state.branch_state_mut("dev").last_commit = "new".into();

        state.migrate_legacy("main");
        assert!(state.branch_state("main").is_none());
        assert_eq!(state.last_commit, "old");
    }

    #[test]
    fn test_cleanup_stale_branches() {
        let mut state = SyncState::default();
        for b in ["main", "feature-x", "default", "old"] {
            state.branch_state_mut(b).last_commit = b.into();
        }
        let existing: HashSet<String> = ["main", "default"].iter().map(|s| s.to_string()).collect();

        let cleaned = state.cleanup_stale_branches(&existing);
        assert_eq!(cleaned, vec!["feature-x", "old"]);
        assert_eq!(state.branch_states.len(), 2);
    }
}
