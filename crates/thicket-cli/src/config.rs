//! Project configuration in `.thicket/config.json`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const PROJECT_DIR: &str = ".thicket";
const CONFIG_FILE: &str = "config.json";
const DB_DIR: &str = "graph.db";
const STATE_FILE: &str = "sync.state";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no .thicket directory found in {0} or any parent; run `thicket init` first")]
    NotInitialized(PathBuf),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config '{path}': {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    /// Repository roots, relative to the project root.
    pub repositories: Vec<String>,
    pub exclude: Vec<String>,
    /// Overrides the branch reported by git.
    pub branch: Option<String>,
    pub debounce_ms: u64,
    /// Export file, relative to the project root.
    pub export_file: String,
    pub follow_symlinks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            repositories: vec![".".to_string()],
            exclude: vec![
                "**/node_modules/**".to_string(),
                "**/target/**".to_string(),
                "**/vendor/**".to_string(),
            ],
            branch: None,
            debounce_ms: 100,
            export_file: "graph.export".to_string(),
            follow_symlinks: false,
        }
    }
}

/// A located project: its root directory and parsed config.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: Config,
}

impl Project {
    /// Writes a default config under `root`. Returns `false` when one
    /// already exists.
    pub fn init(root: &Path) -> Result<bool, ConfigError> {
        let dir = root.join(PROJECT_DIR);
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            return Ok(false);
        }
        fs::create_dir_all(&dir).map_err(|source| ConfigError::Io {
            path: dir.clone(),
            source,
        })?;
        let text = serde_json::to_string_pretty(&Config::default()).map_err(|source| {
            ConfigError::Invalid {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(&path, text).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(true)
    }

    /// Finds the nearest project at or above `start`.
    pub fn discover(start: &Path) -> Result<Self, ConfigError> {
        let start = fs::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());
        let root = start
            .ancestors()
            .find(|dir| dir.join(PROJECT_DIR).join(CONFIG_FILE).is_file())
            .ok_or_else(|| ConfigError::NotInitialized(start.clone()))?
            .to_path_buf();
        Self::load(&root)
    }

    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(PROJECT_DIR).join(CONFIG_FILE);
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config = serde_json::from_str(&text)
            .map_err(|source| ConfigError::Invalid { path, source })?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    pub fn dir(&self) -> PathBuf {
        self.root.join(PROJECT_DIR)
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir().join(DB_DIR)
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir().join(STATE_FILE)
    }

    pub fn export_path(&self) -> PathBuf {
        self.root.join(&self.config.export_file)
    }

    /// Repository roots as absolute paths.
    pub fn repositories(&self) -> Vec<PathBuf> {
        self.config
            .repositories
            .iter()
            .map(|r| {
                let joined = self.root.join(r);
                fs::canonicalize(&joined).unwrap_or(joined)
            })
            .collect()
    }

    /// Configured patterns plus the project directory itself.
    pub fn exclude_patterns(&self) -> Vec<String> {
        let mut patterns = self.config.exclude.clone();
        patterns.push(format!("{}/", PROJECT_DIR));
        patterns
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.config.debounce_ms)
    }
}
