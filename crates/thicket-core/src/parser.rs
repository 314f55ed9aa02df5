//! Parser capability and the extension registry.
//!
//! The indexer never knows which languages exist. It asks the registry for
//! a parser by file extension and treats a miss as "nothing to index".

use crate::error::Result;
use crate::languages::{python::PythonParser, rust::RustParser, TreeSitterParser};
use crate::model::{Edge, Node};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Nodes and edges extracted from one file.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Path relative to the repository root, as handed to the parser.
    pub file_path: String,
    pub language: String,
}

/// Turns file content into graph entities.
pub trait Parser: Send + Sync {
    /// Language name, e.g. `rust`.
    fn language(&self) -> &str;

    /// Extensions handled, without the leading dot.
    fn extensions(&self) -> &[&str];

    /// Parses `content`. `file_path` is the repository-relative path and
    /// must be used verbatim as the nodes' `file_path`.
    fn parse_file(&self, file_path: &str, content: &[u8]) -> Result<ParseResult>;
}

/// Lookup table from file extension to parser.
#[derive(Default, Clone)]
pub struct ParserRegistry {
    by_extension: HashMap<String, Arc<dyn Parser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in tree-sitter parser.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TreeSitterParser::new(RustParser)));
        registry.register(Arc::new(TreeSitterParser::new(PythonParser)));
        registry
    }

    /// Registers `parser` for all its extensions. Later registrations win.
    pub fn register(&mut self, parser: Arc<dyn Parser>) {
        for ext in parser.extensions() {
            self.by_extension
                .insert(normalize_extension(ext), Arc::clone(&parser));
        }
    }

    /// Accepts `rs`, `.rs` or `RS`.
    pub fn get_by_extension(&self, extension: &str) -> Option<Arc<dyn Parser>> {
        self.by_extension
            .get(&normalize_extension(extension))
            .cloned()
    }

    pub fn get_for_path(&self, path: &Path) -> Option<Arc<dyn Parser>> {
        let ext = path.extension()?.to_str()?;
        self.get_by_extension(ext)
    }

    pub fn supported_extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.by_extension.keys().cloned().collect();
        exts.sort();
        exts
    }

    pub fn is_empty(&self) -> bool {
        self.by_extension.is_empty()
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}
