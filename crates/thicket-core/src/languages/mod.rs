//! Tree-sitter backed parsers.
//!
//! Each supported language has its own submodule implementing
//! `LanguageParser`. `TreeSitterParser` adapts any of them to the
//! registry's `Parser` trait.

pub mod python;
pub mod rust;

use crate::error::{ParseError, Result};
use crate::model::{Edge, EdgeType, Node, NodeType};
use crate::parser::{ParseResult, Parser};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Language-specific extraction over a Tree-sitter tree.
pub trait LanguageParser: Send + Sync {
    /// Language name reported on nodes.
    fn name(&self) -> &'static str;

    /// Returns the Tree-sitter language for this parser.
    fn grammar(&self) -> tree_sitter::Language;

    /// File extensions this parser handles.
    fn extensions(&self) -> &[&str];

    /// Walks the tree and records entities into `out`.
    fn extract(&self, tree: &tree_sitter::Tree, source: &str, out: &mut Extraction);
}

/// Adapts a `LanguageParser` to the `Parser` capability.
pub struct TreeSitterParser<L> {
    lang: L,
}

impl<L: LanguageParser> TreeSitterParser<L> {
    pub fn new(lang: L) -> Self {
        Self { lang }
    }
}

impl<L: LanguageParser> Parser for TreeSitterParser<L> {
    fn language(&self) -> &str {
        self.lang.name()
    }

    fn extensions(&self) -> &[&str] {
        self.lang.extensions()
    }

    fn parse_file(&self, file_path: &str, content: &[u8]) -> Result<ParseResult> {
        let source = std::str::from_utf8(content)
            .map_err(|_| ParseError::InvalidEncoding(file_path.into()))?;

        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&self.lang.grammar())
            .map_err(|e| ParseError::Grammar {
                language: self.lang.name().to_string(),
                message: e.to_string(),
            })?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| ParseError::NoTree(file_path.into()))?;
        if tree.root_node().has_error() {
            debug!("{} has syntax errors, extracting what parsed", file_path);
        }

        let mut out = Extraction::new(file_path, self.lang.name(), source);
        self.lang.extract(&tree, source, &mut out);
        Ok(out.finish())
    }
}

/// Accumulates nodes and edges for one file.
///
/// Every file gets a `File` node; top-level entities hang off it through
/// `Contains` edges. Call sites are recorded by name and resolved against
/// entities of the same file when the extraction finishes.
pub struct Extraction {
    file_path: String,
    language: String,
    package: String,
    file_id: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    calls: Vec<(String, String)>,
}

impl Extraction {
    fn new(file_path: &str, language: &str, source: &str) -> Self {
        let package = file_path
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();
        let base = file_path.rsplit('/').next().unwrap_or(file_path);
        let lines = source.lines().count().max(1) as u32;

        let file_node = Node::new(NodeType::File, base, file_path, file_path)
            .with_lines(1, lines)
            .with_language(language)
            .with_package(package.clone());
        let file_id = file_node.id.clone();

        Self {
            file_path: file_path.to_string(),
            language: language.to_string(),
            package,
            file_id,
            nodes: vec![file_node],
            edges: Vec::new(),
            calls: Vec::new(),
        }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    /// Creates a node stamped with this file's path, language and package.
    pub fn node(&self, node_type: NodeType, name: &str, qualified_name: &str) -> Node {
        Node::new(node_type, name, qualified_name, self.file_path.as_str())
            .with_language(self.language.as_str())
            .with_package(self.package.as_str())
    }

    /// Adds `node` under `parent` (the file when `None`). Returns its ID.
    pub fn add(&mut self, node: Node, parent: Option<&str>) -> String {
        let id = node.id.clone();
        let parent = parent.unwrap_or(&self.file_id).to_string();
        self.edges.push(Edge::new(EdgeType::Contains, parent, id.as_str()));
        self.nodes.push(node);
        id
    }

    /// Records an import of `target` by this file.
    pub fn import(&mut self, target: &str) {
        let dep = self.node(NodeType::Dependency, target, target);
        let id = dep.id.clone();
        self.edges.push(Edge::new(EdgeType::Imports, self.file_id.as_str(), id));
        self.nodes.push(dep);
    }

    /// Records that `caller` references `callee` by name.
    pub fn call(&mut self, caller: &str, callee: impl Into<String>) {
        self.calls.push((caller.to_string(), callee.into()));
    }

    fn finish(mut self) -> ParseResult {
        let mut by_name: HashMap<&str, &str> = HashMap::new();
        for node in &self.nodes {
            if matches!(node.node_type, NodeType::Function | NodeType::Method) {
                by_name.entry(node.name.as_str()).or_insert(node.id.as_str());
            }
        }

        let mut seen = HashSet::new();
        let mut calls = Vec::new();
        for (caller, callee) in &self.calls {
            let short = callee
                .rsplit(|c: char| c == '.' || c == ':')
                .next()
                .unwrap_or(callee);
            if let Some(target) = by_name.get(short) {
                if *target != caller.as_str() && seen.insert((caller.clone(), target.to_string())) {
                    calls.push(Edge::new(EdgeType::Calls, caller.as_str(), *target));
                }
            }
        }
        self.edges.extend(calls);

        // Duplicate IDs (e.g. two `use` of the same path) collapse to one.
        let mut ids = HashSet::new();
        self.nodes.retain(|n| ids.insert(n.id.clone()));
        let mut edge_ids = HashSet::new();
        self.edges.retain(|e| edge_ids.insert(e.id.clone()));

        ParseResult {
            nodes: self.nodes,
            edges: self.edges,
            file_path: self.file_path,
            language: self.language,
        }
    }
}

/// Gets text content of a node.
pub(crate) fn get_text(node: &tree_sitter::Node, source: &str) -> String {
    source[node.byte_range()].to_string()
}

/// One-based start and end line of a node.
pub(crate) fn line_span(node: &tree_sitter::Node) -> (u32, u32) {
    (
        node.start_position().row as u32 + 1,
        node.end_position().row as u32 + 1,
    )
}
