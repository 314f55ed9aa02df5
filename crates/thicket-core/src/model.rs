//! Graph schema.
//!
//! Nodes and edges are the unit of exchange between parsers, the indexer
//! and the graph stores. Everything here is plain data; stores decide how
//! it is laid out on disk.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Property key holding the architectural role assigned by a classifier.
pub const PROP_ARCH_ROLE: &str = "arch_role";

/// Property key holding the layer tag assigned by a classifier.
pub const PROP_LAYER: &str = "layer";

/// The kind of entity a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeType {
    Repository,
    Service,
    Module,
    Package,
    File,
    Function,
    Method,
    Class,
    Struct,
    Interface,
    Enum,
    Type,
    Constant,
    Variable,
    ApiEndpoint,
    DbModel,
    Migration,
    Dependency,
    Document,
    TestFunction,
    TestFile,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repository => "Repository",
            Self::Service => "Service",
            Self::Module => "Module",
            Self::Package => "Package",
            Self::File => "File",
            Self::Function => "Function",
            Self::Method => "Method",
            Self::Class => "Class",
            Self::Struct => "Struct",
            Self::Interface => "Interface",
            Self::Enum => "Enum",
            Self::Type => "Type",
            Self::Constant => "Constant",
            Self::Variable => "Variable",
            Self::ApiEndpoint => "APIEndpoint",
            Self::DbModel => "DBModel",
            Self::Migration => "Migration",
            Self::Dependency => "Dependency",
            Self::Document => "Document",
            Self::TestFunction => "TestFunction",
            Self::TestFile => "TestFile",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relationship between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeType {
    Contains,
    Imports,
    DependsOn,
    Calls,
    Implements,
    Exposes,
    Consumes,
    Documents,
    Tests,
    Migrates,
    Configures,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "Contains",
            Self::Imports => "Imports",
            Self::DependsOn => "DependsOn",
            Self::Calls => "Calls",
            Self::Implements => "Implements",
            Self::Exposes => "Exposes",
            Self::Consumes => "Consumes",
            Self::Documents => "Documents",
            Self::Tests => "Tests",
            Self::Migrates => "Migrates",
            Self::Configures => "Configures",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traversal direction for neighbour queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// A source or documentation entity.
///
/// `file_path` is always relative to the repository root the file was
/// indexed from. It is the key used by replace-by-file updates, so two
/// parses of the same file must produce the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub line: u32,
    pub end_line: u32,
    pub package: String,
    pub language: String,
    pub exported: bool,
    pub signature: Option<String>,
    pub doc_comment: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl Node {
    /// Creates a node with a deterministic ID derived from type, file and
    /// qualified name.
    pub fn new(
        node_type: NodeType,
        name: impl Into<String>,
        qualified_name: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let qualified_name = qualified_name.into();
        let file_path = file_path.into();
        let id = node_id(node_type, &file_path, &qualified_name);

        Self {
            id,
            node_type,
            name,
            qualified_name,
            file_path,
            line: 0,
            end_line: 0,
            package: String::new(),
            language: String::new(),
            exported: false,
            signature: None,
            doc_comment: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_lines(mut self, start: u32, end: u32) -> Self {
        self.line = start;
        self.end_line = end;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_doc_comment(mut self, doc: Option<String>) -> Self {
        self.doc_comment = doc;
        self
    }

    pub fn exported(mut self, exported: bool) -> Self {
        self.exported = exported;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// A directed relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub source_id: String,
    pub target_id: String,
    pub properties: BTreeMap<String, String>,
}

impl Edge {
    pub fn new(edge_type: EdgeType, source_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        let source_id = source_id.into();
        let target_id = target_id.into();
        let id = edge_id(edge_type, &source_id, &target_id);

        Self {
            id,
            edge_type,
            source_id,
            target_id,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Aggregate counts over a graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: i64,
    pub edge_count: i64,
    pub nodes_by_type: BTreeMap<NodeType, i64>,
    pub edges_by_type: BTreeMap<EdgeType, i64>,
}

/// Criteria for node queries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub node_type: Option<NodeType>,
    pub file_path: Option<String>,
    pub package: Option<String>,
    pub language: Option<String>,
    /// Glob matched against the node name (`Handle*`).
    pub name_pattern: Option<String>,
    pub exported: Option<bool>,
}

impl NodeFilter {
    pub fn by_file(path: impl Into<String>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn by_type(node_type: NodeType) -> Self {
        Self {
            node_type: Some(node_type),
            ..Self::default()
        }
    }

    pub fn matches(&self, node: &Node) -> bool {
        if self.node_type.is_some_and(|t| t != node.node_type) {
            return false;
        }
        if self.file_path.as_deref().is_some_and(|p| p != node.file_path) {
            return false;
        }
        if self.package.as_deref().is_some_and(|p| p != node.package) {
            return false;
        }
        if self.language.as_deref().is_some_and(|l| l != node.language) {
            return false;
        }
        if self.exported.is_some_and(|e| e != node.exported) {
            return false;
        }
        if let Some(pattern) = &self.name_pattern {
            // An invalid pattern matches nothing.
            return globset::Glob::new(pattern)
                .map(|g| g.compile_matcher().is_match(&node.name))
                .unwrap_or(false);
        }
        true
    }
}

/// Deterministic node ID: hex of the first 12 bytes of
/// `sha256("{type}:{file}:{name}")`.
pub fn node_id(node_type: NodeType, file_path: &str, name: &str) -> String {
    short_hash(&format!("{}:{}:{}", node_type, file_path, name))
}

/// Deterministic edge ID over type and endpoints.
pub fn edge_id(edge_type: EdgeType, source_id: &str, target_id: &str) -> String {
    short_hash(&format!("{}:{}:{}", edge_type, source_id, target_id))
}

fn short_hash(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(&digest[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids_are_deterministic() {
        let a = Node::new(NodeType::Function, "run", "run", "src/main.rs");
        let b = Node::new(NodeType::Function, "run", "run", "src/main.rs");
        let c = Node::new(NodeType::Method, "run", "run", "src/main.rs");

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.len(), 24);
    }

    #[test]
    fn test_filter_matches_name_glob() {
        let handler = Node::new(NodeType::Function, "HandleLogin", "HandleLogin", "api.go");
        let other = Node::new(NodeType::Function, "login", "login", "api.go");

        let filter = NodeFilter {
            name_pattern: Some("Handle*".into()),
            ..NodeFilter::default()
        };

        assert!(filter.matches(&handler));
        assert!(!filter.matches(&other));
    }

    #[test]
    fn test_filter_combines_fields() {
        let node = Node::new(NodeType::Struct, "User", "User", "src/user.rs").exported(true);

        assert!(NodeFilter::by_file("src/user.rs").matches(&node));
        assert!(!NodeFilter::by_file("src/other.rs").matches(&node));
        assert!(!NodeFilter::by_type(NodeType::Enum).matches(&node));

        let filter = NodeFilter {
            node_type: Some(NodeType::Struct),
            exported: Some(false),
            ..NodeFilter::default()
        };
        assert!(!filter.matches(&node));
    }

    #[test]
    fn test_node_json_uses_type_key() {
        let node = Node::new(NodeType::DbModel, "Order", "Order", "models.py");
        let json = serde_json::to_value(&node).unwrap();

        assert_eq!(json["type"], "DbModel");
        assert_eq!(json["file_path"], "models.py");
    }
}
