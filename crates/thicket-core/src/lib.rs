//! Thicket Core - graph schema and source parsing
//!
//! This crate defines the nodes and edges that make up a code knowledge
//! graph, and the capabilities used to produce them: a `Parser` per
//! language, a `ParserRegistry` keyed by file extension, and a
//! `Classifier` that tags entities after parsing.
//!
//! # Example
//!
//! ```no_run
//! use thicket_core::ParserRegistry;
//!
//! let registry = ParserRegistry::with_defaults();
//! let parser = registry.get_by_extension("rs").unwrap();
//! let result = parser.parse_file("src/main.rs", b"fn main() {}").unwrap();
//! for node in result.nodes {
//!     println!("{}: {} (line {})", node.node_type, node.name, node.line);
//! }
//! ```

pub mod classify;
pub mod error;
pub mod languages;
pub mod model;
pub mod parser;

pub use classify::{Classifier, DefaultClassifier};
pub use error::{ParseError, Result};
pub use languages::{LanguageParser, TreeSitterParser};
pub use model::{
    edge_id, node_id, Direction, Edge, EdgeType, GraphStats, Node, NodeFilter, NodeType,
    PROP_ARCH_ROLE, PROP_LAYER,
};
pub use parser::{ParseResult, Parser, ParserRegistry};
