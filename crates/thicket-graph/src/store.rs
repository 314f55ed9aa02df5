//! Store capabilities.
//!
//! `GraphStore` is what the indexer writes through. `BranchStore` adds the
//! branch bookkeeping used by sync: listing, dropping and moving whole
//! branches in and out of the JSON-lines export format.

use crate::error::Result;
use std::io::{BufRead, Write};
use thicket_core::{Direction, Edge, EdgeType, GraphStats, Node, NodeFilter};

/// Knowledge graph persistence.
///
/// Implementations are shared across threads behind `Arc`, so every method
/// takes `&self` and does its own locking.
pub trait GraphStore: Send + Sync {
    /// Inserts a node, replacing any node with the same ID.
    fn add_node(&self, node: &Node) -> Result<()>;

    /// Replaces an existing node. Fails with `NodeNotFound` if absent.
    fn update_node(&self, node: &Node) -> Result<()>;

    /// Removes a node and every edge touching it. Missing IDs are ignored.
    fn delete_node(&self, id: &str) -> Result<()>;

    fn get_node(&self, id: &str) -> Result<Option<Node>>;

    fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>>;

    /// Inserts an edge. Both endpoints must already exist.
    fn add_edge(&self, edge: &Edge) -> Result<()>;

    fn delete_edge(&self, id: &str) -> Result<()>;

    /// Edges touching `node_id` in either direction, optionally of one type.
    fn get_edges(&self, node_id: &str, edge_type: Option<EdgeType>) -> Result<Vec<Edge>>;

    fn get_neighbors(
        &self,
        node_id: &str,
        edge_type: Option<EdgeType>,
        direction: Direction,
    ) -> Result<Vec<Node>>;

    /// Removes every node attributed to `file_path` and the edges touching
    /// them. Nodes of other files are left alone.
    fn delete_by_file(&self, file_path: &str) -> Result<()>;

    fn stats(&self) -> Result<GraphStats>;

    /// Makes pending writes durable.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Branch-aware persistence.
pub trait BranchStore: GraphStore {
    /// Branch that receives writes.
    fn write_branch(&self) -> &str;

    /// Branches holding at least one entry, sorted.
    fn list_branches(&self) -> Result<Vec<String>>;

    /// Drops every entry of `branch`.
    fn delete_branch(&self, branch: &str) -> Result<()>;

    /// Writes all nodes then all edges of `branch` as JSON lines.
    fn export_branch(&self, branch: &str, out: &mut dyn Write) -> Result<()>;

    /// Clears `target` and loads every record of `input` into it. Returns
    /// the branch named by the export, if any.
    fn import_into_branch(&self, input: &mut dyn BufRead, target: &str) -> Result<Option<String>>;
}
