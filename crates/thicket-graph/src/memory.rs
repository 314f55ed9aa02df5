//! In-memory graph store.
//!
//! Backed by a petgraph `StableDiGraph` so node and edge indices survive
//! removals. Lookup maps translate string IDs to indices; a file index
//! makes `delete_by_file` proportional to the file's size rather than the
//! graph's.

use crate::error::{Result, StoreError};
use crate::store::GraphStore;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thicket_core::{Direction, Edge, EdgeType, GraphStats, Node, NodeFilter};

#[derive(Default)]
struct Inner {
    graph: StableDiGraph<Node, Edge>,
    nodes: HashMap<String, NodeIndex>,
    edges: HashMap<String, EdgeIndex>,
    by_file: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn remove_node(&mut self, id: &str) {
        let Some(idx) = self.nodes.remove(id) else {
            return;
        };
        let touching: Vec<EdgeIndex> = self
            .graph
            .edges_directed(idx, petgraph::Direction::Outgoing)
            .chain(self.graph.edges_directed(idx, petgraph::Direction::Incoming))
            .map(|e| e.id())
            .collect();
        for edge_idx in touching {
            if let Some(edge) = self.graph.remove_edge(edge_idx) {
                self.edges.remove(&edge.id);
            }
        }
        if let Some(node) = self.graph.remove_node(idx) {
            if let Some(ids) = self.by_file.get_mut(&node.file_path) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_file.remove(&node.file_path);
                }
            }
        }
    }

    fn unindex_file(&mut self, file_path: &str, id: &str) {
        if let Some(ids) = self.by_file.get_mut(file_path) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_file.remove(file_path);
            }
        }
    }
}

/// Graph store held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn node_count(&self) -> usize {
        self.read().graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.read().graph.edge_count()
    }

    /// Every node, sorted by ID. Handy for comparing two graphs.
    pub fn all_nodes(&self) -> Vec<Node> {
        let inner = self.read();
        let mut nodes: Vec<Node> = inner.graph.node_weights().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Every edge, sorted by ID.
    pub fn all_edges(&self) -> Vec<Edge> {
        let inner = self.read();
        let mut edges: Vec<Edge> = inner.graph.edge_weights().cloned().collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        edges
    }
}

impl GraphStore for MemoryStore {
    fn add_node(&self, node: &Node) -> Result<()> {
        let mut inner = self.write();
        if let Some(&idx) = inner.nodes.get(&node.id) {
            let old_file = inner.graph[idx].file_path.clone();
            if old_file != node.file_path {
                inner.unindex_file(&old_file, &node.id);
            }
            inner.graph[idx] = node.clone();
        } else {
            let idx = inner.graph.add_node(node.clone());
            inner.nodes.insert(node.id.clone(), idx);
        }
        inner
            .by_file
            .entry(node.file_path.clone())
            .or_default()
            .insert(node.id.clone());
        Ok(())
    }

    fn update_node(&self, node: &Node) -> Result<()> {
        if !self.read().nodes.contains_key(&node.id) {
            return Err(StoreError::NodeNotFound(node.id.clone()));
        }
        self.add_node(node)
    }

    fn delete_node(&self, id: &str) -> Result<()> {
        self.write().remove_node(id);
        Ok(())
    }

    fn get_node(&self, id: &str) -> Result<Option<Node>> {
        let inner = self.read();
        Ok(inner.nodes.get(id).map(|&idx| inner.graph[idx].clone()))
    }

    fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>> {
        let inner = self.read();
        let mut found: Vec<Node> = match &filter.file_path {
            Some(path) => inner
                .by_file
                .get(path)
                .into_iter()
                .flatten()
                .filter_map(|id| inner.nodes.get(id))
                .map(|&idx| &inner.graph[idx])
                .filter(|n| filter.matches(n))
                .cloned()
                .collect(),
            None => inner
                .graph
                .node_weights()
                .filter(|n| filter.matches(n))
                .cloned()
                .collect(),
        };
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    fn add_edge(&self, edge: &Edge) -> Result<()> {
        let mut inner = self.write();
        let endpoint = |id: &str| {
            inner
                .nodes
                .get(id)
                .copied()
                .ok_or_else(|| StoreError::MissingEndpoint {
                    edge: edge.id.clone(),
                    node: id.to_string(),
                })
        };
        let source = endpoint(&edge.source_id)?;
        let target = endpoint(&edge.target_id)?;

        if let Some(old) = inner.edges.remove(&edge.id) {
            inner.graph.remove_edge(old);
        }
        let idx = inner.graph.add_edge(source, target, edge.clone());
        inner.edges.insert(edge.id.clone(), idx);
        Ok(())
    }

    fn delete_edge(&self, id: &str) -> Result<()> {
        let mut inner = self.write();
        if let Some(idx) = inner.edges.remove(id) {
            inner.graph.remove_edge(idx);
        }
        Ok(())
    }

    fn get_edges(&self, node_id: &str, edge_type: Option<EdgeType>) -> Result<Vec<Edge>> {
        let inner = self.read();
        let Some(&idx) = inner.nodes.get(node_id) else {
            return Ok(Vec::new());
        };
        let mut seen = HashSet::new();
        let edges = inner
            .graph
            .edges_directed(idx, petgraph::Direction::Outgoing)
            .chain(inner.graph.edges_directed(idx, petgraph::Direction::Incoming))
            .map(|e| e.weight())
            .filter(|e| edge_type.map_or(true, |t| e.edge_type == t))
            .filter(|e| seen.insert(e.id.clone()))
            .cloned()
            .collect();
        Ok(edges)
    }

    fn get_neighbors(
        &self,
        node_id: &str,
        edge_type: Option<EdgeType>,
        direction: Direction,
    ) -> Result<Vec<Node>> {
        let inner = self.read();
        let Some(&idx) = inner.nodes.get(node_id) else {
            return Ok(Vec::new());
        };

        let mut directions = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            directions.push(petgraph::Direction::Outgoing);
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            directions.push(petgraph::Direction::Incoming);
        }

        let mut seen = HashSet::new();
        let mut neighbors = Vec::new();
        for dir in directions {
            for edge in inner.graph.edges_directed(idx, dir) {
                if edge_type.is_some_and(|t| edge.weight().edge_type != t) {
                    continue;
                }
                let other = if dir == petgraph::Direction::Outgoing {
                    edge.target()
                } else {
                    edge.source()
                };
                if seen.insert(other) {
                    neighbors.push(inner.graph[other].clone());
                }
            }
        }
        Ok(neighbors)
    }

    fn delete_by_file(&self, file_path: &str) -> Result<()> {
        let mut inner = self.write();
        let ids: Vec<String> = inner
            .by_file
            .get(file_path)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        for id in ids {
            inner.remove_node(&id);
        }
        inner.by_file.remove(file_path);
        Ok(())
    }

    fn stats(&self) -> Result<GraphStats> {
        let inner = self.read();
        let mut stats = GraphStats::default();
        for node in inner.graph.node_weights() {
            stats.node_count += 1;
            *stats.nodes_by_type.entry(node.node_type).or_default() += 1;
        }
        for edge in inner.graph.edge_weights() {
            stats.edge_count += 1;
            *stats.edges_by_type.entry(edge.edge_type).or_default() += 1;
        }
        Ok(stats)
    }
}
