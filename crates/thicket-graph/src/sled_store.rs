//! Persistent, branch-aware graph store on sled.
//!
//! Every key is prefixed with its branch so any number of branches share
//! one database:
//!
//! | key | value |
//! |---|---|
//! | `n:{branch}:{id}` | bincode `Node` |
//! | `e:{branch}:{id}` | bincode `Edge` |
//! | `f:{branch}:{file}\0{id}` | empty, file index |
//! | `o:{branch}:{source}\0{edge}` | empty, outgoing edge index |
//! | `i:{branch}:{target}\0{edge}` | empty, incoming edge index |
//! | `b:{branch}` | empty, branch marker |
//!
//! Writes go to one branch. Reads consult an ordered list of branches and
//! the first branch holding an ID wins.

use crate::error::{Result, StoreError};
use crate::export::{read_records, Entry, ExportRecord};
use crate::store::{BranchStore, GraphStore};
use sled::{Batch, Db};
use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::path::Path;
use thicket_core::{Direction, Edge, EdgeType, GraphStats, Node, NodeFilter};
use tracing::{debug, info};

/// Branch used when nothing better is known.
pub const DEFAULT_BRANCH: &str = "default";

const KEY_PREFIXES: [&str; 5] = ["n", "e", "f", "o", "i"];
const IMPORT_BATCH: usize = 1000;

fn node_key(branch: &str, id: &str) -> String {
    format!("n:{}:{}", branch, id)
}

fn edge_key(branch: &str, id: &str) -> String {
    format!("e:{}:{}", branch, id)
}

fn file_prefix(branch: &str, file: &str) -> String {
    format!("f:{}:{}\0", branch, file)
}

fn out_prefix(branch: &str, source: &str) -> String {
    format!("o:{}:{}\0", branch, source)
}

fn in_prefix(branch: &str, target: &str) -> String {
    format!("i:{}:{}\0", branch, target)
}

fn branch_key(branch: &str) -> String {
    format!("b:{}", branch)
}

pub struct SledStore {
    db: Db,
    write_branch: String,
    read_branches: Vec<String>,
}

impl SledStore {
    /// Opens or creates a store at `path` writing to `branch`.
    pub fn open<P: AsRef<Path>>(path: P, branch: &str) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            write_branch: branch.to_string(),
            read_branches: vec![branch.to_string()],
        })
    }

    /// Sets the read order. The write branch is always consulted first.
    pub fn with_read_branches(mut self, branches: Vec<String>) -> Self {
        let mut order = vec![self.write_branch.clone()];
        for b in branches {
            if !order.contains(&b) {
                order.push(b);
            }
        }
        self.read_branches = order;
        self
    }

    /// Another handle on the same database, writing to `branch`.
    pub fn on_branch(&self, branch: &str) -> Self {
        Self {
            db: self.db.clone(),
            write_branch: branch.to_string(),
            read_branches: vec![branch.to_string()],
        }
    }

    pub fn read_branches(&self) -> &[String] {
        &self.read_branches
    }

    fn get_node_in(&self, branch: &str, id: &str) -> Result<Option<Node>> {
        match self.db.get(node_key(branch, id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_edge_in(&self, branch: &str, id: &str) -> Result<Option<Edge>> {
        match self.db.get(edge_key(branch, id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Key suffixes under `prefix`.
    fn suffixes(&self, prefix: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item?;
            let suffix = key
                .get(prefix.len()..)
                .ok_or_else(|| StoreError::Corrupted(format!("short key under {}", prefix)))?;
            out.push(String::from_utf8_lossy(suffix).into_owned());
        }
        Ok(out)
    }

    fn scan_values<T: serde::de::DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    fn put_node(&self, batch: &mut Batch, branch: &str, node: &Node) -> Result<()> {
        batch.insert(node_key(branch, &node.id).as_bytes(), bincode::serialize(node)?);
        batch.insert(
            format!("{}{}", file_prefix(branch, &node.file_path), node.id).as_bytes(),
            &[] as &[u8],
        );
        batch.insert(branch_key(branch).as_bytes(), &[] as &[u8]);
        Ok(())
    }

    fn put_edge(&self, batch: &mut Batch, branch: &str, edge: &Edge) -> Result<()> {
        batch.insert(edge_key(branch, &edge.id).as_bytes(), bincode::serialize(edge)?);
        batch.insert(
            format!("{}{}", out_prefix(branch, &edge.source_id), edge.id).as_bytes(),
            &[] as &[u8],
        );
        batch.insert(
            format!("{}{}", in_prefix(branch, &edge.target_id), edge.id).as_bytes(),
            &[] as &[u8],
        );
        batch.insert(branch_key(branch).as_bytes(), &[] as &[u8]);
        Ok(())
    }

    fn remove_edge_into(&self, batch: &mut Batch, branch: &str, id: &str) -> Result<()> {
        if let Some(edge) = self.get_edge_in(branch, id)? {
            batch.remove(format!("{}{}", out_prefix(branch, &edge.source_id), id).as_bytes());
            batch.remove(format!("{}{}", in_prefix(branch, &edge.target_id), id).as_bytes());
            batch.remove(edge_key(branch, id).as_bytes());
        }
        Ok(())
    }

    fn remove_node_into(&self, batch: &mut Batch, branch: &str, id: &str) -> Result<()> {
        let Some(node) = self.get_node_in(branch, id)? else {
            return Ok(());
        };
        let mut edge_ids = self.suffixes(&out_prefix(branch, id))?;
        edge_ids.extend(self.suffixes(&in_prefix(branch, id))?);
        for edge_id in edge_ids {
            self.remove_edge_into(batch, branch, &edge_id)?;
        }
        batch.remove(format!("{}{}", file_prefix(branch, &node.file_path), id).as_bytes());
        batch.remove(node_key(branch, id).as_bytes());
        Ok(())
    }

    /// Edges of `node_id` in the read branches, first branch wins.
    fn edges_for(&self, node_id: &str, outgoing: bool, incoming: bool) -> Result<Vec<Edge>> {
        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        for branch in &self.read_branches {
            let mut ids = Vec::new();
            if outgoing {
                ids.extend(self.suffixes(&out_prefix(branch, node_id))?);
            }
            if incoming {
                ids.extend(self.suffixes(&in_prefix(branch, node_id))?);
            }
            for id in ids {
                if !seen.insert(id.clone()) {
                    continue;
                }
                if let Some(edge) = self.get_edge_in(branch, &id)? {
                    edges.push(edge);
                }
            }
        }
        Ok(edges)
    }
}

impl GraphStore for SledStore {
    fn add_node(&self, node: &Node) -> Result<()> {
        let mut batch = Batch::default();
        if let Some(old) = self.get_node_in(&self.write_branch, &node.id)? {
            if old.file_path != node.file_path {
                batch.remove(
                    format!("{}{}", file_prefix(&self.write_branch, &old.file_path), node.id)
                        .as_bytes(),
                );
            }
        }
        self.put_node(&mut batch, &self.write_branch, node)?;
        self.db.apply_batch(batch)?;
        Ok(())
    }

    fn update_node(&self, node: &Node) -> Result<()> {
        if self.get_node_in(&self.write_branch, &node.id)?.is_none() {
            return Err(StoreError::NodeNotFound(node.id.clone()));
        }
        self.add_node(node)
    }

    fn delete_node(&self, id: &str) -> Result<()> {
        let mut batch = Batch::default();
        self.remove_node_into(&mut batch, &self.write_branch, id)?;
        self.db.apply_batch(batch)?;
        Ok(())
    }

    fn get_node(&self, id: &str) -> Result<Option<Node>> {
        for branch in &self.read_branches {
            if let Some(node) = self.get_node_in(branch, id)? {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for branch in &self.read_branches {
            let candidates: Vec<Node> = match &filter.file_path {
                Some(path) => {
                    let mut nodes = Vec::new();
                    for id in self.suffixes(&file_prefix(branch, path))? {
                        if let Some(node) = self.get_node_in(branch, &id)? {
                            nodes.push(node);
                        }
                    }
                    nodes
                }
                None => self.scan_values(&format!("n:{}:", branch))?,
            };
            for node in candidates {
                if filter.matches(&node) && seen.insert(node.id.clone()) {
                    found.push(node);
                }
            }
        }
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    fn add_edge(&self, edge: &Edge) -> Result<()> {
        for endpoint in [&edge.source_id, &edge.target_id] {
            if self.get_node_in(&self.write_branch, endpoint)?.is_none() {
                return Err(StoreError::MissingEndpoint {
                    edge: edge.id.clone(),
                    node: endpoint.clone(),
                });
            }
        }
        let mut batch = Batch::default();
        self.remove_edge_into(&mut batch, &self.write_branch, &edge.id)?;
        self.put_edge(&mut batch, &self.write_branch, edge)?;
        self.db.apply_batch(batch)?;
        Ok(())
    }

    fn delete_edge(&self, id: &str) -> Result<()> {
        let mut batch = Batch::default();
        self.remove_edge_into(&mut batch, &self.write_branch, id)?;
        self.db.apply_batch(batch)?;
        Ok(())
    }

    fn get_edges(&self, node_id: &str, edge_type: Option<EdgeType>) -> Result<Vec<Edge>> {
        Ok(self
            .edges_for(node_id, true, true)?
            .into_iter()
            .filter(|e| edge_type.map_or(true, |t| e.edge_type == t))
            .collect())
    }

    fn get_neighbors(
        &self,
        node_id: &str,
        edge_type: Option<EdgeType>,
        direction: Direction,
    ) -> Result<Vec<Node>> {
        let outgoing = matches!(direction, Direction::Outgoing | Direction::Both);
        let incoming = matches!(direction, Direction::Incoming | Direction::Both);

        let mut seen = HashSet::new();
        let mut neighbors = Vec::new();
        for edge in self.edges_for(node_id, outgoing, incoming)? {
            if edge_type.is_some_and(|t| edge.edge_type != t) {
                continue;
            }
            let other = if edge.source_id == node_id {
                &edge.target_id
            } else {
                &edge.source_id
            };
            if !seen.insert(other.clone()) {
                continue;
            }
            if let Some(node) = self.get_node(other)? {
                neighbors.push(node);
            }
        }
        Ok(neighbors)
    }

    fn delete_by_file(&self, file_path: &str) -> Result<()> {
        let mut batch = Batch::default();
        for id in self.suffixes(&file_prefix(&self.write_branch, file_path))? {
            self.remove_node_into(&mut batch, &self.write_branch, &id)?;
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    fn stats(&self) -> Result<GraphStats> {
        let mut stats = GraphStats::default();
        let mut seen_nodes = HashSet::new();
        let mut seen_edges = HashSet::new();
        for branch in &self.read_branches {
            for node in self.scan_values::<Node>(&format!("n:{}:", branch))? {
                if seen_nodes.insert(node.id) {
                    stats.node_count += 1;
                    *stats.nodes_by_type.entry(node.node_type).or_default() += 1;
                }
            }
            for edge in self.scan_values::<Edge>(&format!("e:{}:", branch))? {
                if seen_edges.insert(edge.id) {
                    stats.edge_count += 1;
                    *stats.edges_by_type.entry(edge.edge_type).or_default() += 1;
                }
            }
        }
        Ok(stats)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl BranchStore for SledStore {
    fn write_branch(&self) -> &str {
        &self.write_branch
    }

    fn list_branches(&self) -> Result<Vec<String>> {
        let mut branches = self.suffixes("b:")?;
        branches.sort();
        Ok(branches)
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        let mut batch = Batch::default();
        let mut removed = 0usize;
        for prefix in KEY_PREFIXES {
            for item in self.db.scan_prefix(format!("{}:{}:", prefix, branch).as_bytes()) {
                let (key, _) = item?;
                batch.remove(key);
                removed += 1;
            }
        }
        batch.remove(branch_key(branch).as_bytes());
        self.db.apply_batch(batch)?;
        debug!("Dropped branch {} ({} keys)", branch, removed);
        Ok(())
    }

    fn export_branch(&self, branch: &str, out: &mut dyn Write) -> Result<()> {
        for node in self.scan_values::<Node>(&format!("n:{}:", branch))? {
            ExportRecord::node(branch, &node)?.write_line(out)?;
        }
        for edge in self.scan_values::<Edge>(&format!("e:{}:", branch))? {
            ExportRecord::edge(branch, &edge)?.write_line(out)?;
        }
        out.flush()?;
        Ok(())
    }

    fn import_into_branch(&self, input: &mut dyn BufRead, target: &str) -> Result<Option<String>> {
        self.delete_branch(target)?;

        let mut source = None;
        let mut batch = Batch::default();
        let mut pending = 0usize;
        let (mut nodes, mut edges) = (0usize, 0usize);

        for record in read_records(input) {
            let record = record?;
            if source.is_none() && !record.branch.is_empty() {
                source = Some(record.branch.clone());
            }
            match record.into_entry()? {
                Entry::Node(node) => {
                    self.put_node(&mut batch, target, &node)?;
                    nodes += 1;
                }
                Entry::Edge(edge) => {
                    self.put_edge(&mut batch, target, &edge)?;
                    edges += 1;
                }
            }
            pending += 1;
            if pending >= IMPORT_BATCH {
                self.db.apply_batch(std::mem::take(&mut batch))?;
                pending = 0;
            }
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;

        info!("Imported {} nodes and {} edges into branch {}", nodes, edges, target);
        Ok(source)
    }
}
