//! JSON-lines export format.
//!
//! One record per line: `{"kind":"node"|"edge","branch":"main","data":{..}}`.
//! Legacy exports carry no `branch`; readers treat them as unnamed.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use thicket_core::{Edge, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Node,
    Edge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord {
    pub kind: RecordKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
    pub data: serde_json::Value,
}

/// A decoded record.
#[derive(Debug, Clone)]
pub enum Entry {
    Node(Node),
    Edge(Edge),
}

impl ExportRecord {
    pub fn node(branch: &str, node: &Node) -> Result<Self> {
        Ok(Self {
            kind: RecordKind::Node,
            branch: branch.to_string(),
            data: serde_json::to_value(node)?,
        })
    }

    pub fn edge(branch: &str, edge: &Edge) -> Result<Self> {
        Ok(Self {
            kind: RecordKind::Edge,
            branch: branch.to_string(),
            data: serde_json::to_value(edge)?,
        })
    }

    pub fn into_entry(self) -> Result<Entry> {
        Ok(match self.kind {
            RecordKind::Node => Entry::Node(serde_json::from_value(self.data)?),
            RecordKind::Edge => Entry::Edge(serde_json::from_value(self.data)?),
        })
    }

    pub fn write_line(&self, out: &mut dyn Write) -> Result<()> {
        serde_json::to_writer(&mut *out, self)?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

/// Iterates the non-blank records of an export stream.
pub fn read_records(input: &mut dyn BufRead) -> impl Iterator<Item = Result<ExportRecord>> + '_ {
    input.lines().filter_map(|line| match line {
        Ok(line) if line.trim().is_empty() => None,
        Ok(line) => Some(serde_json::from_str(&line).map_err(StoreError::from)),
        Err(e) => Some(Err(StoreError::from(e))),
    })
}

/// Branch named by the first record, or empty for legacy and empty exports.
pub fn read_export_branch(input: &mut dyn BufRead) -> Result<String> {
    match read_records(input).next() {
        Some(record) => Ok(record?.branch),
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use thicket_core::{EdgeType, NodeType};

    #[test]
    fn test_records_carry_branch() {
        let node = Node::new(NodeType::Function, "run", "run", "main.rs");
        let edge = Edge::new(EdgeType::Calls, node.id.as_str(), node.id.as_str());

        let mut buf = Vec::new();
        ExportRecord::node("feature", &node).unwrap().write_line(&mut buf).unwrap();
        ExportRecord::edge("feature", &edge).unwrap().write_line(&mut buf).unwrap();

        let text = String::from_utf8(buf.clone()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with(r#"{"kind":"node","branch":"feature""#));

        let branch = read_export_branch(&mut Cursor::new(buf.clone())).unwrap();
        assert_eq!(branch, "feature");

        let entries: Vec<Entry> = read_records(&mut Cursor::new(buf))
            .map(|r| r.unwrap().into_entry().unwrap())
            .collect();
        assert!(matches!(&entries[0], Entry::Node(n) if n.name == "run"));
        assert!(matches!(&entries[1], Entry::Edge(e) if e.edge_type == EdgeType::Calls));
    }

    #[test]
    fn test_legacy_and_empty_exports() {
        let legacy = br#"{"kind":"node","data":{}}"#.to_vec();
        assert_eq!(read_export_branch(&mut Cursor::new(legacy)).unwrap(), "");
        assert_eq!(read_export_branch(&mut Cursor::new(Vec::new())).unwrap(), "");
        assert_eq!(read_export_branch(&mut Cursor::new(b"\n\n".to_vec())).unwrap(), "");
    }
}
