//! Thicket Graph - knowledge graph storage
//!
//! Two stores implement the `GraphStore` capability:
//!
//! - `MemoryStore` keeps everything in a petgraph `StableDiGraph`.
//! - `SledStore` persists to disk and partitions entries by branch, so a
//!   checkout of another branch does not clobber the index of the first.
//!
//! Branches move between machines through a JSON-lines export.

pub mod error;
pub mod export;
pub mod memory;
pub mod sled_store;
pub mod store;

pub use error::{Result, StoreError};
pub use export::{read_export_branch, read_records, Entry, ExportRecord, RecordKind};
pub use memory::MemoryStore;
pub use sled_store::{SledStore, DEFAULT_BRANCH};
pub use store::{BranchStore, GraphStore};
