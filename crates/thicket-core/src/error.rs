//! Parse failures.
//!
//! Reading files is the caller's job, so these only cover turning bytes
//! into a tree.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ParseError>;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("'{0}' is not valid UTF-8")]
    InvalidEncoding(PathBuf),

    /// The grammar was built against an incompatible tree-sitter ABI.
    #[error("cannot load {language} grammar: {message}")]
    Grammar { language: String, message: String },

    /// Tree-sitter gave up, e.g. on timeout or cancellation.
    #[error("no syntax tree produced for '{0}'")]
    NoTree(PathBuf),
}
