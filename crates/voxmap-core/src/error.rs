//! Error taxonomy for map persistence.
//!
//! Lookup failures (missing node, out-of-bounds coordinate) are *not*
//! errors: the tree APIs report them as `None` so mutation stays total and
//! side-effect-free on those paths.  `MapError` covers the cases where a
//! persisted map cannot be read or written.

use thiserror::Error;

/// Failures while reading or writing a persisted map.
#[derive(Error, Debug)]
pub enum MapError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed map header: {0}")]
    MalformedHeader(String),

    #[error("unknown tree type '{0}' (not registered)")]
    UnknownTreeType(String),

    #[error("corrupt node data: {0}")]
    CorruptNode(String),
}
