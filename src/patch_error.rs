//! PatchError: Unified error type for multipatch public APIs
//!
//! Contract violations (non-owner access to a patch, out-of-range patch ids,
//! sending to oneself) are fatal assertions and never show up here. This type
//! covers the recoverable side: malformed payloads, unsupported requests and
//! collective preconditions that every context must observe identically.

use thiserror::Error;

/// Unified error type for multipatch operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// A payload could not be decoded.
    #[error("Wire error: {0}")]
    Wire(String),
    /// A message exchange with `neighbor` failed.
    #[error("Communication error with context {neighbor}: {detail}")]
    Comm {
        neighbor: usize,
        detail: String,
    },
    /// The operation is not supported by this engine or event kind.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
    /// Two contexts reported the same key to the patch-size syncer.
    #[error("Patch-size key {0} was reported by more than one context")]
    PatchKeyCollision(i64),
    /// Incoming data does not fit the target domain.
    #[error("Domain mismatch: expected {expected} elements, got {actual}")]
    DomainMismatch { expected: usize, actual: usize },
    /// A destroy/copy index list is out of range or not strictly increasing.
    #[error("Invalid index list: {0}")]
    InvalidKillList(String),
    /// A reduction was broadcast but no context contributed a value.
    #[error("Reduction has no contributing context")]
    NoContribution,
    /// Runtime setup failure (thread pool, backend initialization).
    #[error("Runtime error: {0}")]
    Runtime(String),
}
