//! Error types for syscontext operations.

use crate::domain::{EntityKind, LinkKind, RecordId};
use std::io;
use thiserror::Error;

/// The error type for syscontext operations.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The persistence collaborator failed.
    ///
    /// Propagated as-is; the core never retries.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A record required by a service operation does not exist.
    ///
    /// Traversals never raise this; a lookup miss there means "no value".
    #[error("{kind} not found: {id}")]
    RecordNotFound {
        /// Kind of the missing record
        kind: EntityKind,
        /// Identifier that did not resolve
        id: RecordId,
    },

    /// The store returned a record of a different kind than requested.
    #[error("Expected {expected} record, found {found}")]
    KindMismatch {
        /// Requested kind
        expected: EntityKind,
        /// Kind actually returned
        found: EntityKind,
    },

    /// A traversal reached a node that is still on its current path.
    #[error("Cycle detected in {kind}: {from} -> {to}")]
    CycleDetected {
        /// Link kind being traversed
        kind: LinkKind,
        /// Source of the back edge
        from: RecordId,
        /// Destination of the back edge (already on the path)
        to: RecordId,
    },

    /// Linking would give a configuration item a second parent.
    #[error("Configuration item {child} already has parent {existing_parent}")]
    MultipleParents {
        /// Child that already has a parent
        child: RecordId,
        /// Parent it is currently linked under
        existing_parent: RecordId,
    },
}

/// A specialized Result type for syscontext operations.
pub type Result<T> = std::result::Result<T, Error>;
