//! In-memory storage backend using ordered maps and petgraph.
//!
//! This module provides a fast, **ephemeral** storage implementation where all
//! data is held in RAM and **lost when the process exits**. It is suitable for:
//!
//! - Testing and development
//! - Embedding the graph resolution core without a database
//! - Benchmarking traversals in isolation
//!
//! # Architecture
//!
//! The implementation uses:
//! - One `BTreeMap<RecordId, Entity>` per [`EntityKind`](crate::domain::EntityKind),
//!   so listings come back in ID (creation) order
//! - One [`LinkIndex`](index::LinkIndex) per [`LinkKind`](crate::domain::LinkKind):
//!   a `petgraph::DiGraph` whose nodes are record IDs and whose edge weights
//!   are link IDs, plus a `HashMap<RecordId, NodeIndex>` to find nodes
//! - A single monotonically increasing ID counter
//!
//! ## Edge Direction Convention
//!
//! Graph edges point the same way as the link records:
//!
//! - **Configuration items**: parent -> child
//! - **Applications**: dependent -> dependency
//!
//! Outgoing and incoming edges of a node are answered with
//! `graph.edges_directed(node, Direction::Outgoing)` and
//! `graph.edges_directed(node, Direction::Incoming)`. Both are returned sorted
//! by link ID, i.e. in the order the links were created.
//!
//! ## Dangling References
//!
//! Deleting a record does not touch links or referencing records. Graph nodes
//! are never removed, so node indices stay valid; callers see the dangling ID
//! and treat the failed lookup as "no value".
//!
//! # Thread Safety
//!
//! The storage is wrapped in `Arc<Mutex<InMemoryStorageInner>>` to provide
//! thread-safe access in async contexts. Every operation holds the lock for
//! its whole duration.
//!
//! # Performance Characteristics
//!
//! - Save / find / delete: O(log n)
//! - `references_by`: O(n) in the number of records of the queried kind
//! - `links_from` / `links_to`: O(d log d) where d is the node's degree

mod index;
mod inner;
mod trait_impl;

use crate::storage::SystemStore;
use inner::InMemoryStorageInner;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Thread-safe in-memory storage.
///
/// This type alias wraps the inner storage in `Arc<Mutex<>>` for thread-safe
/// async access. It implements [`SystemStore`] via the trait implementation
/// in `trait_impl.rs`.
pub(crate) type InMemoryStorage = Arc<Mutex<InMemoryStorageInner>>;

/// Create a new, empty in-memory storage instance.
///
/// # Example
///
/// ```
/// use syscontext::storage::in_memory::new_in_memory_storage;
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let storage = new_in_memory_storage();
///     // Share it with a SystemContext...
/// }
/// ```
pub fn new_in_memory_storage() -> Arc<dyn SystemStore> {
    let storage: InMemoryStorage = Arc::new(Mutex::new(InMemoryStorageInner::new()));
    Arc::new(storage)
}
