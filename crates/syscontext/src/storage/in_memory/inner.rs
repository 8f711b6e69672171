//! Core in-memory storage data structures.
//!
//! This module contains the inner storage structure that holds all data
//! and is wrapped in `Arc<Mutex<>>` for thread safety.

use super::index::LinkIndex;
use crate::domain::{Entity, EntityKind, LinkKind, RecordId};
use std::collections::{BTreeMap, HashMap};

/// Inner storage structure (not thread-safe).
///
/// Records are grouped by kind; links are grouped by kind into separate
/// adjacency indexes so a configuration item and an application with the same
/// numeric ID never share a graph node.
pub(crate) struct InMemoryStorageInner {
    /// Records by kind, then by ID
    pub(super) records: HashMap<EntityKind, BTreeMap<RecordId, Entity>>,

    /// Link adjacency indexes by kind
    pub(super) links: HashMap<LinkKind, LinkIndex>,

    /// Last ID handed out
    last_id: u64,
}

impl InMemoryStorageInner {
    /// Create a new empty storage instance
    pub(crate) fn new() -> Self {
        Self {
            records: HashMap::new(),
            links: HashMap::new(),
            last_id: 0,
        }
    }

    /// Return `id` if it is already assigned, otherwise allocate a fresh one.
    ///
    /// Explicit IDs above the counter move the counter forward so later
    /// allocations never collide with them.
    pub(super) fn assign_id(&mut self, id: RecordId) -> RecordId {
        if id.is_unsaved() {
            self.last_id += 1;
            RecordId(self.last_id)
        } else {
            self.last_id = self.last_id.max(id.get());
            id
        }
    }

    /// Records of one kind, if any were ever saved
    pub(super) fn records_of(&self, kind: EntityKind) -> Option<&BTreeMap<RecordId, Entity>> {
        self.records.get(&kind)
    }

    /// Link index of one kind, created on first use
    pub(super) fn index_mut(&mut self, kind: LinkKind) -> &mut LinkIndex {
        self.links.entry(kind).or_default()
    }
}
