//! Graph resolution over link-encoded hierarchies.
//!
//! Entities do not point at each other; relations are separate [`Link`]
//! records. This module turns those records back into traversable graphs:
//!
//! - [`LinkGraph`]: outgoing/incoming links of a node for one link kind,
//!   cached for the duration of one logical operation
//! - [`PathResolver`]: root search and dotted path keys over parent links
//! - [`ConfigFlattener`]: configuration tree -> flat `path -> value` map
//! - [`DependencyGraphBuilder`]: transitive application dependencies
//!
//! # Traversal Conventions
//!
//! - Traversals use explicit stacks, so deep hierarchies cannot exhaust the
//!   call stack.
//! - Nodes are tracked with [`VisitState`]: a node that is `InProgress` when
//!   reached again closes a cycle; a `Done` node is not expanded twice.
//! - A link whose endpoint no longer resolves is skipped. Missing records
//!   mean "no value", never an error.
//! - Child order follows the order the store returns links in.

mod dependency;
mod flatten;
mod path;

pub use dependency::{DependencyGraph, DependencyGraphBuilder};
pub use flatten::{ConfigFlattener, ConfigMap};
pub use path::PathResolver;

use crate::domain::{Entity, Link, LinkKind, Record, RecordId};
use crate::error::Result;
use crate::storage::SystemStore;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Directed link index over record IDs for one link kind.
///
/// Backed by the store's `links_from` / `links_to` queries. Answers are
/// memoized, so create one `LinkGraph` per logical operation and drop it
/// afterwards; it does not observe writes made after a node was first
/// queried.
pub struct LinkGraph<'a> {
    store: &'a dyn SystemStore,
    kind: LinkKind,
    outgoing: HashMap<RecordId, Vec<Link>>,
    incoming: HashMap<RecordId, Vec<Link>>,
    nodes: HashMap<RecordId, Option<Entity>>,
}

impl<'a> LinkGraph<'a> {
    /// Create an empty view over `store` for links of `kind`
    pub fn new(store: &'a dyn SystemStore, kind: LinkKind) -> Self {
        Self {
            store,
            kind,
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            nodes: HashMap::new(),
        }
    }

    /// Link kind this graph traverses
    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    /// Underlying store
    pub fn store(&self) -> &'a dyn SystemStore {
        self.store
    }

    /// Links where `id` is the source. Empty for unknown IDs.
    pub async fn outgoing(&mut self, id: RecordId) -> Result<Vec<Link>> {
        if let Some(links) = self.outgoing.get(&id) {
            return Ok(links.clone());
        }
        let links = self.store.links_from(self.kind, id).await?;
        self.outgoing.insert(id, links.clone());
        Ok(links)
    }

    /// Links where `id` is the destination. Empty for unknown IDs.
    pub async fn incoming(&mut self, id: RecordId) -> Result<Vec<Link>> {
        if let Some(links) = self.incoming.get(&id) {
            return Ok(links.clone());
        }
        let links = self.store.links_to(self.kind, id).await?;
        self.incoming.insert(id, links.clone());
        Ok(links)
    }

    /// Source of the first incoming link, if any.
    pub async fn first_parent(&mut self, id: RecordId) -> Result<Option<RecordId>> {
        let incoming = self.incoming(id).await?;
        if incoming.len() > 1 {
            tracing::debug!(
                node = %id,
                parents = incoming.len(),
                "node has several parents, following the first"
            );
        }
        Ok(incoming.first().map(|link| link.source))
    }

    /// Resolve a node record, `None` if it does not exist (or has another kind).
    pub async fn node<R: Record>(&mut self, id: RecordId) -> Result<Option<R>> {
        let entity = match self.nodes.entry(id) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let found = self.store.find_by_id(R::KIND, id).await?;
                entry.insert(found).clone()
            }
        };
        Ok(entity.and_then(R::from_entity))
    }

    /// Seed the node cache with a record the caller already holds.
    pub fn remember<R: Record>(&mut self, record: &R) {
        self.nodes.insert(record.id(), Some(record.clone().into()));
    }
}

/// Visit mark of a node during a depth-first traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitState {
    /// Not reached yet
    Unvisited,

    /// Reached, its descendants are still being expanded
    InProgress,

    /// Reached and fully expanded
    Done,
}

/// Visit marks keyed by record ID; absent IDs are `Unvisited`.
#[derive(Debug, Default)]
pub(crate) struct VisitMarks(HashMap<RecordId, VisitState>);

impl VisitMarks {
    pub(crate) fn get(&self, id: RecordId) -> VisitState {
        self.0.get(&id).copied().unwrap_or(VisitState::Unvisited)
    }

    pub(crate) fn set(&mut self, id: RecordId, state: VisitState) {
        self.0.insert(id, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ApplicationConfig, ConfigurationItem};
    use crate::storage::in_memory::new_in_memory_storage;
    use crate::storage::{store, FailingStorage};

    #[tokio::test]
    async fn test_unknown_node_has_no_links() {
        let storage = new_in_memory_storage();
        let mut graph = LinkGraph::new(storage.as_ref(), LinkKind::ConfigurationItem);

        assert!(graph.outgoing(RecordId(42)).await.unwrap().is_empty());
        assert!(graph.incoming(RecordId(42)).await.unwrap().is_empty());
        assert_eq!(graph.first_parent(RecordId(42)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_answers_are_cached_per_graph() {
        let storage = new_in_memory_storage();
        let parent = store(storage.as_ref(), ConfigurationItem::new(RecordId(1), "a", "1"))
            .await
            .unwrap();
        let child = store(storage.as_ref(), ConfigurationItem::new(RecordId(1), "b", "2"))
            .await
            .unwrap();

        let mut graph = LinkGraph::new(storage.as_ref(), LinkKind::ConfigurationItem);
        assert!(graph.outgoing(parent.id).await.unwrap().is_empty());

        storage
            .save_link(Link::new(LinkKind::ConfigurationItem, parent.id, child.id))
            .await
            .unwrap();

        // Same operation, same answer
        assert!(graph.outgoing(parent.id).await.unwrap().is_empty());
        // A fresh operation sees the new link
        let mut fresh = LinkGraph::new(storage.as_ref(), LinkKind::ConfigurationItem);
        assert_eq!(fresh.outgoing(parent.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_node_of_other_kind_is_absent() {
        let storage = new_in_memory_storage();
        let app = store(storage.as_ref(), ApplicationConfig::new("shop"))
            .await
            .unwrap();

        let mut graph = LinkGraph::new(storage.as_ref(), LinkKind::ConfigurationItem);
        let item: Option<ConfigurationItem> = graph.node(app.id).await.unwrap();
        assert!(item.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let storage = FailingStorage::new();
        let mut graph = LinkGraph::new(&storage, LinkKind::Application);
        assert!(graph.outgoing(RecordId(1)).await.is_err());
    }

    #[test]
    fn test_visit_marks_default_unvisited() {
        let mut marks = VisitMarks::default();
        assert_eq!(marks.get(RecordId(1)), VisitState::Unvisited);
        marks.set(RecordId(1), VisitState::InProgress);
        assert_eq!(marks.get(RecordId(1)), VisitState::InProgress);
    }
}
