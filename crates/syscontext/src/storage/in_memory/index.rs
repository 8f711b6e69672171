//! Link adjacency index using petgraph.
//!
//! Each link kind gets its own [`LinkIndex`]. Graph nodes carry record IDs,
//! graph edges carry link IDs, and the link records themselves live in an
//! ordered map next to the graph.

use crate::domain::{Link, RecordId};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap};

/// Directed adjacency index over the links of one kind.
#[derive(Default)]
pub(crate) struct LinkIndex {
    /// Edge direction: link source -> link destination.
    graph: DiGraph<RecordId, RecordId>,

    /// Mapping from record ID to graph node.
    ///
    /// Nodes are never removed, so indices stay valid for the index lifetime.
    node_map: HashMap<RecordId, NodeIndex>,

    /// Link records by ID
    links: BTreeMap<RecordId, Link>,
}

impl LinkIndex {
    fn node(&mut self, id: RecordId) -> NodeIndex {
        if let Some(&node) = self.node_map.get(&id) {
            return node;
        }
        let node = self.graph.add_node(id);
        self.node_map.insert(id, node);
        node
    }

    /// Insert a saved link, replacing any previous link with the same ID.
    pub(super) fn insert(&mut self, link: Link) {
        self.remove(link.id);

        let from = self.node(link.source);
        let to = self.node(link.destination);
        self.graph.add_edge(from, to, link.id);
        self.links.insert(link.id, link);
    }

    /// Remove a link by ID, returning it if it existed.
    pub(super) fn remove(&mut self, id: RecordId) -> Option<Link> {
        let link = self.links.remove(&id)?;

        if let (Some(&from), Some(&to)) = (
            self.node_map.get(&link.source),
            self.node_map.get(&link.destination),
        ) {
            // Several links may connect the same pair; pick the one carrying this ID
            let edge = self
                .graph
                .edges_connecting(from, to)
                .find(|edge| *edge.weight() == id)
                .map(|edge| edge.id());
            if let Some(edge) = edge {
                self.graph.remove_edge(edge);
            }
        }

        Some(link)
    }

    /// Links whose source is `id`, in creation order.
    pub(super) fn outgoing(&self, id: RecordId) -> Vec<Link> {
        self.collect(id, Direction::Outgoing)
    }

    /// Links whose destination is `id`, in creation order.
    pub(super) fn incoming(&self, id: RecordId) -> Vec<Link> {
        self.collect(id, Direction::Incoming)
    }

    fn collect(&self, id: RecordId, direction: Direction) -> Vec<Link> {
        let Some(&node) = self.node_map.get(&id) else {
            return Vec::new();
        };

        // petgraph yields the most recently added edge first
        let mut links: Vec<Link> = self
            .graph
            .edges_directed(node, direction)
            .filter_map(|edge| self.links.get(edge.weight()).cloned())
            .collect();
        links.sort_by_key(|link| link.id);
        links
    }
}
