//! Root search and dotted path keys over configuration item parent links.

use super::LinkGraph;
use crate::config::ContextConfig;
use crate::domain::{ConfigurationItem, ForeignKey, RecordId};
use crate::error::Result;
use crate::storage::fetch_referencing;
use std::collections::HashSet;

/// Walks parent links (incoming configuration item links) upward.
///
/// When a node has several parents, only the first link returned by the
/// store is followed.
#[derive(Debug, Clone)]
pub struct PathResolver {
    max_depth: usize,
    separator: String,
}

impl PathResolver {
    /// Create a resolver that gives up after `max_depth` visited nodes.
    pub fn new(max_depth: usize, separator: impl Into<String>) -> Self {
        Self {
            max_depth: max_depth.max(1),
            separator: separator.into(),
        }
    }

    /// Create a resolver from context configuration
    pub fn from_config(config: &ContextConfig) -> Self {
        Self::new(config.root_search_depth, config.key_separator.clone())
    }

    /// Separator placed between key segments
    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Find the root of the tree containing the first candidate.
    ///
    /// Starting at `candidates[0]`, repeatedly moves to the source of the
    /// first incoming link until a node without parents is reached. The
    /// ascent also stops, returning the current node, when a parent ID does
    /// not resolve.
    ///
    /// At most `max_depth` nodes are visited. If the cap is hit (a cycle, or
    /// a chain deeper than the cap) the last visited node is returned and a
    /// warning is logged; no error is raised.
    ///
    /// Returns `None` only for an empty candidate list.
    pub async fn find_root(
        &self,
        graph: &mut LinkGraph<'_>,
        candidates: &[ConfigurationItem],
    ) -> Result<Option<ConfigurationItem>> {
        let Some(first) = candidates.first() else {
            return Ok(None);
        };

        let mut current = first.clone();
        for _ in 1..self.max_depth {
            let Some(parent_id) = graph.first_parent(current.id).await? else {
                return Ok(Some(current));
            };

            match graph.node::<ConfigurationItem>(parent_id).await? {
                Some(parent) => current = parent,
                None => {
                    tracing::debug!(
                        item = %current.id,
                        parent = %parent_id,
                        "parent link points to a missing item, stopping root search"
                    );
                    return Ok(Some(current));
                }
            }
        }

        tracing::warn!(
            start = %first.id,
            reached = %current.id,
            max_depth = self.max_depth,
            "root search depth reached, returning last visited item"
        );
        Ok(Some(current))
    }

    /// Find the root item of an application's configuration tree.
    ///
    /// Uses the application's items, in store order, as candidates.
    pub async fn find_root_item(
        &self,
        graph: &mut LinkGraph<'_>,
        application: RecordId,
    ) -> Result<Option<ConfigurationItem>> {
        let items: Vec<ConfigurationItem> =
            fetch_referencing(graph.store(), ForeignKey::Application, application).await?;
        self.find_root(graph, &items).await
    }

    /// Build the dotted path of `item`, root first: `root.child.item`.
    ///
    /// Follows the first parent at every level. The ascent ends at a node
    /// without parents, at a parent that does not resolve, at a node already
    /// on the path, or after `max_depth` segments.
    pub async fn build_path_key(
        &self,
        graph: &mut LinkGraph<'_>,
        item: &ConfigurationItem,
    ) -> Result<String> {
        let mut segments = vec![item.item_key.clone()];
        let mut seen = HashSet::from([item.id]);
        let mut current = item.id;

        while segments.len() < self.max_depth {
            let Some(parent_id) = graph.first_parent(current).await? else {
                break;
            };
            if !seen.insert(parent_id) {
                tracing::warn!(item = %item.id, parent = %parent_id, "cycle in parent links");
                break;
            }
            let Some(parent) = graph.node::<ConfigurationItem>(parent_id).await? else {
                break;
            };
            segments.push(parent.item_key);
            current = parent_id;
        }

        segments.reverse();
        Ok(segments.join(&self.separator))
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default())
    }
}
