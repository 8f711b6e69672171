//! Transitive application dependency extraction.

use super::{LinkGraph, VisitMarks, VisitState};
use crate::domain::{ApplicationConfig, Link, RecordId};
use crate::error::Result;
use indexmap::IndexMap;
use serde::Serialize;

/// Subgraph reachable from one application over dependency links.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DependencyGraph {
    /// Reached applications, in depth-first discovery order
    pub nodes: IndexMap<RecordId, ApplicationConfig>,

    /// Traversed links, each recorded once
    pub edges: Vec<Link>,

    /// Links closing a cycle (also present in `edges`)
    pub cycles: Vec<Link>,
}

impl DependencyGraph {
    /// Number of applications in the subgraph
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of links in the subgraph
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Whether the traversal found at least one dependency cycle
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// Whether the application is part of the subgraph
    pub fn contains(&self, id: RecordId) -> bool {
        self.nodes.contains_key(&id)
    }
}

/// Builds [`DependencyGraph`]s by depth-first traversal of application links.
///
/// Every application is expanded at most once. A link reaching an already
/// visited application is still recorded, so diamonds keep all their edges.
/// A link reaching an application that is still being expanded closes a
/// cycle and is reported in [`DependencyGraph::cycles`] instead of being
/// followed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyGraphBuilder;

impl DependencyGraphBuilder {
    /// Create a builder
    pub fn new() -> Self {
        Self
    }

    /// Build the dependency subgraph of `root`.
    ///
    /// An unknown `root` yields an empty graph. Links to applications that
    /// no longer exist are skipped.
    pub async fn build(&self, graph: &mut LinkGraph<'_>, root: RecordId) -> Result<DependencyGraph> {
        let mut result = DependencyGraph::default();

        let Some(root_app) = graph.node::<ApplicationConfig>(root).await? else {
            tracing::debug!(application = %root, "dependency root does not exist");
            return Ok(result);
        };
        result.nodes.insert(root, root_app);

        let mut marks = VisitMarks::default();
        let mut stack = Vec::new();
        Self::expand(graph, &mut marks, &mut stack, root).await?;

        while let Some(step) = stack.pop() {
            let link = match step {
                Step::Exit(id) => {
                    marks.set(id, VisitState::Done);
                    continue;
                }
                Step::Follow(link) => link,
            };

            let target = link.destination;
            match marks.get(target) {
                VisitState::InProgress => {
                    tracing::warn!(
                        from = %link.source,
                        to = %target,
                        "dependency cycle detected"
                    );
                    result.cycles.push(link.clone());
                    result.edges.push(link);
                }
                VisitState::Done => result.edges.push(link),
                VisitState::Unvisited => {
                    let Some(app) = graph.node::<ApplicationConfig>(target).await? else {
                        tracing::debug!(
                            link = %link.id,
                            application = %target,
                            "skipping link to missing application"
                        );
                        continue;
                    };
                    result.edges.push(link);
                    result.nodes.insert(target, app);
                    Self::expand(graph, &mut marks, &mut stack, target).await?;
                }
            }
        }

        tracing::debug!(
            application = %root,
            nodes = result.node_count(),
            edges = result.edge_count(),
            cycles = result.cycles.len(),
            "built dependency graph"
        );
        Ok(result)
    }

    async fn expand(
        graph: &mut LinkGraph<'_>,
        marks: &mut VisitMarks,
        stack: &mut Vec<Step>,
        id: RecordId,
    ) -> Result<()> {
        marks.set(id, VisitState::InProgress);
        stack.push(Step::Exit(id));
        // Reverse so the first link is followed first
        for link in graph.outgoing(id).await?.into_iter().rev() {
            stack.push(Step::Follow(link));
        }
        Ok(())
    }
}

enum Step {
    Follow(Link),
    Exit(RecordId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LinkKind;
    use crate::storage::in_memory::new_in_memory_storage;
    use crate::storage::{store, SystemStore};

    async fn app(storage: &dyn SystemStore, name: &str) -> ApplicationConfig {
        store(storage, ApplicationConfig::new(name)).await.unwrap()
    }

    async fn depends(storage: &dyn SystemStore, from: &ApplicationConfig, to: &ApplicationConfig) {
        storage
            .save_link(Link::new(LinkKind::Application, from.id, to.id))
            .await
            .unwrap();
    }

    async fn build(storage: &dyn SystemStore, root: RecordId) -> DependencyGraph {
        let mut graph = LinkGraph::new(storage, LinkKind::Application);
        DependencyGraphBuilder::new().build(&mut graph, root).await.unwrap()
    }

    #[tokio::test]
    async fn test_two_node_cycle_terminates() {
        let storage = new_in_memory_storage();
        let a = app(storage.as_ref(), "a").await;
        let b = app(storage.as_ref(), "b").await;
        depends(storage.as_ref(), &a, &b).await;
        depends(storage.as_ref(), &b, &a).await;

        let result = build(storage.as_ref(), a.id).await;

        assert_eq!(result.node_count(), 2);
        assert_eq!(result.edge_count(), 2);
        assert!(result.has_cycles());
        assert_eq!(result.cycles.len(), 1);
        assert_eq!(result.cycles[0].source, b.id);
        assert_eq!(result.cycles[0].destination, a.id);
    }

    #[tokio::test]
    async fn test_self_dependency() {
        let storage = new_in_memory_storage();
        let a = app(storage.as_ref(), "a").await;
        depends(storage.as_ref(), &a, &a).await;

        let result = build(storage.as_ref(), a.id).await;
        assert_eq!(result.node_count(), 1);
        assert_eq!(result.edge_count(), 1);
        assert!(result.has_cycles());
    }

    #[tokio::test]
    async fn test_diamond_counts_every_edge_once() {
        let storage = new_in_memory_storage();
        let top = app(storage.as_ref(), "top").await;
        let left = app(storage.as_ref(), "left").await;
        let right = app(storage.as_ref(), "right").await;
        let bottom = app(storage.as_ref(), "bottom").await;
        depends(storage.as_ref(), &top, &left).await;
        depends(storage.as_ref(), &top, &right).await;
        depends(storage.as_ref(), &left, &bottom).await;
        depends(storage.as_ref(), &right, &bottom).await;

        let result = build(storage.as_ref(), top.id).await;
        assert_eq!(result.node_count(), 4);
        assert_eq!(result.edge_count(), 4);
        assert!(!result.has_cycles());
    }

    #[tokio::test]
    async fn test_unknown_root_is_empty() {
        let storage = new_in_memory_storage();
        let result = build(storage.as_ref(), RecordId(5)).await;
        assert_eq!(result.node_count(), 0);
        assert_eq!(result.edge_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_dependency_is_skipped() {
        let storage = new_in_memory_storage();
        let a = app(storage.as_ref(), "a").await;
        let gone = app(storage.as_ref(), "gone").await;
        depends(storage.as_ref(), &a, &gone).await;
        storage
            .delete(crate::domain::EntityKind::Application, gone.id)
            .await
            .unwrap();

        let result = build(storage.as_ref(), a.id).await;
        assert_eq!(result.node_count(), 1);
        assert_eq!(result.edge_count(), 0);
    }

    #[tokio::test]
    async fn test_chain_grows_by_one_per_hop() {
        let storage = new_in_memory_storage();
        let mut chain = Vec::new();
        for i in 0..5 {
            chain.push(app(storage.as_ref(), &format!("app{i}")).await);
        }
        for pair in chain.windows(2) {
            depends(storage.as_ref(), &pair[0], &pair[1]).await;
        }

        for (hops, start) in chain.iter().rev().enumerate() {
            let result = build(storage.as_ref(), start.id).await;
            assert_eq!(result.node_count(), hops + 1);
            assert_eq!(result.edge_count(), hops);
        }
    }
}
