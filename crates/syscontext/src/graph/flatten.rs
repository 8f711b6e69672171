//! Flattening of configuration item trees into dotted `path -> value` maps.

use super::{LinkGraph, PathResolver, VisitMarks, VisitState};
use crate::domain::{ConfigurationItem, RecordId};
use crate::error::{Error, Result};
use indexmap::IndexMap;

/// Flattened configuration, in depth-first pre-order of the tree.
pub type ConfigMap = IndexMap<String, String>;

enum Step {
    Enter {
        id: RecordId,
        parent_path: Option<String>,
        via: Option<RecordId>,
    },
    Exit(RecordId),
}

/// Collapses a configuration tree into a flat map of dotted paths.
#[derive(Debug, Clone, Default)]
pub struct ConfigFlattener {
    resolver: PathResolver,
}

impl ConfigFlattener {
    /// Create a flattener using the resolver's separator and depth limit
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    /// Resolver used for root search and ancestor paths
    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Flatten the tree below `root`, with `root`'s own key as first segment.
    ///
    /// Each reachable item contributes `path -> item_value`, where `path` is
    /// its parent's path plus its own key. Two items producing the same path
    /// (duplicate sibling keys) collapse into one entry holding the value
    /// written last.
    ///
    /// An item with several parents is flattened once, under its first
    /// parent (the source of its first incoming link), matching
    /// [`PathResolver::build_path_key`].
    ///
    /// # Errors
    ///
    /// - `Error::CycleDetected` if an item links back to one of its ancestors
    /// - `Error::Storage` if the store fails
    pub async fn flatten(
        &self,
        graph: &mut LinkGraph<'_>,
        root: &ConfigurationItem,
    ) -> Result<ConfigMap> {
        self.flatten_with_prefix(graph, root, None).await
    }

    /// Flatten the tree below `item`, prefixing paths with its ancestors' keys.
    ///
    /// For `app -> ui -> theme`, flattening `ui` yields `app.ui` and
    /// `app.ui.theme`. For a root item this is the same as [`flatten`](Self::flatten).
    pub async fn flatten_subtree(
        &self,
        graph: &mut LinkGraph<'_>,
        item: &ConfigurationItem,
    ) -> Result<ConfigMap> {
        let prefix = match graph.first_parent(item.id).await? {
            Some(parent_id) => match graph.node::<ConfigurationItem>(parent_id).await? {
                Some(parent) => Some(self.resolver.build_path_key(graph, &parent).await?),
                None => None,
            },
            None => None,
        };
        self.flatten_with_prefix(graph, item, prefix).await
    }

    /// Flattened configuration of an application.
    ///
    /// Finds the root of the application's items and flattens it. An
    /// application without items yields an empty map.
    pub async fn app_configuration(
        &self,
        graph: &mut LinkGraph<'_>,
        application: RecordId,
    ) -> Result<ConfigMap> {
        match self.resolver.find_root_item(graph, application).await? {
            Some(root) => self.flatten(graph, &root).await,
            None => {
                tracing::debug!(application = %application, "application has no configuration items");
                Ok(ConfigMap::new())
            }
        }
    }

    async fn flatten_with_prefix(
        &self,
        graph: &mut LinkGraph<'_>,
        root: &ConfigurationItem,
        prefix: Option<String>,
    ) -> Result<ConfigMap> {
        graph.remember(root);

        let separator = self.resolver.separator();
        let mut config = ConfigMap::new();
        let mut marks = VisitMarks::default();
        let mut stack = vec![Step::Enter {
            id: root.id,
            parent_path: prefix,
            via: None,
        }];

        while let Some(step) = stack.pop() {
            let (id, parent_path, via) = match step {
                Step::Exit(id) => {
                    marks.set(id, VisitState::Done);
                    continue;
                }
                Step::Enter {
                    id,
                    parent_path,
                    via,
                } => (id, parent_path, via),
            };

            match marks.get(id) {
                VisitState::InProgress => {
                    let from = via.unwrap_or(id);
                    tracing::warn!(from = %from, to = %id, "configuration items form a cycle");
                    return Err(Error::CycleDetected {
                        kind: graph.kind(),
                        from,
                        to: id,
                    });
                }
                VisitState::Done => {
                    tracing::debug!(item = %id, "item reachable along several paths, keeping first");
                    continue;
                }
                VisitState::Unvisited => {}
            }

            let Some(item) = graph.node::<ConfigurationItem>(id).await? else {
                tracing::debug!(item = %id, "skipping link to missing configuration item");
                continue;
            };

            let path = match parent_path {
                Some(parent_path) => format!("{}{}{}", parent_path, separator, item.item_key),
                None => item.item_key.clone(),
            };
            config.insert(path.clone(), item.item_value);

            marks.set(id, VisitState::InProgress);
            stack.push(Step::Exit(id));

            // Reverse so the first link is expanded first
            for link in graph.outgoing(id).await?.into_iter().rev() {
                // An ancestor is still entered so the back edge is reported
                let ancestor = marks.get(link.destination) == VisitState::InProgress;
                if !ancestor && graph.first_parent(link.destination).await? != Some(id) {
                    tracing::debug!(
                        parent = %id,
                        item = %link.destination,
                        "item is placed under its first parent, skipping this link"
                    );
                    continue;
                }
                stack.push(Step::Enter {
                    id: link.destination,
                    parent_path: Some(path.clone()),
                    via: Some(id),
                });
            }
        }

        tracing::debug!(root = %root.id, entries = config.len(), "flattened configuration");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Link, LinkKind};
    use crate::storage::in_memory::new_in_memory_storage;
    use crate::storage::{store, SystemStore};

    const APP: RecordId = RecordId(1_000);

    async fn item(storage: &dyn SystemStore, key: &str, value: &str) -> ConfigurationItem {
        store(storage, ConfigurationItem::new(APP, key, value))
            .await
            .unwrap()
    }

    async fn link(storage: &dyn SystemStore, parent: &ConfigurationItem, child: &ConfigurationItem) {
        storage
            .save_link(Link::new(LinkKind::ConfigurationItem, parent.id, child.id))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_flatten_three_levels() {
        let storage = new_in_memory_storage();
        let app = item(storage.as_ref(), "app", "x").await;
        let ui = item(storage.as_ref(), "ui", "y").await;
        let theme = item(storage.as_ref(), "theme", "z").await;
        link(storage.as_ref(), &app, &ui).await;
        link(storage.as_ref(), &ui, &theme).await;

        let mut graph = LinkGraph::new(storage.as_ref(), LinkKind::ConfigurationItem);
        let config = ConfigFlattener::default()
            .flatten(&mut graph, &app)
            .await
            .unwrap();

        let entries: Vec<(&str, &str)> = config
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            entries,
            vec![("app", "x"), ("app.ui", "y"), ("app.ui.theme", "z")]
        );
    }

    #[tokio::test]
    async fn test_flatten_duplicate_sibling_keys_last_writer_wins() {
        let storage = new_in_memory_storage();
        let root = item(storage.as_ref(), "db", "main").await;
        let first = item(storage.as_ref(), "host", "alpha").await;
        let second = item(storage.as_ref(), "host", "beta").await;
        link(storage.as_ref(), &root, &first).await;
        link(storage.as_ref(), &root, &second).await;

        let mut graph = LinkGraph::new(storage.as_ref(), LinkKind::ConfigurationItem);
        let config = ConfigFlattener::default()
            .flatten(&mut graph, &root)
            .await
            .unwrap();

        assert_eq!(config.len(), 2);
        assert_eq!(config["db.host"], "beta");
    }

    #[tokio::test]
    async fn test_flatten_detects_cycle() {
        let storage = new_in_memory_storage();
        let a = item(storage.as_ref(), "a", "1").await;
        let b = item(storage.as_ref(), "b", "2").await;
        let c = item(storage.as_ref(), "c", "3").await;
        link(storage.as_ref(), &a, &b).await;
        link(storage.as_ref(), &b, &c).await;
        link(storage.as_ref(), &c, &a).await;

        let mut graph = LinkGraph::new(storage.as_ref(), LinkKind::ConfigurationItem);
        let err = ConfigFlattener::default()
            .flatten(&mut graph, &a)
            .await
            .unwrap_err();

        match err {
            Error::CycleDetected { kind, from, to } => {
                assert_eq!(kind, LinkKind::ConfigurationItem);
                assert_eq!(from, c.id);
                assert_eq!(to, a.id);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_flatten_diamond_keeps_first_path() {
        let storage = new_in_memory_storage();
        let root = item(storage.as_ref(), "root", "r").await;
        let left = item(storage.as_ref(), "left", "l").await;
        let right = item(storage.as_ref(), "right", "r").await;
        let shared = item(storage.as_ref(), "shared", "s").await;
        link(storage.as_ref(), &root, &left).await;
        link(storage.as_ref(), &root, &right).await;
        link(storage.as_ref(), &left, &shared).await;
        link(storage.as_ref(), &right, &shared).await;

        let mut graph = LinkGraph::new(storage.as_ref(), LinkKind::ConfigurationItem);
        let config = ConfigFlattener::default()
            .flatten(&mut graph, &root)
            .await
            .unwrap();

        assert!(config.contains_key("root.left.shared"));
        assert!(!config.contains_key("root.right.shared"));
        assert_eq!(config.len(), 4);
    }

    #[tokio::test]
    async fn test_flatten_detects_cycle_through_later_parent() {
        let storage = new_in_memory_storage();
        let root = item(storage.as_ref(), "root", "r").await;
        let a = item(storage.as_ref(), "a", "1").await;
        let b = item(storage.as_ref(), "b", "2").await;
        link(storage.as_ref(), &root, &a).await;
        link(storage.as_ref(), &a, &b).await;
        link(storage.as_ref(), &b, &a).await;

        let mut graph = LinkGraph::new(storage.as_ref(), LinkKind::ConfigurationItem);
        let err = ConfigFlattener::default()
            .flatten(&mut graph, &root)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CycleDetected { from, to, .. } if from == b.id && to == a.id));
    }

    #[tokio::test]
    async fn test_flatten_uses_first_parent_even_when_visited_later() {
        let storage = new_in_memory_storage();
        let root = item(storage.as_ref(), "root", "r").await;
        let left = item(storage.as_ref(), "left", "l").await;
        let right = item(storage.as_ref(), "right", "r").await;
        let shared = item(storage.as_ref(), "shared", "s").await;
        link(storage.as_ref(), &root, &left).await;
        link(storage.as_ref(), &root, &right).await;
        // `right` becomes the first parent, but `left` is expanded first
        link(storage.as_ref(), &right, &shared).await;
        link(storage.as_ref(), &left, &shared).await;

        let flattener = ConfigFlattener::default();
        let mut graph = LinkGraph::new(storage.as_ref(), LinkKind::ConfigurationItem);
        let config = flattener.flatten(&mut graph, &root).await.unwrap();

        assert_eq!(config["root.right.shared"], "s");
        assert!(!config.contains_key("root.left.shared"));
        assert_eq!(config.len(), 4);

        let path = flattener
            .resolver()
            .build_path_key(&mut graph, &shared)
            .await
            .unwrap();
        assert!(config.contains_key(&path));

        let subtree = flattener.flatten_subtree(&mut graph, &shared).await.unwrap();
        assert_eq!(subtree.keys().collect::<Vec<_>>(), vec![&path]);
    }

    #[tokio::test]
    async fn test_flatten_skips_missing_children() {
        let storage = new_in_memory_storage();
        let root = item(storage.as_ref(), "root", "r").await;
        storage
            .save_link(Link::new(
                LinkKind::ConfigurationItem,
                root.id,
                RecordId(4_242),
            ))
            .await
            .unwrap();

        let mut graph = LinkGraph::new(storage.as_ref(), LinkKind::ConfigurationItem);
        let config = ConfigFlattener::default()
            .flatten(&mut graph, &root)
            .await
            .unwrap();
        assert_eq!(config.len(), 1);
    }

    #[tokio::test]
    async fn test_flatten_subtree_uses_ancestor_prefix() {
        let storage = new_in_memory_storage();
        let app = item(storage.as_ref(), "app", "x").await;
        let ui = item(storage.as_ref(), "ui", "y").await;
        let theme = item(storage.as_ref(), "theme", "z").await;
        link(storage.as_ref(), &app, &ui).await;
        link(storage.as_ref(), &ui, &theme).await;

        let mut graph = LinkGraph::new(storage.as_ref(), LinkKind::ConfigurationItem);
        let config = ConfigFlattener::default()
            .flatten_subtree(&mut graph, &ui)
            .await
            .unwrap();

        assert_eq!(config.len(), 2);
        assert_eq!(config["app.ui"], "y");
        assert_eq!(config["app.ui.theme"], "z");
    }

    #[tokio::test]
    async fn test_app_configuration_without_items_is_empty() {
        let storage = new_in_memory_storage();
        let mut graph = LinkGraph::new(storage.as_ref(), LinkKind::ConfigurationItem);

        let config = ConfigFlattener::default()
            .app_configuration(&mut graph, RecordId(77))
            .await
            .unwrap();
        assert!(config.is_empty());
    }
}
