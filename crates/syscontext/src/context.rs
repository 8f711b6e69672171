//! Service facade over the system context.
//!
//! [`SystemContext`] owns a store handle, the [`ContextConfig`] and the
//! session overlay. It is constructed explicitly and passed to whoever needs
//! it; there is no process-wide instance.
//!
//! Every query builds a fresh [`LinkGraph`], so each call sees the store as
//! it was when the call started.
//!
//! # Example
//!
//! ```no_run
//! use syscontext::context::SystemContext;
//! use syscontext::storage::in_memory::new_in_memory_storage;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let context = SystemContext::new(new_in_memory_storage(), Default::default())?;
//!
//!     let shop = context.add_app("shop", None).await?;
//!     let root = context.add_item(shop.id, "shop", "v1", None).await?;
//!     context.add_item(shop.id, "theme", "dark", Some(root.id)).await?;
//!
//!     // {"shop": "v1", "shop.theme": "dark"}
//!     println!("{:?}", context.app_configuration(shop.id).await?);
//!     Ok(())
//! }
//! ```

use crate::config::{ContextConfig, ParentPolicy};
use crate::domain::{
    ApplicationConfig, ApplicationInstallation, ApplicationSession, ConfigurationItem,
    EntityKind, ForeignKey, Link, LinkKind, PropertyState, RecordId, SessionState,
};
use crate::error::{Error, Result};
use crate::graph::{
    ConfigFlattener, ConfigMap, DependencyGraph, DependencyGraphBuilder, LinkGraph, PathResolver,
};
use crate::model::SystemModel;
use crate::session::{ItemState, SessionStateStore};
use crate::storage::{fetch, fetch_all, fetch_referencing, store, SystemStore};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Entry point for configuration, dependency and session queries.
pub struct SystemContext {
    /// The persistence collaborator (trait object for polymorphism)
    store: Arc<dyn SystemStore>,

    /// Validated configuration
    config: ContextConfig,

    /// Session overlay sharing the same store
    sessions: SessionStateStore,
}

impl std::fmt::Debug for SystemContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemContext")
            .field("config", &self.config)
            .field("store", &"<dyn SystemStore>")
            .finish()
    }
}

impl SystemContext {
    /// Create a context over `store`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration does not validate.
    pub fn new(store: Arc<dyn SystemStore>, config: ContextConfig) -> Result<Self> {
        config.validate()?;
        let sessions = SessionStateStore::new(Arc::clone(&store));
        Ok(Self {
            store,
            config,
            sessions,
        })
    }

    /// Create a context with configuration loaded from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (`Error::Io`)
    /// - The YAML is malformed or holds invalid values (`Error::Config`)
    pub async fn from_config_file(path: &Path, store: Arc<dyn SystemStore>) -> Result<Self> {
        let config = ContextConfig::load(path).await?;
        tracing::debug!(path = %path.display(), "loaded context configuration");
        Self::new(store, config)
    }

    /// Get the underlying store.
    pub fn store(&self) -> &dyn SystemStore {
        self.store.as_ref()
    }

    /// Get the active configuration.
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Get the session overlay store.
    pub fn sessions(&self) -> &SessionStateStore {
        &self.sessions
    }

    fn item_graph(&self) -> LinkGraph<'_> {
        LinkGraph::new(self.store.as_ref(), LinkKind::ConfigurationItem)
    }

    fn app_graph(&self) -> LinkGraph<'_> {
        LinkGraph::new(self.store.as_ref(), LinkKind::Application)
    }

    fn resolver(&self) -> PathResolver {
        PathResolver::from_config(&self.config)
    }

    fn flattener(&self) -> ConfigFlattener {
        ConfigFlattener::new(self.resolver())
    }

    async fn require_app(&self, id: RecordId) -> Result<ApplicationConfig> {
        fetch(self.store(), id).await?.ok_or(Error::RecordNotFound {
            kind: EntityKind::Application,
            id,
        })
    }

    async fn require_item(&self, id: RecordId) -> Result<ConfigurationItem> {
        fetch(self.store(), id).await?.ok_or(Error::RecordNotFound {
            kind: EntityKind::ConfigurationItem,
            id,
        })
    }

    /// Whether `ancestor` is reachable from `item` by walking parent links up.
    async fn is_ancestor(&self, ancestor: RecordId, item: RecordId) -> Result<bool> {
        let mut graph = self.item_graph();
        let mut seen = HashSet::from([item]);
        let mut stack = vec![item];

        while let Some(current) = stack.pop() {
            for link in graph.incoming(current).await? {
                if link.source == ancestor {
                    return Ok(true);
                }
                if seen.insert(link.source) {
                    stack.push(link.source);
                }
            }
        }
        Ok(false)
    }

    /// Delete items written by a call that failed part way.
    ///
    /// Delete failures are logged; the caller reports the original error.
    async fn discard_items(&self, items: &[RecordId]) {
        for &id in items {
            if let Err(err) = self.store.delete(EntityKind::ConfigurationItem, id).await {
                tracing::warn!(item = %id, error = %err, "failed to discard configuration item");
            }
        }
    }

    async fn find_link(
        &self,
        kind: LinkKind,
        source: RecordId,
        destination: RecordId,
    ) -> Result<Option<Link>> {
        let links = self.store.links_from(kind, source).await?;
        Ok(links.into_iter().find(|link| link.destination == destination))
    }

    // ========== Applications ==========

    /// Register a new application.
    pub async fn add_app(&self, name: &str, description: Option<&str>) -> Result<ApplicationConfig> {
        let mut app = ApplicationConfig::new(name);
        app.description = description.map(str::to_string);
        let app = store(self.store(), app).await?;
        tracing::debug!(application = %app.id, name = %app.name, "added application");
        Ok(app)
    }

    /// Get an application by ID.
    pub async fn application(&self, id: RecordId) -> Result<Option<ApplicationConfig>> {
        fetch(self.store(), id).await
    }

    /// List all applications.
    pub async fn applications(&self) -> Result<Vec<ApplicationConfig>> {
        fetch_all(self.store()).await
    }

    /// Find an application by name, ignoring case. The first match wins.
    pub async fn find_app_by_name(&self, name: &str) -> Result<Option<ApplicationConfig>> {
        let wanted = name.to_lowercase();
        Ok(self
            .applications()
            .await?
            .into_iter()
            .find(|app| app.name.to_lowercase() == wanted))
    }

    /// Record that `source` depends on `target`.
    ///
    /// Connecting the same pair twice returns the existing link.
    ///
    /// # Errors
    ///
    /// Returns `Error::RecordNotFound` if either application does not exist.
    pub async fn connect_apps(&self, source: RecordId, target: RecordId) -> Result<Link> {
        self.require_app(source).await?;
        self.require_app(target).await?;

        if let Some(existing) = self.find_link(LinkKind::Application, source, target).await? {
            return Ok(existing);
        }

        let link = self
            .store
            .save_link(Link::new(LinkKind::Application, source, target))
            .await?;
        tracing::debug!(from = %source, to = %target, link = %link.id, "connected applications");
        Ok(link)
    }

    /// Get the dependency link from `source` to `target`, if any.
    pub async fn find_app_link(&self, source: RecordId, target: RecordId) -> Result<Option<Link>> {
        self.find_link(LinkKind::Application, source, target).await
    }

    /// Remove the dependency link from `source` to `target`.
    ///
    /// Returns `false` if the applications were not connected.
    pub async fn disconnect_apps(&self, source: RecordId, target: RecordId) -> Result<bool> {
        match self.find_app_link(source, target).await? {
            Some(link) => self.store.delete_link(LinkKind::Application, link.id).await,
            None => Ok(false),
        }
    }

    /// Transitive dependency subgraph of an application.
    ///
    /// An unknown application yields an empty graph.
    pub async fn build_dependency_graph(&self, app: RecordId) -> Result<DependencyGraph> {
        let mut graph = self.app_graph();
        DependencyGraphBuilder::new().build(&mut graph, app).await
    }

    /// Applications `app` depends on, directly or transitively, in discovery
    /// order. The application itself is only included if it sits on a cycle.
    pub async fn app_dependencies(&self, app: RecordId) -> Result<Vec<ApplicationConfig>> {
        let graph = self.build_dependency_graph(app).await?;
        let on_cycle = graph.edges.iter().any(|link| link.destination == app);
        Ok(graph
            .nodes
            .into_values()
            .filter(|node| node.id != app || on_cycle)
            .collect())
    }

    // ========== Configuration Items ==========

    /// Create one unlinked item per `(key, value)` pair.
    ///
    /// Either every item is created or none is: if a write fails, the items
    /// already written by this call are deleted again.
    ///
    /// # Errors
    ///
    /// - `Error::RecordNotFound` if the application does not exist
    /// - `Error::Storage` if the store fails
    pub async fn configure_app<K, V>(
        &self,
        app: RecordId,
        items: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Vec<ConfigurationItem>>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.require_app(app).await?;

        let mut created: Vec<ConfigurationItem> = Vec::new();
        for (key, value) in items {
            match store(self.store(), ConfigurationItem::new(app, key, value)).await {
                Ok(item) => created.push(item),
                Err(err) => {
                    let ids: Vec<RecordId> = created.iter().map(|item| item.id).collect();
                    self.discard_items(&ids).await;
                    return Err(err);
                }
            }
        }
        tracing::debug!(application = %app, items = created.len(), "configured application");
        Ok(created)
    }

    /// Create an item for `app`, optionally as a child of `parent`.
    ///
    /// # Errors
    ///
    /// Returns `Error::RecordNotFound` if the application or the parent does
    /// not exist. The parent is checked before anything is written. If
    /// linking the new item fails, the item is deleted again and the link
    /// error is returned.
    pub async fn add_item(
        &self,
        app: RecordId,
        key: &str,
        value: &str,
        parent: Option<RecordId>,
    ) -> Result<ConfigurationItem> {
        self.require_app(app).await?;
        if let Some(parent) = parent {
            self.require_item(parent).await?;
        }

        let item = store(self.store(), ConfigurationItem::new(app, key, value)).await?;
        if let Some(parent) = parent {
            if let Err(err) = self.link_items(parent, item.id).await {
                self.discard_items(&[item.id]).await;
                return Err(err);
            }
        }
        Ok(item)
    }

    /// Make `child` a child of `parent`.
    ///
    /// Linking the same pair twice returns the existing link. Under
    /// [`ParentPolicy::SingleParent`] a child that already has another parent
    /// is rejected.
    ///
    /// # Errors
    ///
    /// - `Error::RecordNotFound` if either item does not exist
    /// - `Error::CycleDetected` if `child` is `parent` itself or one of its
    ///   ancestors
    /// - `Error::MultipleParents` if the policy forbids a second parent
    pub async fn link_items(&self, parent: RecordId, child: RecordId) -> Result<Link> {
        self.require_item(parent).await?;
        self.require_item(child).await?;

        if parent == child {
            return Err(Error::CycleDetected {
                kind: LinkKind::ConfigurationItem,
                from: parent,
                to: child,
            });
        }

        let incoming = self
            .store
            .links_to(LinkKind::ConfigurationItem, child)
            .await?;
        if let Some(existing) = incoming.iter().find(|link| link.source == parent) {
            return Ok(existing.clone());
        }

        if self.is_ancestor(child, parent).await? {
            tracing::warn!(parent = %parent, child = %child, "link would close a cycle");
            return Err(Error::CycleDetected {
                kind: LinkKind::ConfigurationItem,
                from: parent,
                to: child,
            });
        }

        if self.config.parent_policy == ParentPolicy::SingleParent {
            if let Some(other) = incoming.first() {
                return Err(Error::MultipleParents {
                    child,
                    existing_parent: other.source,
                });
            }
        }

        let link = self
            .store
            .save_link(Link::new(LinkKind::ConfigurationItem, parent, child))
            .await?;
        tracing::debug!(parent = %parent, child = %child, link = %link.id, "linked configuration items");
        Ok(link)
    }

    /// All configuration items of an application, in store order.
    pub async fn configuration_items(&self, app: RecordId) -> Result<Vec<ConfigurationItem>> {
        fetch_referencing(self.store(), ForeignKey::Application, app).await
    }

    /// Value of the first item of `app` whose key is exactly `key`.
    pub async fn configuration_value(&self, app: RecordId, key: &str) -> Result<Option<String>> {
        Ok(self
            .configuration_items(app)
            .await?
            .into_iter()
            .find(|item| item.item_key == key)
            .map(|item| item.item_value))
    }

    /// Root item of an application's configuration tree.
    pub async fn find_root_item(&self, app: RecordId) -> Result<Option<ConfigurationItem>> {
        let mut graph = self.item_graph();
        self.resolver().find_root_item(&mut graph, app).await
    }

    /// Dotted path of an item, root first. `None` if the item does not exist.
    pub async fn path_key(&self, item: RecordId) -> Result<Option<String>> {
        let mut graph = self.item_graph();
        let Some(item) = graph.node::<ConfigurationItem>(item).await? else {
            return Ok(None);
        };
        Ok(Some(self.resolver().build_path_key(&mut graph, &item).await?))
    }

    /// Flattened configuration of an application.
    ///
    /// Empty if the application has no items.
    pub async fn app_configuration(&self, app: RecordId) -> Result<ConfigMap> {
        let mut graph = self.item_graph();
        self.flattener().app_configuration(&mut graph, app).await
    }

    /// Flattened subtree rooted at `item`, with full paths from the tree root.
    ///
    /// Empty if the item does not exist.
    pub async fn configurations(&self, item: RecordId) -> Result<ConfigMap> {
        let mut graph = self.item_graph();
        let Some(item) = graph.node::<ConfigurationItem>(item).await? else {
            return Ok(ConfigMap::new());
        };
        self.flattener().flatten_subtree(&mut graph, &item).await
    }

    // ========== Installations & Sessions ==========

    /// Record that `app` is installed on `host`.
    ///
    /// # Errors
    ///
    /// Returns `Error::RecordNotFound` if the application does not exist.
    pub async fn install_app(&self, app: RecordId, host: &str) -> Result<ApplicationInstallation> {
        self.require_app(app).await?;
        let installation = store(self.store(), ApplicationInstallation::new(app, host)).await?;
        tracing::debug!(application = %app, host = %host, installation = %installation.id, "installed application");
        Ok(installation)
    }

    /// All installations of an application.
    pub async fn installations(&self, app: RecordId) -> Result<Vec<ApplicationInstallation>> {
        fetch_referencing(self.store(), ForeignKey::Application, app).await
    }

    /// Open a session for an installation.
    ///
    /// # Errors
    ///
    /// Returns `Error::RecordNotFound` if the installation does not exist.
    pub async fn start_session(
        &self,
        installation: RecordId,
        now: DateTime<Utc>,
    ) -> Result<ApplicationSession> {
        let found: Option<ApplicationInstallation> = fetch(self.store(), installation).await?;
        if found.is_none() {
            return Err(Error::RecordNotFound {
                kind: EntityKind::Installation,
                id: installation,
            });
        }

        let session = store(self.store(), ApplicationSession::open(installation, now)).await?;
        tracing::debug!(installation = %installation, session = %session.id, "session started");
        Ok(session)
    }

    /// Close a session.
    ///
    /// Returns `false` if the session does not exist or was already closed.
    pub async fn shutdown_session(&self, session: RecordId, now: DateTime<Utc>) -> Result<bool> {
        let Some(mut found) = fetch::<ApplicationSession>(self.store(), session).await? else {
            return Ok(false);
        };

        if !found.close(now) {
            return Ok(false);
        }
        store(self.store(), found).await?;
        tracing::debug!(session = %session, "session closed");
        Ok(true)
    }

    /// Open sessions of an installation.
    pub async fn active_sessions(&self, installation: RecordId) -> Result<Vec<ApplicationSession>> {
        let sessions: Vec<ApplicationSession> =
            fetch_referencing(self.store(), ForeignKey::Installation, installation).await?;
        Ok(sessions
            .into_iter()
            .filter(|session| session.status.is_open())
            .collect())
    }

    // ========== Session Overlay ==========

    /// Set an overlay property of `item` within `session`.
    pub async fn update_property_state(
        &self,
        session: RecordId,
        item: RecordId,
        key: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<PropertyState> {
        self.sessions
            .upsert_property(session, item, key, value, now)
            .await
    }

    /// Overlay values of `item` within `session`.
    pub async fn item_state(&self, item: RecordId, session: RecordId) -> Result<ItemState> {
        self.sessions.get_item_state(item, session).await
    }

    /// One overlay value of `item` within `session`.
    pub async fn property_state(
        &self,
        key: &str,
        item: RecordId,
        session: RecordId,
    ) -> Result<Option<String>> {
        self.sessions.get_property_state(key, item, session).await
    }

    /// Session state groups of a session.
    pub async fn session_states(&self, session: RecordId) -> Result<Vec<SessionState>> {
        self.sessions.session_states(session).await
    }

    /// Properties of a session state group.
    pub async fn property_states(&self, session_state: RecordId) -> Result<Vec<PropertyState>> {
        self.sessions.property_states(session_state).await
    }

    // ========== Model Export ==========

    /// Model holding an application, its items and every link touching them.
    ///
    /// # Errors
    ///
    /// Returns `Error::RecordNotFound` if the application does not exist.
    pub async fn app_configuration_model(&self, app: RecordId) -> Result<SystemModel> {
        let application = self.require_app(app).await?;
        let mut model = SystemModel::new();
        model.add_application(application);

        for link in self.store.links_from(LinkKind::Application, app).await? {
            model.add_link(link);
        }
        for link in self.store.links_to(LinkKind::Application, app).await? {
            model.add_link(link);
        }

        for item in self.configuration_items(app).await? {
            let links = self
                .store
                .links_from(LinkKind::ConfigurationItem, item.id)
                .await?
                .into_iter()
                .chain(self.store.links_to(LinkKind::ConfigurationItem, item.id).await?);
            for link in links {
                model.add_link(link);
            }
            model.add_configuration_item(item);
        }

        tracing::debug!(
            application = %app,
            items = model.configuration_items.len(),
            links = model.item_links.len() + model.application_links.len(),
            "built configuration model"
        );
        Ok(model)
    }

    /// Model holding a session, its installation, the configuration model of
    /// its application and all of its overlay state.
    ///
    /// A session whose installation or application no longer exists still
    /// yields a model with the session and its overlay.
    ///
    /// # Errors
    ///
    /// Returns `Error::RecordNotFound` if the session does not exist.
    pub async fn app_session_model(&self, session: RecordId) -> Result<SystemModel> {
        let found: ApplicationSession = fetch(self.store(), session)
            .await?
            .ok_or(Error::RecordNotFound {
                kind: EntityKind::Session,
                id: session,
            })?;

        let mut model = SystemModel::new();
        let installation: Option<ApplicationInstallation> =
            fetch(self.store(), found.installation).await?;
        if let Some(installation) = installation {
            let app = installation.application;
            model.add_installation(installation);
            match self.app_configuration_model(app).await {
                Ok(configuration) => model.merge(configuration),
                Err(Error::RecordNotFound { .. }) => {
                    tracing::debug!(application = %app, "session application no longer exists");
                }
                Err(e) => return Err(e),
            }
        }
        model.add_session(found);

        for state in self.session_states(session).await? {
            for property in self.property_states(state.id).await? {
                model.add_property_state(property);
            }
            model.add_session_state(state);
        }

        Ok(model)
    }
}
