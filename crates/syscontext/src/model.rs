//! Self-contained slices of the system context for export.
//!
//! A [`SystemModel`] collects records and the links between them so they can
//! be handed to another process as one JSON document. Fragments are built by
//! [`SystemContext::app_configuration_model`] and
//! [`SystemContext::app_session_model`]; adding a record twice keeps the
//! first copy.
//!
//! [`SystemContext::app_configuration_model`]: crate::context::SystemContext::app_configuration_model
//! [`SystemContext::app_session_model`]: crate::context::SystemContext::app_session_model

use crate::domain::{
    ApplicationConfig, ApplicationInstallation, ApplicationSession, ConfigurationItem, Link,
    LinkKind, PropertyState, RecordId, SessionState,
};
use crate::error::Result;
use indexmap::IndexMap;
use indexmap::map::Entry;
use serde::{Deserialize, Serialize};

/// Records of one kind keyed by ID, in insertion order
pub type Records<T> = IndexMap<RecordId, T>;

/// Records and links forming one exported view of the system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemModel {
    /// Applications
    pub applications: Records<ApplicationConfig>,

    /// Configuration items
    pub configuration_items: Records<ConfigurationItem>,

    /// Parent -> child links between configuration items
    pub item_links: Records<Link>,

    /// Dependency links between applications
    pub application_links: Records<Link>,

    /// Installations
    pub installations: Records<ApplicationInstallation>,

    /// Sessions
    pub sessions: Records<ApplicationSession>,

    /// Session state groups
    pub session_states: Records<SessionState>,

    /// Session property overrides
    pub property_states: Records<PropertyState>,
}

fn insert_new<T>(records: &mut Records<T>, id: RecordId, record: T) -> bool {
    match records.entry(id) {
        Entry::Occupied(_) => false,
        Entry::Vacant(entry) => {
            entry.insert(record);
            true
        }
    }
}

impl SystemModel {
    /// Create an empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the model holds no records at all
    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
            && self.configuration_items.is_empty()
            && self.item_links.is_empty()
            && self.application_links.is_empty()
            && self.installations.is_empty()
            && self.sessions.is_empty()
            && self.session_states.is_empty()
            && self.property_states.is_empty()
    }

    /// Add an application. Returns `false` if it was already present.
    pub fn add_application(&mut self, app: ApplicationConfig) -> bool {
        insert_new(&mut self.applications, app.id, app)
    }

    /// Add a configuration item. Returns `false` if it was already present.
    pub fn add_configuration_item(&mut self, item: ConfigurationItem) -> bool {
        insert_new(&mut self.configuration_items, item.id, item)
    }

    /// Add a link to the collection matching its kind. Returns `false` if it
    /// was already present.
    pub fn add_link(&mut self, link: Link) -> bool {
        let links = match link.kind {
            LinkKind::ConfigurationItem => &mut self.item_links,
            LinkKind::Application => &mut self.application_links,
        };
        insert_new(links, link.id, link)
    }

    /// Add an installation. Returns `false` if it was already present.
    pub fn add_installation(&mut self, installation: ApplicationInstallation) -> bool {
        insert_new(&mut self.installations, installation.id, installation)
    }

    /// Add a session. Returns `false` if it was already present.
    pub fn add_session(&mut self, session: ApplicationSession) -> bool {
        insert_new(&mut self.sessions, session.id, session)
    }

    /// Add a session state. Returns `false` if it was already present.
    pub fn add_session_state(&mut self, state: SessionState) -> bool {
        insert_new(&mut self.session_states, state.id, state)
    }

    /// Add a property state. Returns `false` if it was already present.
    pub fn add_property_state(&mut self, property: PropertyState) -> bool {
        insert_new(&mut self.property_states, property.id, property)
    }

    /// Merge every record of `other` into this model
    pub fn merge(&mut self, other: SystemModel) {
        for app in other.applications.into_values() {
            self.add_application(app);
        }
        for item in other.configuration_items.into_values() {
            self.add_configuration_item(item);
        }
        for link in other
            .item_links
            .into_values()
            .chain(other.application_links.into_values())
        {
            self.add_link(link);
        }
        for installation in other.installations.into_values() {
            self.add_installation(installation);
        }
        for session in other.sessions.into_values() {
            self.add_session(session);
        }
        for state in other.session_states.into_values() {
            self.add_session_state(state);
        }
        for property in other.property_states.into_values() {
            self.add_property_state(property);
        }
    }

    /// Serialize the model as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a model previously produced by [`to_json`](Self::to_json)
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
