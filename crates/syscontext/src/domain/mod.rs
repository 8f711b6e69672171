//! Domain types for the system context model.
//!
//! Every entity is a flat record identified by a [`RecordId`]. Relations
//! between records are either foreign-key fields (an item belongs to an
//! application) or independent [`Link`] records (an item is the child of
//! another item, an application depends on another application).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a stored record, unique within its kind.
///
/// The store assigns identifiers on first save; [`RecordId::UNSAVED`] marks a
/// record that has not been saved yet.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Identifier carried by records that were never saved.
    pub const UNSAVED: RecordId = RecordId(0);

    /// Create a record ID from its raw value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value
    pub fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the placeholder of an unsaved record
    pub fn is_unsaved(self) -> bool {
        self == Self::UNSAVED
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Kind of a stored entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    /// Application configuration
    Application,

    /// Configuration item (one key/value node)
    ConfigurationItem,

    /// Installation of an application on a host
    Installation,

    /// Running application session
    Session,

    /// Per (session, configuration item) state group
    SessionState,

    /// One overridden property inside a session state
    PropertyState,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Application => "application",
            EntityKind::ConfigurationItem => "configuration item",
            EntityKind::Installation => "installation",
            EntityKind::Session => "session",
            EntityKind::SessionState => "session state",
            EntityKind::PropertyState => "property state",
        };
        f.write_str(name)
    }
}

/// Kind of a directed link record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkKind {
    /// Parent -> child edge between configuration items
    ConfigurationItem,

    /// Dependent -> dependency edge between applications
    Application,
}

impl LinkKind {
    /// The entity kind both ends of this link refer to
    pub fn node_kind(self) -> EntityKind {
        match self {
            LinkKind::ConfigurationItem => EntityKind::ConfigurationItem,
            LinkKind::Application => EntityKind::Application,
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::ConfigurationItem => f.write_str("configuration item link"),
            LinkKind::Application => f.write_str("application link"),
        }
    }
}

/// Foreign-key field used by `references_by` queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForeignKey {
    /// Owning application (items, installations)
    Application,

    /// Installation a session runs on
    Installation,

    /// Session a session state belongs to
    Session,

    /// Configuration item a session state overlays
    ConfigurationItem,

    /// Session state a property state belongs to
    SessionState,
}

/// An application known to the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Unique identifier
    pub id: RecordId,

    /// Application name
    pub name: String,

    /// Free-form description (optional)
    pub description: Option<String>,
}

impl ApplicationConfig {
    /// Create an unsaved application
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: RecordId::UNSAVED,
            name: name.into(),
            description: None,
        }
    }
}

/// A single key/value node of an application's configuration tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationItem {
    /// Unique identifier
    pub id: RecordId,

    /// Owning application
    pub application: RecordId,

    /// Key segment contributed to dotted paths
    pub item_key: String,

    /// Value recorded for this node
    pub item_value: String,
}

impl ConfigurationItem {
    /// Create an unsaved configuration item owned by `application`
    pub fn new(
        application: RecordId,
        item_key: impl Into<String>,
        item_value: impl Into<String>,
    ) -> Self {
        Self {
            id: RecordId::UNSAVED,
            application,
            item_key: item_key.into(),
            item_value: item_value.into(),
        }
    }
}

/// An application installed on a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInstallation {
    /// Unique identifier
    pub id: RecordId,

    /// Installed application
    pub application: RecordId,

    /// Host name of the computer
    pub host: String,
}

impl ApplicationInstallation {
    /// Create an unsaved installation
    pub fn new(application: RecordId, host: impl Into<String>) -> Self {
        Self {
            id: RecordId::UNSAVED,
            application,
            host: host.into(),
        }
    }
}

/// Lifecycle of an application session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session is running
    Open,

    /// Session has been shut down
    Closed {
        /// Shutdown timestamp
        closed_at: DateTime<Utc>,
    },
}

impl SessionStatus {
    /// Whether the session is still running
    pub fn is_open(&self) -> bool {
        matches!(self, SessionStatus::Open)
    }
}

/// One running instance of an installed application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSession {
    /// Unique identifier
    pub id: RecordId,

    /// Installation this session runs
    pub installation: RecordId,

    /// Start timestamp
    pub started_at: DateTime<Utc>,

    /// Open or closed
    pub status: SessionStatus,
}

impl ApplicationSession {
    /// Create an unsaved, open session
    pub fn open(installation: RecordId, started_at: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::UNSAVED,
            installation,
            started_at,
            status: SessionStatus::Open,
        }
    }

    /// Close the session at `now`.
    ///
    /// Returns `false` if the session was already closed; the original
    /// shutdown timestamp is kept in that case.
    pub fn close(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_open() {
            self.status = SessionStatus::Closed { closed_at: now };
            true
        } else {
            false
        }
    }
}

/// Groups the property overrides of one (session, configuration item) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Unique identifier
    pub id: RecordId,

    /// Owning session
    pub session: RecordId,

    /// Overlaid configuration item
    pub item: RecordId,
}

/// One overridden key/value pair owned by a [`SessionState`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyState {
    /// Unique identifier
    pub id: RecordId,

    /// Owning session state
    pub session_state: RecordId,

    /// Property key
    pub property_key: String,

    /// Current value
    pub property_value: String,

    /// Timestamp of the last write
    pub last_updated: DateTime<Utc>,
}

/// A directed link record between two nodes of the same kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Unique identifier
    pub id: RecordId,

    /// Link kind
    pub kind: LinkKind,

    /// Source node (parent, or dependent application)
    pub source: RecordId,

    /// Destination node (child, or dependency)
    pub destination: RecordId,
}

impl Link {
    /// Create an unsaved link
    pub fn new(kind: LinkKind, source: RecordId, destination: RecordId) -> Self {
        Self {
            id: RecordId::UNSAVED,
            kind,
            source,
            destination,
        }
    }
}

/// Any storable entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Entity {
    /// Application configuration
    Application(ApplicationConfig),

    /// Configuration item
    ConfigurationItem(ConfigurationItem),

    /// Installation
    Installation(ApplicationInstallation),

    /// Application session
    Session(ApplicationSession),

    /// Session state
    SessionState(SessionState),

    /// Property state
    PropertyState(PropertyState),
}

impl Entity {
    /// Kind of this entity
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Application(_) => EntityKind::Application,
            Entity::ConfigurationItem(_) => EntityKind::ConfigurationItem,
            Entity::Installation(_) => EntityKind::Installation,
            Entity::Session(_) => EntityKind::Session,
            Entity::SessionState(_) => EntityKind::SessionState,
            Entity::PropertyState(_) => EntityKind::PropertyState,
        }
    }

    /// Identifier of this entity
    pub fn id(&self) -> RecordId {
        match self {
            Entity::Application(e) => e.id,
            Entity::ConfigurationItem(e) => e.id,
            Entity::Installation(e) => e.id,
            Entity::Session(e) => e.id,
            Entity::SessionState(e) => e.id,
            Entity::PropertyState(e) => e.id,
        }
    }

    /// Replace the identifier, used by stores when assigning IDs
    pub fn set_id(&mut self, id: RecordId) {
        match self {
            Entity::Application(e) => e.id = id,
            Entity::ConfigurationItem(e) => e.id = id,
            Entity::Installation(e) => e.id = id,
            Entity::Session(e) => e.id = id,
            Entity::SessionState(e) => e.id = id,
            Entity::PropertyState(e) => e.id = id,
        }
    }

    /// Value of the given foreign-key field, if this kind carries it
    pub fn reference(&self, field: ForeignKey) -> Option<RecordId> {
        match (self, field) {
            (Entity::ConfigurationItem(e), ForeignKey::Application) => Some(e.application),
            (Entity::Installation(e), ForeignKey::Application) => Some(e.application),
            (Entity::Session(e), ForeignKey::Installation) => Some(e.installation),
            (Entity::SessionState(e), ForeignKey::Session) => Some(e.session),
            (Entity::SessionState(e), ForeignKey::ConfigurationItem) => Some(e.item),
            (Entity::PropertyState(e), ForeignKey::SessionState) => Some(e.session_state),
            _ => None,
        }
    }
}

/// A concrete record type that can travel through the untyped store API.
pub trait Record: Into<Entity> + Clone + Send + Sync + 'static {
    /// Entity kind of this record type
    const KIND: EntityKind;

    /// Identifier of the record
    fn id(&self) -> RecordId;

    /// Extract the record from an entity, `None` if the kind differs
    fn from_entity(entity: Entity) -> Option<Self>;
}

macro_rules! impl_record {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Entity {
            fn from(record: $ty) -> Self {
                Entity::$variant(record)
            }
        }

        impl Record for $ty {
            const KIND: EntityKind = EntityKind::$variant;

            fn id(&self) -> RecordId {
                self.id
            }

            fn from_entity(entity: Entity) -> Option<Self> {
                match entity {
                    Entity::$variant(record) => Some(record),
                    _ => None,
                }
            }
        }
    };
}

impl_record!(ApplicationConfig, Application);
impl_record!(ConfigurationItem, ConfigurationItem);
impl_record!(ApplicationInstallation, Installation);
impl_record!(ApplicationSession, Session);
impl_record!(SessionState, SessionState);
impl_record!(PropertyState, PropertyState);
