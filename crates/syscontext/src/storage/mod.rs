//! Storage abstraction layer for syscontext.
//!
//! The graph resolution core never talks to a database directly. It consumes
//! the [`SystemStore`] trait, a kind-parameterized record store with indexed
//! link queries. One backend ships with the crate:
//!
//! - **In-memory**: records in ordered maps, links indexed with petgraph
//!
//! # Architecture
//!
//! The trait is async so that database-backed implementations can do real
//! I/O, and object-safe so contexts can hold an `Arc<dyn SystemStore>`. All
//! methods take `&self`; implementations use interior mutability, which lets
//! several tasks share one store.
//!
//! The untyped API moves [`Entity`] values around. The helpers [`fetch`],
//! [`fetch_all`] and [`fetch_referencing`] convert them into concrete
//! [`Record`] types.
//!
//! # Test Utilities
//!
//! With the `test-util` feature (or under `cfg(test)`), [`FailingStorage`] is
//! available: a store whose every call fails, for checking that storage
//! failures propagate instead of being swallowed.
//!
//! # Example
//!
//! ```no_run
//! use syscontext::domain::{ApplicationConfig, ConfigurationItem};
//! use syscontext::storage::{fetch, in_memory::new_in_memory_storage};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = new_in_memory_storage();
//!
//!     let app = storage.save(ApplicationConfig::new("shop").into()).await?;
//!     let item = storage
//!         .save(ConfigurationItem::new(app.id(), "theme", "dark").into())
//!         .await?;
//!
//!     let loaded: Option<ConfigurationItem> = fetch(storage.as_ref(), item.id()).await?;
//!     println!("{:?}", loaded);
//!     Ok(())
//! }
//! ```

use crate::domain::{Entity, EntityKind, ForeignKey, Link, LinkKind, Record, RecordId};
use crate::error::{Error, Result};
use async_trait::async_trait;

pub mod in_memory;

/// Record store consumed by the graph resolution core.
///
/// # Method Categories
///
/// - **Records**: `save`, `delete`, `find_by_id`, `list`, `references_by`
/// - **Links**: `save_link`, `delete_link`, `links_from`, `links_to`
///
/// # Error Handling
///
/// Lookups that find nothing return `Ok(None)` or an empty `Vec`, never an
/// error. `Error::Storage` signals a failure of the backend itself.
///
/// # Ordering
///
/// Sequences are returned in a backend-defined order. Callers relying on
/// "first" results (root search, parent selection) get whatever the backend
/// returns first.
#[async_trait]
pub trait SystemStore: Send + Sync {
    // ========== Records ==========

    /// Insert or replace a record.
    ///
    /// An entity carrying [`RecordId::UNSAVED`] receives a fresh ID. Returns
    /// the stored entity with its final ID.
    async fn save(&self, entity: Entity) -> Result<Entity>;

    /// Delete a record. Returns `false` if it did not exist.
    ///
    /// Links and records referencing the deleted one are left in place;
    /// readers must tolerate the dangling IDs.
    async fn delete(&self, kind: EntityKind, id: RecordId) -> Result<bool>;

    /// Get a record by kind and ID.
    async fn find_by_id(&self, kind: EntityKind, id: RecordId) -> Result<Option<Entity>>;

    /// List all records of a kind.
    async fn list(&self, kind: EntityKind) -> Result<Vec<Entity>>;

    /// List records of `kind` whose `field` equals `id`.
    async fn references_by(
        &self,
        kind: EntityKind,
        field: ForeignKey,
        id: RecordId,
    ) -> Result<Vec<Entity>>;

    // ========== Links ==========

    /// Insert or replace a link record, assigning an ID if unsaved.
    async fn save_link(&self, link: Link) -> Result<Link>;

    /// Delete a link record. Returns `false` if it did not exist.
    async fn delete_link(&self, kind: LinkKind, id: RecordId) -> Result<bool>;

    /// Links of `kind` whose source is `id` (outgoing edges).
    async fn links_from(&self, kind: LinkKind, id: RecordId) -> Result<Vec<Link>>;

    /// Links of `kind` whose destination is `id` (incoming edges).
    async fn links_to(&self, kind: LinkKind, id: RecordId) -> Result<Vec<Link>>;
}

fn into_record<R: Record>(entity: Entity) -> Result<R> {
    let found = entity.kind();
    R::from_entity(entity).ok_or(Error::KindMismatch {
        expected: R::KIND,
        found,
    })
}

/// Save a typed record and return it with its assigned ID.
pub async fn store<R: Record>(storage: &dyn SystemStore, record: R) -> Result<R> {
    let saved = storage.save(record.into()).await?;
    into_record(saved)
}

/// Get a typed record by ID.
pub async fn fetch<R: Record>(storage: &dyn SystemStore, id: RecordId) -> Result<Option<R>> {
    storage
        .find_by_id(R::KIND, id)
        .await?
        .map(into_record)
        .transpose()
}

/// List all records of a type.
pub async fn fetch_all<R: Record>(storage: &dyn SystemStore) -> Result<Vec<R>> {
    storage
        .list(R::KIND)
        .await?
        .into_iter()
        .map(into_record)
        .collect()
}

/// List records of a type whose foreign key `field` equals `id`.
pub async fn fetch_referencing<R: Record>(
    storage: &dyn SystemStore,
    field: ForeignKey,
    id: RecordId,
) -> Result<Vec<R>> {
    storage
        .references_by(R::KIND, field, id)
        .await?
        .into_iter()
        .map(into_record)
        .collect()
}

// ========== Test Utilities ==========

/// Store double whose every operation fails with `Error::Storage`.
///
/// # Availability
///
/// This type is available when:
/// - Running tests (`#[cfg(test)]`)
/// - The `test-util` feature is enabled
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct FailingStorage;

#[cfg(any(test, feature = "test-util"))]
impl FailingStorage {
    /// Create a new FailingStorage instance.
    pub fn new() -> Self {
        Self
    }

    fn failure<T>(operation: &str) -> Result<T> {
        Err(Error::Storage(format!("{} failed: backend unavailable", operation)))
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl SystemStore for FailingStorage {
    async fn save(&self, _entity: Entity) -> Result<Entity> {
        Self::failure("save")
    }

    async fn delete(&self, _kind: EntityKind, _id: RecordId) -> Result<bool> {
        Self::failure("delete")
    }

    async fn find_by_id(&self, _kind: EntityKind, _id: RecordId) -> Result<Option<Entity>> {
        Self::failure("find_by_id")
    }

    async fn list(&self, _kind: EntityKind) -> Result<Vec<Entity>> {
        Self::failure("list")
    }

    async fn references_by(
        &self,
        _kind: EntityKind,
        _field: ForeignKey,
        _id: RecordId,
    ) -> Result<Vec<Entity>> {
        Self::failure("references_by")
    }

    async fn save_link(&self, _link: Link) -> Result<Link> {
        Self::failure("save_link")
    }

    async fn delete_link(&self, _kind: LinkKind, _id: RecordId) -> Result<bool> {
        Self::failure("delete_link")
    }

    async fn links_from(&self, _kind: LinkKind, _id: RecordId) -> Result<Vec<Link>> {
        Self::failure("links_from")
    }

    async fn links_to(&self, _kind: LinkKind, _id: RecordId) -> Result<Vec<Link>> {
        Self::failure("links_to")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ApplicationConfig, ConfigurationItem};

    #[tokio::test]
    async fn test_failing_storage_is_object_safe() {
        let storage: Box<dyn SystemStore> = Box::new(FailingStorage::new());
        let result = storage.list(EntityKind::Application).await;
        assert!(matches!(result, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let storage = in_memory::new_in_memory_storage();

        let app = store(storage.as_ref(), ApplicationConfig::new("shop"))
            .await
            .unwrap();
        assert!(!app.id.is_unsaved());

        let item = store(
            storage.as_ref(),
            ConfigurationItem::new(app.id, "theme", "dark"),
        )
        .await
        .unwrap();

        let loaded: Option<ConfigurationItem> = fetch(storage.as_ref(), item.id).await.unwrap();
        assert_eq!(loaded, Some(item.clone()));

        let owned: Vec<ConfigurationItem> =
            fetch_referencing(storage.as_ref(), ForeignKey::Application, app.id)
                .await
                .unwrap();
        assert_eq!(owned, vec![item]);

        let apps: Vec<ApplicationConfig> = fetch_all(storage.as_ref()).await.unwrap();
        assert_eq!(apps.len(), 1);
    }
}
