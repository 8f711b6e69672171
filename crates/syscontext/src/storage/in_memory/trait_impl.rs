//! SystemStore trait implementation for in-memory storage.

use super::InMemoryStorage;
use crate::domain::{Entity, EntityKind, ForeignKey, Link, LinkKind, RecordId};
use crate::error::Result;
use crate::storage::SystemStore;
use async_trait::async_trait;

#[async_trait]
impl SystemStore for InMemoryStorage {
    async fn save(&self, mut entity: Entity) -> Result<Entity> {
        let mut inner = self.lock().await;

        let id = inner.assign_id(entity.id());
        entity.set_id(id);

        inner
            .records
            .entry(entity.kind())
            .or_default()
            .insert(id, entity.clone());

        Ok(entity)
    }

    async fn delete(&self, kind: EntityKind, id: RecordId) -> Result<bool> {
        let mut inner = self.lock().await;

        let removed = inner
            .records
            .get_mut(&kind)
            .and_then(|records| records.remove(&id));

        Ok(removed.is_some())
    }

    async fn find_by_id(&self, kind: EntityKind, id: RecordId) -> Result<Option<Entity>> {
        let inner = self.lock().await;
        Ok(inner
            .records_of(kind)
            .and_then(|records| records.get(&id))
            .cloned())
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        let inner = self.lock().await;
        Ok(inner
            .records_of(kind)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn references_by(
        &self,
        kind: EntityKind,
        field: ForeignKey,
        id: RecordId,
    ) -> Result<Vec<Entity>> {
        let inner = self.lock().await;
        Ok(inner
            .records_of(kind)
            .map(|records| {
                records
                    .values()
                    .filter(|entity| entity.reference(field) == Some(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn save_link(&self, mut link: Link) -> Result<Link> {
        let mut inner = self.lock().await;

        link.id = inner.assign_id(link.id);
        inner.index_mut(link.kind).insert(link.clone());

        Ok(link)
    }

    async fn delete_link(&self, kind: LinkKind, id: RecordId) -> Result<bool> {
        let mut inner = self.lock().await;
        Ok(inner.index_mut(kind).remove(id).is_some())
    }

    async fn links_from(&self, kind: LinkKind, id: RecordId) -> Result<Vec<Link>> {
        let inner = self.lock().await;
        Ok(inner
            .links
            .get(&kind)
            .map(|index| index.outgoing(id))
            .unwrap_or_default())
    }

    async fn links_to(&self, kind: LinkKind, id: RecordId) -> Result<Vec<Link>> {
        let inner = self.lock().await;
        Ok(inner
            .links
            .get(&kind)
            .map(|index| index.incoming(id))
            .unwrap_or_default())
    }
}
