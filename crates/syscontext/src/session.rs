//! Session-scoped property overlay.
//!
//! A running [`ApplicationSession`](crate::domain::ApplicationSession) can
//! publish key/value state for any configuration item. The values live in
//! [`PropertyState`] records grouped by one [`SessionState`] per
//! (session, item) pair; the group is created on the first write.
//!
//! # Concurrency
//!
//! [`SessionStateStore::upsert_property`] is a find-or-create followed by an
//! overwrite. Calls for the same (session, item) pair are serialized with a
//! per-pair async mutex so two writers cannot both create a group or both
//! append the same key. Different pairs never wait on each other. A pair's
//! mutex is dropped once no call holds or waits for it.

use crate::domain::{ForeignKey, PropertyState, RecordId, SessionState};
use crate::error::Result;
use crate::storage::{fetch_referencing, store, SystemStore};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Current overlay of one (session, item) pair: property key -> value
pub type ItemState = IndexMap<String, String>;

type PairLocks = HashMap<(RecordId, RecordId), Arc<Mutex<()>>>;

/// Per-session, per-configuration-item property store with upsert semantics.
pub struct SessionStateStore {
    store: Arc<dyn SystemStore>,
    locks: Mutex<PairLocks>,
}

impl std::fmt::Debug for SessionStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStateStore")
            .field("store", &"<dyn SystemStore>")
            .finish()
    }
}

/// Property keys compare case-insensitively.
fn keys_match(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

impl SessionStateStore {
    /// Create an overlay store on top of `store`
    pub fn new(store: Arc<dyn SystemStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn pair_lock(&self, session: RecordId, item: RecordId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry((session, item)).or_default().clone()
    }

    /// Release a handle from [`pair_lock`](Self::pair_lock), removing the
    /// entry when no other call holds a handle.
    async fn release_pair_lock(&self, session: RecordId, item: RecordId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        let unused = locks
            .get(&(session, item))
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) == 2);
        if unused {
            locks.remove(&(session, item));
        }
    }

    #[cfg(test)]
    async fn tracked_pairs(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn find_state(&self, session: RecordId, item: RecordId) -> Result<Option<SessionState>> {
        let states = self.session_states(session).await?;
        Ok(states.into_iter().find(|state| state.item == item))
    }

    /// Set `key` to `value` for `item` within `session`.
    ///
    /// Creates the session state group on first use. An existing property
    /// whose key matches case-insensitively is overwritten in place (its
    /// original spelling is kept); otherwise a new property is created.
    /// `last_updated` is set to `now` either way.
    ///
    /// The session and item IDs are not checked for existence.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the store fails. Nothing is retried.
    pub async fn upsert_property(
        &self,
        session: RecordId,
        item: RecordId,
        key: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<PropertyState> {
        let lock = self.pair_lock(session, item).await;
        let result = {
            let _guard = lock.lock().await;
            self.upsert_locked(session, item, key, value, now).await
        };
        self.release_pair_lock(session, item, lock).await;
        result
    }

    async fn upsert_locked(
        &self,
        session: RecordId,
        item: RecordId,
        key: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<PropertyState> {
        let state = match self.find_state(session, item).await? {
            Some(state) => state,
            None => {
                tracing::debug!(session = %session, item = %item, "creating session state");
                store(
                    self.store.as_ref(),
                    SessionState {
                        id: RecordId::UNSAVED,
                        session,
                        item,
                    },
                )
                .await?
            }
        };

        let existing = self
            .property_states(state.id)
            .await?
            .into_iter()
            .find(|property| keys_match(&property.property_key, key));

        let property = match existing {
            Some(mut property) => {
                property.property_value = value.to_string();
                property.last_updated = now;
                property
            }
            None => PropertyState {
                id: RecordId::UNSAVED,
                session_state: state.id,
                property_key: key.to_string(),
                property_value: value.to_string(),
                last_updated: now,
            },
        };

        let saved = store(self.store.as_ref(), property).await?;
        tracing::debug!(
            session = %session,
            item = %item,
            key = %saved.property_key,
            "session property updated"
        );
        Ok(saved)
    }

    /// Current overlay values of `item` within `session`.
    ///
    /// Empty if the session never wrote state for the item.
    pub async fn get_item_state(&self, item: RecordId, session: RecordId) -> Result<ItemState> {
        let Some(state) = self.find_state(session, item).await? else {
            return Ok(ItemState::new());
        };

        Ok(self
            .property_states(state.id)
            .await?
            .into_iter()
            .map(|property| (property.property_key, property.property_value))
            .collect())
    }

    /// Value of one overlay property, `None` when unset.
    ///
    /// Keys match case-insensitively, like in [`upsert_property`](Self::upsert_property).
    pub async fn get_property_state(
        &self,
        key: &str,
        item: RecordId,
        session: RecordId,
    ) -> Result<Option<String>> {
        let state = self.get_item_state(item, session).await?;
        Ok(state
            .into_iter()
            .find(|(property_key, _)| keys_match(property_key, key))
            .map(|(_, value)| value))
    }

    /// All session state groups of a session
    pub async fn session_states(&self, session: RecordId) -> Result<Vec<SessionState>> {
        fetch_referencing(self.store.as_ref(), ForeignKey::Session, session).await
    }

    /// All properties of one session state group
    pub async fn property_states(&self, session_state: RecordId) -> Result<Vec<PropertyState>> {
        fetch_referencing(self.store.as_ref(), ForeignKey::SessionState, session_state).await
    }
}
