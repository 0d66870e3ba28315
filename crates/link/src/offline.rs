// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Durable store of locally-authored entities awaiting synchronization.
//!
//! Entities are kept as JSON under `offline/<client id>`; the time of the last
//! successful sync under `sync/last_success`. Entities are never deleted
//! automatically.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use bcn_core::{ClientId, IdGenerator, KeyValueStore, OfflineEntity, StampClock, SyncStatus};

use crate::error::{Error, Result};

/// Key prefix for offline entities.
pub const ENTITY_PREFIX: &str = "offline/";

/// Key holding the last successful sync time.
pub const LAST_SUCCESS_KEY: &str = "sync/last_success";

fn entity_key(client_id: &ClientId) -> String {
    format!("{ENTITY_PREFIX}{client_id}")
}

/// Entity counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub pending: usize,
    pub syncing: usize,
    pub synced: usize,
    pub conflict: usize,
    pub failed: usize,
    pub last_successful_sync: Option<DateTime<Utc>>,
}

impl SyncStats {
    pub fn total(&self) -> usize {
        self.pending + self.syncing + self.synced + self.conflict + self.failed
    }
}

/// Offline entity storage on top of a [`KeyValueStore`].
pub struct OfflineStore {
    store: Arc<dyn KeyValueStore>,
    stamps: Arc<StampClock>,
    ids: Arc<IdGenerator>,
    // Serializes read-modify-write cycles.
    write: Mutex<()>,
}

impl OfflineStore {
    pub fn new(store: Arc<dyn KeyValueStore>, stamps: Arc<StampClock>, ids: Arc<IdGenerator>) -> Self {
        OfflineStore { store, stamps, ids, write: Mutex::new(()) }
    }

    /// Creates and persists a `pending` entity.
    pub fn create(&self, payload: serde_json::Value) -> Result<OfflineEntity> {
        let created_at = self.stamps.next();
        let entity = OfflineEntity::new(self.ids.client_id(created_at), payload, created_at);
        self.put(&entity)?;
        debug!(client_id = %entity.client_id, "offline entity created");
        Ok(entity)
    }

    pub fn get(&self, client_id: &ClientId) -> Result<Option<OfflineEntity>> {
        match self.store.get(&entity_key(client_id))? {
            Some(json) => Ok(Some(decode(&json)?)),
            None => Ok(None),
        }
    }

    fn put(&self, entity: &OfflineEntity) -> Result<()> {
        entity.validate()?;
        let json = serde_json::to_string(entity).map_err(bcn_core::Error::from)?;
        self.store.set(&entity_key(&entity.client_id), &json, None)?;
        Ok(())
    }

    /// Applies `f` to a stored entity and persists the result.
    ///
    /// Nothing is written when `f` fails.
    pub fn update(
        &self,
        client_id: &ClientId,
        f: impl FnOnce(&mut OfflineEntity) -> bcn_core::Result<()>,
    ) -> Result<OfflineEntity> {
        let _write = self.write.lock().unwrap_or_else(|e| e.into_inner());
        let mut entity = self
            .get(client_id)?
            .ok_or_else(|| Error::EntityNotFound(client_id.clone()))?;
        f(&mut entity)?;
        self.put(&entity)?;
        Ok(entity)
    }

    /// All entities in creation order.
    pub fn all(&self) -> Result<Vec<OfflineEntity>> {
        let mut entities = self
            .store
            .list_by_prefix(ENTITY_PREFIX)?
            .into_iter()
            .map(|(_, json)| decode(&json))
            .collect::<Result<Vec<_>>>()?;
        entities.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entities)
    }

    pub fn get_by_status(&self, status: SyncStatus) -> Result<Vec<OfflineEntity>> {
        Ok(self.all()?.into_iter().filter(|e| e.status == status).collect())
    }

    /// Removes an entity. Returns true if it existed.
    pub fn delete(&self, client_id: &ClientId) -> Result<bool> {
        let _write = self.write.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.store.delete(&entity_key(client_id))?)
    }

    pub fn last_successful_sync(&self) -> Result<Option<DateTime<Utc>>> {
        match self.store.get(LAST_SUCCESS_KEY)? {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| bcn_core::Error::CorruptedData(format!("{LAST_SUCCESS_KEY}: {e}")).into()),
            None => Ok(None),
        }
    }

    pub fn record_success(&self, at: DateTime<Utc>) -> Result<()> {
        self.store.set(LAST_SUCCESS_KEY, &at.to_rfc3339(), None)?;
        Ok(())
    }

    pub fn stats(&self) -> Result<SyncStats> {
        let mut stats = SyncStats { last_successful_sync: self.last_successful_sync()?, ..Default::default() };
        for entity in self.all()? {
            match entity.status {
                SyncStatus::Pending => stats.pending += 1,
                SyncStatus::Syncing => stats.syncing += 1,
                SyncStatus::Synced => stats.synced += 1,
                SyncStatus::Conflict => stats.conflict += 1,
                SyncStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    pub(crate) fn stamps(&self) -> &StampClock {
        &self.stamps
    }
}

fn decode(json: &str) -> Result<OfflineEntity> {
    let entity: OfflineEntity = serde_json::from_str(json).map_err(bcn_core::Error::from)?;
    Ok(entity)
}

#[cfg(test)]
#[path = "offline_tests.rs"]
mod tests;
