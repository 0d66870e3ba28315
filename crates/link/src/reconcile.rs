// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Replays offline entities against the remote store.
//!
//! Entities are processed oldest first. Upserts are keyed by client id, so a
//! replay after a crash or timeout never creates a second remote record. A
//! transient failure ends the pass: later entities must not overtake an
//! earlier one that is still unsynced.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use bcn_core::{entity::EXPIRED, ClientId, OfflineEntity, SyncRecord, SyncStatus, WriteMode};

use crate::error::{Error, Result};
use crate::offline::OfflineStore;
use crate::transport::{RemoteError, RemoteStore, TransportError};

/// How to settle an entity in `conflict`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictResolution {
    /// Push the local payload over the remote record.
    KeepLocal,
    /// Adopt the remote record.
    KeepRemote,
    /// Push a merged payload over the remote record.
    Merge(serde_json::Value),
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub synced: Vec<ClientId>,
    pub conflicts: Vec<ClientId>,
    pub failed: Vec<ClientId>,
    pub expired: Vec<ClientId>,
    /// Entities left for the next pass after a transient failure.
    pub deferred: usize,
    /// The pass stopped early on a transient failure.
    pub interrupted: bool,
    /// Another pass was already running.
    pub skipped: bool,
}

impl ReconcileReport {
    /// Returns [`Error::Conflict`] for the first entity that hit a conflict.
    pub fn ensure_no_conflicts(&self) -> Result<()> {
        match self.conflicts.first() {
            Some(client_id) => Err(Error::Conflict { client_id: client_id.clone(), remote_id: None }),
            None => Ok(()),
        }
    }
}

/// Drives offline entities through the sync state machine.
pub struct SyncReconciler {
    offline: Arc<OfflineStore>,
    remote: Arc<dyn RemoteStore>,
    entity_ttl: Option<Duration>,
    gate: tokio::sync::Mutex<()>,
}

impl SyncReconciler {
    pub fn new(offline: Arc<OfflineStore>, remote: Arc<dyn RemoteStore>, entity_ttl: Option<Duration>) -> Self {
        SyncReconciler { offline, remote, entity_ttl, gate: tokio::sync::Mutex::new(()) }
    }

    /// Runs one reconciliation pass.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let Ok(_gate) = self.gate.try_lock() else {
            debug!("reconcile already running");
            return Ok(ReconcileReport { skipped: true, ..Default::default() });
        };

        self.recover_interrupted()?;

        let candidates: Vec<OfflineEntity> = self
            .offline
            .all()?
            .into_iter()
            .filter(|e| e.status.is_retryable() && !e.expired_marker())
            .collect();

        let mut report = ReconcileReport::default();
        let now_ms = self.offline.stamps().now_ms();

        for (index, entity) in candidates.iter().enumerate() {
            if let Some(ttl) = self.entity_ttl {
                if entity.is_expired(now_ms, ttl.as_millis() as u64) {
                    self.offline.update(&entity.client_id, |e| e.mark_failed(EXPIRED))?;
                    info!(client_id = %entity.client_id, "offline entity expired");
                    report.expired.push(entity.client_id.clone());
                    continue;
                }
            }

            let entity = self.offline.update(&entity.client_id, |e| e.begin_sync(Utc::now()))?;
            let client_id = entity.client_id.clone();

            match self.remote.upsert(SyncRecord::from(&entity), entity.write_mode).await {
                Ok(remote_id) => {
                    debug!(%client_id, %remote_id, "entity synced");
                    self.offline.update(&client_id, |e| e.mark_synced(remote_id))?;
                    self.offline.record_success(Utc::now())?;
                    report.synced.push(client_id);
                }
                Err(RemoteError::Conflict { remote_id }) => {
                    warn!(%client_id, %remote_id, "entity conflicts with remote record");
                    self.offline.update(&client_id, |e| e.mark_conflict(Some(remote_id)))?;
                    report.conflicts.push(client_id);
                }
                Err(RemoteError::Rejected(reason)) => {
                    warn!(%client_id, reason = %reason, "entity rejected by remote");
                    self.offline.update(&client_id, |e| e.mark_failed(reason))?;
                    report.failed.push(client_id);
                }
                Err(RemoteError::Unavailable(e)) => {
                    debug!(%client_id, error = %e, "remote unavailable, pass stopped");
                    self.offline.update(&client_id, |en| en.mark_pending(Some(e.to_string())))?;
                    report.interrupted = true;
                    report.deferred = candidates.len() - index;
                    break;
                }
            }
        }

        if !report.synced.is_empty() || report.interrupted {
            info!(
                synced = report.synced.len(),
                conflicts = report.conflicts.len(),
                failed = report.failed.len(),
                deferred = report.deferred,
                "reconcile pass finished"
            );
        }
        Ok(report)
    }

    /// Entities left in `syncing` by a pass that never finished go back to `pending`.
    fn recover_interrupted(&self) -> Result<()> {
        for entity in self.offline.get_by_status(SyncStatus::Syncing)? {
            debug!(client_id = %entity.client_id, "recovering interrupted sync");
            self.offline
                .update(&entity.client_id, |e| e.mark_pending(Some("interrupted".to_string())))?;
        }
        Ok(())
    }

    /// Settles an entity in `conflict`.
    pub async fn resolve_conflict(
        &self,
        client_id: &ClientId,
        resolution: ConflictResolution,
    ) -> Result<OfflineEntity> {
        let entity = self
            .offline
            .get(client_id)?
            .ok_or_else(|| Error::EntityNotFound(client_id.clone()))?;
        if entity.status != SyncStatus::Conflict {
            return Err(bcn_core::Error::InvalidTransition {
                from: entity.status.to_string(),
                to: "resolved".to_string(),
                valid_targets: "only conflict entities can be resolved".to_string(),
            }
            .into());
        }

        let resolved = match resolution {
            ConflictResolution::KeepLocal => self.offline.update(client_id, |e| {
                e.mark_pending(None)?;
                e.write_mode = WriteMode::Overwrite;
                Ok(())
            })?,
            ConflictResolution::Merge(payload) => self.offline.update(client_id, |e| {
                e.mark_pending(None)?;
                e.payload = payload;
                e.write_mode = WriteMode::Overwrite;
                Ok(())
            })?,
            ConflictResolution::KeepRemote => match self.remote.fetch(client_id).await {
                Ok(Some(record)) => self.offline.update(client_id, |e| {
                    e.payload = record.payload;
                    e.mark_synced(record.remote_id)
                })?,
                Ok(None) => {
                    debug!(%client_id, "remote record vanished, entity back to pending");
                    self.offline.update(client_id, |e| e.mark_pending(None))?
                }
                Err(RemoteError::Unavailable(e)) => return Err(Error::TransientNetwork(e)),
                Err(RemoteError::Conflict { remote_id }) => {
                    return Err(Error::Conflict { client_id: client_id.clone(), remote_id: Some(remote_id) })
                }
                Err(RemoteError::Rejected(reason)) => {
                    return Err(Error::TransientNetwork(TransportError::Rejected(reason)))
                }
            },
        };

        info!(%client_id, status = %resolved.status, "conflict resolved");
        Ok(resolved)
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
