// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Offline entities and their sync lifecycle.
//!
//! An [`OfflineEntity`] is a record authored locally that still has to reach
//! the remote store. Its [`SyncStatus`] only changes through the guarded
//! transition methods, which keep the invariant that an entity carries a
//! remote id exactly when it is `synced`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::clock::Stamp;
use crate::error::{Error, Result};
use crate::ids::{ClientId, RemoteId};

/// Sync state of an offline entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Waiting for the next reconciliation pass. Initial state.
    Pending,
    /// A remote write is in flight.
    Syncing,
    /// Accepted by the remote store.
    Synced,
    /// The remote store holds a diverging record; needs explicit resolution.
    Conflict,
    /// Rejected or expired; retried on later passes unless expired.
    Failed,
}

impl SyncStatus {
    pub const ALL: [SyncStatus; 5] = [
        SyncStatus::Pending,
        SyncStatus::Syncing,
        SyncStatus::Synced,
        SyncStatus::Conflict,
        SyncStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Failed => "failed",
        }
    }

    /// Check if a transition from this status to target is valid.
    pub fn can_transition_to(&self, target: SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (self, target),
            (Pending, Syncing)
                | (Pending, Failed)
                | (Failed, Syncing)
                | (Failed, Failed)
                | (Syncing, Synced)
                | (Syncing, Conflict)
                | (Syncing, Pending)
                | (Syncing, Failed)
                | (Conflict, Pending)
                | (Conflict, Synced)
        )
    }

    /// Get valid transition targets as a formatted string.
    pub fn valid_targets(&self) -> String {
        let targets: Vec<&str> = SyncStatus::ALL
            .iter()
            .filter(|t| self.can_transition_to(**t))
            .map(|t| t.as_str())
            .collect();
        if targets.is_empty() {
            "(none)".to_string()
        } else {
            targets.join(", ")
        }
    }

    /// Returns true if reconciliation should pick entities in this state up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Failed)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "syncing" => Ok(SyncStatus::Syncing),
            "synced" => Ok(SyncStatus::Synced),
            "conflict" => Ok(SyncStatus::Conflict),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(Error::InvalidStatus(s.to_string())),
        }
    }
}

/// How the remote store should treat an existing record with the same client id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Create, or acknowledge an identical replay; diverging records conflict.
    #[default]
    Create,
    /// Replace whatever the remote holds.
    Overwrite,
}

/// Error text recorded on entities that outlived their time-to-live.
pub const EXPIRED: &str = "expired";

/// A locally-authored record awaiting synchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineEntity {
    pub client_id: ClientId,
    pub payload: serde_json::Value,
    pub status: SyncStatus,
    pub created_at: Stamp,
    pub last_sync_attempt: Option<DateTime<Utc>>,
    pub remote_id: Option<RemoteId>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Remote record this entity collided with, while in `conflict`.
    #[serde(default)]
    pub conflict: Option<RemoteId>,
    #[serde(default)]
    pub write_mode: WriteMode,
}

impl OfflineEntity {
    pub fn new(client_id: ClientId, payload: serde_json::Value, created_at: Stamp) -> Self {
        OfflineEntity {
            client_id,
            payload,
            status: SyncStatus::Pending,
            created_at,
            last_sync_attempt: None,
            remote_id: None,
            attempts: 0,
            last_error: None,
            conflict: None,
            write_mode: WriteMode::Create,
        }
    }

    fn transition(&mut self, to: SyncStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
                valid_targets: self.status.valid_targets(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// `pending|failed → syncing`.
    pub fn begin_sync(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(SyncStatus::Syncing)?;
        self.attempts = self.attempts.saturating_add(1);
        self.last_sync_attempt = Some(at);
        Ok(())
    }

    /// `syncing|conflict → synced`.
    pub fn mark_synced(&mut self, remote_id: RemoteId) -> Result<()> {
        self.transition(SyncStatus::Synced)?;
        self.remote_id = Some(remote_id);
        self.conflict = None;
        self.last_error = None;
        self.write_mode = WriteMode::Create;
        Ok(())
    }

    /// `syncing → conflict`.
    pub fn mark_conflict(&mut self, remote: Option<RemoteId>) -> Result<()> {
        self.transition(SyncStatus::Conflict)?;
        self.conflict = remote;
        Ok(())
    }

    /// `syncing|conflict → pending`.
    pub fn mark_pending(&mut self, error: Option<String>) -> Result<()> {
        self.transition(SyncStatus::Pending)?;
        self.last_error = error;
        self.conflict = None;
        Ok(())
    }

    /// `pending|syncing|failed → failed`.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(SyncStatus::Failed)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Returns true if this unsynced entity is older than `ttl_ms`.
    pub fn is_expired(&self, now_ms: u64, ttl_ms: u64) -> bool {
        self.status != SyncStatus::Synced && self.created_at.age_ms(now_ms) > ttl_ms
    }

    /// Returns true if the entity was marked as expired.
    pub fn expired_marker(&self) -> bool {
        self.status == SyncStatus::Failed && self.last_error.as_deref() == Some(EXPIRED)
    }

    /// Checks the remote id invariant.
    pub fn validate(&self) -> Result<()> {
        let synced = self.status == SyncStatus::Synced;
        if synced != self.remote_id.is_some() {
            return Err(Error::CorruptedData(format!(
                "entity {} is {} with remote id {:?}",
                self.client_id, self.status, self.remote_id
            )));
        }
        Ok(())
    }
}

/// A record as exchanged with the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub client_id: ClientId,
    pub payload: serde_json::Value,
}

impl From<&OfflineEntity> for SyncRecord {
    fn from(entity: &OfflineEntity) -> Self {
        SyncRecord { client_id: entity.client_id.clone(), payload: entity.payload.clone() }
    }
}

/// A record held by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub remote_id: RemoteId,
    pub client_id: ClientId,
    pub payload: serde_json::Value,
}

#[cfg(test)]
#[path = "entity_tests.rs"]
mod tests;
