// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Relay state: channel directory, publish fan-out and the record store.
//!
//! Records are keyed by client id, which makes upserts idempotent: replaying a
//! record that is already stored returns the id it was stored under.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use bcn_core::{
    Channel, ChannelId, ChannelKind, ClientId, Envelope, IdGenerator, KeyValueStore, RemoteId,
    RemoteRecord, Result, SqliteStore, StampClock, SyncRecord, WriteMode,
};

const RECORD_PREFIX: &str = "record/";

/// A message published on a channel, as fanned out to connections.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub channel_id: ChannelId,
    pub envelope: Envelope,
}

/// Outcome of [`RelayState::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// Stored, overwritten, or an identical replay.
    Stored(RemoteId),
    /// A different record exists and the write did not ask to overwrite.
    Conflict(RemoteId),
}

/// Why a publish was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishRejection {
    TooLarge { size: usize, max: usize },
}

/// Shared relay state; cheap to clone.
#[derive(Clone)]
pub struct RelayState {
    inner: Arc<RelayStateInner>,
}

struct RelayStateInner {
    store: Box<dyn KeyValueStore>,
    channels: Mutex<BTreeMap<ChannelId, Channel>>,
    published: broadcast::Sender<Published>,
    stamps: StampClock,
    ids: IdGenerator,
    // Serializes read-compare-write cycles on records.
    records: Mutex<()>,
    next_subscription: AtomicU64,
}

impl RelayState {
    /// Opens state persisted in `data_dir/relay.db`.
    pub fn open(data_dir: &Path, emergency_channels: &[ChannelId]) -> Result<Self> {
        let store = SqliteStore::open(&data_dir.join("relay.db"))?;
        Ok(Self::new(Box::new(store), emergency_channels))
    }

    pub fn new(store: Box<dyn KeyValueStore>, emergency_channels: &[ChannelId]) -> Self {
        let channels = emergency_channels
            .iter()
            .map(|id| (id.clone(), Channel::emergency(id.clone())))
            .collect();
        let (published, _) = broadcast::channel(1024);

        RelayState {
            inner: Arc::new(RelayStateInner {
                store,
                channels: Mutex::new(channels),
                published,
                stamps: StampClock::system(),
                ids: IdGenerator::new(),
                records: Mutex::new(()),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    fn channels(&self) -> std::sync::MutexGuard<'_, BTreeMap<ChannelId, Channel>> {
        self.inner.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds or replaces a channel definition.
    pub fn register_channel(&self, channel: Channel) {
        self.channels().insert(channel.id.clone(), channel);
    }

    /// Returns the channel, creating a standard one on first use.
    pub fn channel(&self, channel_id: &ChannelId) -> Channel {
        self.channels()
            .entry(channel_id.clone())
            .or_insert_with(|| Channel::new(channel_id.clone(), channel_id.as_str()))
            .clone()
    }

    pub fn channels_of(&self, kind: ChannelKind) -> Vec<Channel> {
        self.channels().values().filter(|c| c.kind == kind).cloned().collect()
    }

    /// Fans an envelope out to every connection subscribed to the channel.
    pub fn publish(
        &self,
        channel_id: ChannelId,
        envelope: Envelope,
    ) -> std::result::Result<(), PublishRejection> {
        let channel = self.channel(&channel_id);
        if !channel.accepts(&envelope.content) {
            let size = envelope.content.len();
            return Err(PublishRejection::TooLarge { size, max: channel.max_message_size });
        }
        // No receivers means no subscribers; the message is dropped.
        let _ = self.inner.published.send(Published { channel_id, envelope });
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.inner.published.subscribe()
    }

    pub fn next_subscription_id(&self) -> u64 {
        self.inner.next_subscription.fetch_add(1, Ordering::Relaxed)
    }

    /// Stores a record keyed by its client id.
    pub fn upsert(&self, record: SyncRecord, mode: WriteMode) -> Result<Upsert> {
        let _records = self.inner.records.lock().unwrap_or_else(|e| e.into_inner());

        let remote_id = match self.fetch(&record.client_id)? {
            Some(existing) if existing.payload == record.payload => {
                return Ok(Upsert::Stored(existing.remote_id));
            }
            Some(existing) if mode == WriteMode::Create => {
                return Ok(Upsert::Conflict(existing.remote_id));
            }
            Some(existing) => existing.remote_id,
            None => self.inner.ids.remote_id(self.inner.stamps.next()),
        };

        let stored = RemoteRecord {
            remote_id: remote_id.clone(),
            client_id: record.client_id,
            payload: record.payload,
        };
        let json = serde_json::to_string(&stored)?;
        self.inner.store.set(&record_key(&stored.client_id), &json, None)?;
        Ok(Upsert::Stored(remote_id))
    }

    pub fn fetch(&self, client_id: &ClientId) -> Result<Option<RemoteRecord>> {
        match self.inner.store.get(&record_key(client_id))? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn record_count(&self) -> Result<usize> {
        Ok(self.inner.store.list_by_prefix(RECORD_PREFIX)?.len())
    }
}

fn record_key(client_id: &ClientId) -> String {
    format!("{RECORD_PREFIX}{client_id}")
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
