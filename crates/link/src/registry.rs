// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Channel membership, transport subscriptions and channel metadata.
//!
//! Membership lives on the [`Session`] and outlives connections. Subscription
//! handles are per connection: they are dropped on disconnect or connection
//! loss and recreated by [`ChannelRegistry::rejoin_all`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use bcn_core::{Channel, ChannelId, ChannelKind};

use crate::config::Config;
use crate::session::Session;
use crate::transport::{RelayTransport, SubscriptionHandle};

#[derive(Debug, Default)]
struct RegistryInner {
    channels: HashMap<ChannelId, Channel>,
    subscriptions: HashMap<ChannelId, SubscriptionHandle>,
    emergency: Option<Vec<ChannelId>>,
}

/// Tracks which channels the session belongs to and what is known about them.
pub struct ChannelRegistry {
    session: Arc<Session>,
    transport: Arc<dyn RelayTransport>,
    fallback: Vec<ChannelId>,
    default_max_message_size: usize,
    inner: Mutex<RegistryInner>,
}

impl ChannelRegistry {
    pub fn new(session: Arc<Session>, transport: Arc<dyn RelayTransport>, config: &Config) -> Self {
        ChannelRegistry {
            session,
            transport,
            fallback: config.emergency.fallback_channels.clone(),
            default_max_message_size: config.dispatch.default_max_message_size,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Joins a channel.
    ///
    /// Membership is always recorded. Returns true when the channel is
    /// subscribed on the live connection after the call; false means the join
    /// is parked until the next reconnect.
    pub async fn join_channel(&self, channel_id: &ChannelId) -> bool {
        if self.session.add_channel(channel_id.clone()) {
            info!(channel = %channel_id, "joined channel");
        }
        if !self.session.is_connected() {
            debug!(channel = %channel_id, "not connected, join recorded for reconnect");
            return false;
        }
        if self.is_subscribed(channel_id) {
            return true;
        }
        self.subscribe(channel_id).await
    }

    /// Leaves a channel. Returns true if the session was a member.
    pub async fn leave_channel(&self, channel_id: &ChannelId) -> bool {
        let was_member = self.session.remove_channel(channel_id);
        let handle = self.lock().subscriptions.remove(channel_id);
        if let Some(handle) = handle {
            if let Err(e) = self.transport.unsubscribe(handle).await {
                warn!(channel = %channel_id, error = %e, "unsubscribe failed");
            }
        }
        if was_member {
            info!(channel = %channel_id, "left channel");
        }
        was_member
    }

    async fn subscribe(&self, channel_id: &ChannelId) -> bool {
        match self.transport.subscribe_to_channel(channel_id).await {
            Ok(handle) => {
                let duplicate = {
                    let mut inner = self.lock();
                    if inner.subscriptions.contains_key(channel_id) {
                        Some(handle)
                    } else {
                        inner.subscriptions.insert(channel_id.clone(), handle);
                        None
                    }
                };
                // A concurrent join won the race.
                if let Some(handle) = duplicate {
                    if let Err(e) = self.transport.unsubscribe(handle).await {
                        debug!(channel = %channel_id, error = %e, "dropping duplicate subscription failed");
                    }
                }
                debug!(channel = %channel_id, "subscribed");
                true
            }
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "subscribe failed, will retry on reconnect");
                false
            }
        }
    }

    /// Subscribes every member channel that has no live subscription.
    ///
    /// Returns the number of channels subscribed by this call.
    pub async fn rejoin_all(&self) -> usize {
        let mut joined = 0;
        for channel_id in self.session.active_channels() {
            if self.is_subscribed(&channel_id) {
                continue;
            }
            if self.subscribe(&channel_id).await {
                joined += 1;
            }
        }
        if joined > 0 {
            info!(channels = joined, "rejoined channels");
        }
        joined
    }

    /// Unsubscribes everything on the transport, keeping membership.
    pub async fn release_all(&self) {
        let handles: Vec<SubscriptionHandle> =
            self.lock().subscriptions.drain().map(|(_, handle)| handle).collect();
        for handle in handles {
            let channel_id = handle.channel_id.clone();
            if let Err(e) = self.transport.unsubscribe(handle).await {
                debug!(channel = %channel_id, error = %e, "unsubscribe during release failed");
            }
        }
    }

    /// Forgets subscription handles that died with the connection.
    pub fn forget_subscriptions(&self) {
        self.lock().subscriptions.clear();
    }

    /// Emergency channel ids, discovered from the relay or from configuration.
    ///
    /// An answer from the relay is cached until
    /// [`ChannelRegistry::refresh_emergency_channels`]. When the relay knows no
    /// emergency channels, the configured fallback set is cached in its place.
    /// A fallback used because the relay was unreachable is not cached.
    pub async fn resolve_emergency_channels(&self) -> Vec<ChannelId> {
        let cached = self.lock().emergency.clone();
        if let Some(cached) = cached {
            return cached;
        }

        if self.session.is_connected() {
            match self.transport.discover_channels(ChannelKind::Emergency).await {
                Ok(channels) => {
                    let ids = if channels.is_empty() {
                        debug!("relay lists no emergency channels, using fallback");
                        self.register_fallback()
                    } else {
                        let ids: Vec<ChannelId> = channels.iter().map(|c| c.id.clone()).collect();
                        for channel in channels {
                            self.register_channel(channel);
                        }
                        ids
                    };
                    self.lock().emergency = Some(ids.clone());
                    return ids;
                }
                Err(e) => warn!(error = %e, "emergency channel discovery failed, using fallback"),
            }
        }

        self.register_fallback()
    }

    fn register_fallback(&self) -> Vec<ChannelId> {
        let mut inner = self.lock();
        for id in &self.fallback {
            inner
                .channels
                .entry(id.clone())
                .or_insert_with(|| Channel::emergency(id.clone()));
        }
        self.fallback.clone()
    }

    /// Drops the cached emergency channel set.
    pub fn refresh_emergency_channels(&self) {
        self.lock().emergency = None;
    }

    /// Records channel metadata, replacing any previous entry.
    pub fn register_channel(&self, channel: Channel) {
        self.lock().channels.insert(channel.id.clone(), channel);
    }

    pub fn channel(&self, channel_id: &ChannelId) -> Option<Channel> {
        self.lock().channels.get(channel_id).cloned()
    }

    /// Size limit for a channel: its registered value, else the configured default.
    pub fn max_message_size(&self, channel_id: &ChannelId) -> usize {
        self.lock()
            .channels
            .get(channel_id)
            .map(|c| c.max_message_size)
            .unwrap_or(self.default_max_message_size)
    }

    pub fn is_subscribed(&self, channel_id: &ChannelId) -> bool {
        self.lock().subscriptions.contains_key(channel_id)
    }

    pub fn active_channels(&self) -> Vec<ChannelId> {
        self.session.active_channels()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
