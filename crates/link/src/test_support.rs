// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory relay double for unit tests.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use bcn_core::{
    Channel, ChannelId, ChannelKind, ClientId, Envelope, InboundMessage, KeyValueStore, RemoteId,
    RemoteRecord, SyncRecord, WriteMode,
};

use crate::config::Config;
use crate::transport::{
    BoxFuture, RelayTransport, RemoteError, RemoteStore, SubscriptionHandle, TransportError,
    TransportEvent, TransportResult,
};

#[derive(Default)]
struct MockState {
    connected: bool,
    connect_calls: u32,
    connect_failures: u32,
    connect_always_fails: bool,
    connect_delay: Option<Duration>,
    publish_delay: Option<Duration>,
    publish_failures: u32,
    publish_always_fails: bool,
    published: Vec<(ChannelId, Envelope)>,
    subscribe_fails: bool,
    subscribe_calls: Vec<ChannelId>,
    subscriptions: Vec<SubscriptionHandle>,
    next_subscription: u64,
    unsubscribed: Vec<SubscriptionHandle>,
    emergency_channels: Option<Vec<Channel>>,
    discover_calls: u32,
    records: HashMap<ClientId, RemoteRecord>,
    next_remote: u64,
    upserts: Vec<(SyncRecord, WriteMode)>,
    remote_script: VecDeque<RemoteError>,
}

/// Scriptable relay implementing both transport seams.
pub struct MockRelay {
    state: Mutex<MockState>,
    events: broadcast::Sender<TransportEvent>,
}

impl MockRelay {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(MockRelay {
            state: Mutex::new(MockState { emergency_channels: Some(Vec::new()), ..Default::default() }),
            events,
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn fail_next_connects(&self, n: u32) {
        self.state().connect_failures = n;
    }

    pub fn set_connect_fails(&self, fails: bool) {
        self.state().connect_always_fails = fails;
    }

    /// Makes every connect take `delay` before it resolves.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state().connect_delay = Some(delay);
    }

    /// Makes every publish take `delay` before it resolves.
    pub fn set_publish_delay(&self, delay: Duration) {
        self.state().publish_delay = Some(delay);
    }

    pub fn fail_next_publishes(&self, n: u32) {
        self.state().publish_failures = n;
    }

    pub fn set_publish_fails(&self, fails: bool) {
        self.state().publish_always_fails = fails;
    }

    pub fn set_subscribe_fails(&self, fails: bool) {
        self.state().subscribe_fails = fails;
    }

    /// `None` makes discovery fail.
    pub fn set_emergency_channels(&self, channels: Option<Vec<Channel>>) {
        self.state().emergency_channels = channels;
    }

    /// Queues an error returned by the next remote store call.
    pub fn push_remote_error(&self, error: RemoteError) {
        self.state().remote_script.push_back(error);
    }

    pub fn insert_record(&self, record: RemoteRecord) {
        self.state().records.insert(record.client_id.clone(), record);
    }

    pub fn remove_record(&self, client_id: &ClientId) {
        self.state().records.remove(client_id);
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn connect_calls(&self) -> u32 {
        self.state().connect_calls
    }

    pub fn published(&self) -> Vec<(ChannelId, Envelope)> {
        self.state().published.clone()
    }

    pub fn published_on(&self, channel_id: &ChannelId) -> Vec<Envelope> {
        self.state()
            .published
            .iter()
            .filter(|(c, _)| c == channel_id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn subscribe_calls(&self) -> Vec<ChannelId> {
        self.state().subscribe_calls.clone()
    }

    pub fn subscribed_channels(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> =
            self.state().subscriptions.iter().map(|h| h.channel_id.clone()).collect();
        ids.sort();
        ids
    }

    pub fn unsubscribed(&self) -> Vec<SubscriptionHandle> {
        self.state().unsubscribed.clone()
    }

    pub fn discover_calls(&self) -> u32 {
        self.state().discover_calls
    }

    pub fn upserts(&self) -> Vec<(SyncRecord, WriteMode)> {
        self.state().upserts.clone()
    }

    pub fn records(&self) -> Vec<RemoteRecord> {
        self.state().records.values().cloned().collect()
    }

    /// Simulates the relay dropping the connection.
    pub fn drop_connection(&self, reason: &str) {
        {
            let mut state = self.state();
            state.connected = false;
            state.subscriptions.clear();
        }
        let _ = self.events.send(TransportEvent::ConnectionLost { reason: reason.to_string() });
    }

    /// Simulates a message arriving on a subscribed channel.
    pub fn deliver(&self, channel_id: &ChannelId, envelope: Envelope) {
        let _ = self.events.send(TransportEvent::Message(InboundMessage {
            channel_id: channel_id.clone(),
            envelope,
        }));
    }
}

impl RelayTransport for MockRelay {
    fn connect(&self) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            let delay = {
                let mut state = self.state();
                state.connect_calls += 1;
                state.connect_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut state = self.state();
            if state.connect_always_fails {
                return Err(TransportError::ConnectionFailed("mock refused".into()));
            }
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(TransportError::ConnectionFailed("mock refused".into()));
            }
            state.connected = true;
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            let mut state = self.state();
            state.connected = false;
            state.subscriptions.clear();
            Ok(())
        })
    }

    fn publish(&self, channel_id: &ChannelId, envelope: Envelope) -> BoxFuture<'_, TransportResult<()>> {
        let channel_id = channel_id.clone();
        Box::pin(async move {
            let delay = self.state().publish_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut state = self.state();
            if !state.connected {
                return Err(TransportError::ConnectionClosed);
            }
            if state.publish_always_fails {
                return Err(TransportError::SendFailed("mock publish failure".into()));
            }
            if state.publish_failures > 0 {
                state.publish_failures -= 1;
                return Err(TransportError::SendFailed("mock publish failure".into()));
            }
            state.published.push((channel_id, envelope));
            Ok(())
        })
    }

    fn subscribe_to_channel(
        &self,
        channel_id: &ChannelId,
    ) -> BoxFuture<'_, TransportResult<SubscriptionHandle>> {
        let channel_id = channel_id.clone();
        Box::pin(async move {
            let mut state = self.state();
            state.subscribe_calls.push(channel_id.clone());
            if !state.connected {
                return Err(TransportError::ConnectionClosed);
            }
            if state.subscribe_fails {
                return Err(TransportError::Rejected("mock subscribe failure".into()));
            }
            state.next_subscription += 1;
            let handle = SubscriptionHandle { id: state.next_subscription, channel_id };
            state.subscriptions.push(handle.clone());
            Ok(handle)
        })
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            let mut state = self.state();
            state.subscriptions.retain(|h| h.id != handle.id);
            state.unsubscribed.push(handle);
            Ok(())
        })
    }

    fn discover_channels(&self, kind: ChannelKind) -> BoxFuture<'_, TransportResult<Vec<Channel>>> {
        Box::pin(async move {
            let mut state = self.state();
            state.discover_calls += 1;
            if !state.connected {
                return Err(TransportError::ConnectionClosed);
            }
            match &state.emergency_channels {
                Some(channels) => Ok(channels.iter().filter(|c| c.kind == kind).cloned().collect()),
                None => Err(TransportError::Timeout(10)),
            }
        })
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

impl RemoteStore for MockRelay {
    fn upsert(&self, record: SyncRecord, mode: WriteMode) -> BoxFuture<'_, Result<RemoteId, RemoteError>> {
        Box::pin(async move {
            let mut state = self.state();
            state.upserts.push((record.clone(), mode));
            if let Some(error) = state.remote_script.pop_front() {
                return Err(error);
            }
            if !state.connected {
                return Err(RemoteError::Unavailable(TransportError::ConnectionClosed));
            }
            if let Some(existing) = state.records.get(&record.client_id) {
                if existing.payload == record.payload {
                    return Ok(existing.remote_id.clone());
                }
                if mode == WriteMode::Create {
                    return Err(RemoteError::Conflict { remote_id: existing.remote_id.clone() });
                }
            }
            let remote_id = match state.records.get(&record.client_id) {
                Some(existing) => existing.remote_id.clone(),
                None => {
                    state.next_remote += 1;
                    RemoteId::new(format!("rec-{}", state.next_remote))
                }
            };
            state.records.insert(
                record.client_id.clone(),
                RemoteRecord { remote_id: remote_id.clone(), client_id: record.client_id, payload: record.payload },
            );
            Ok(remote_id)
        })
    }

    fn fetch(&self, client_id: &ClientId) -> BoxFuture<'_, Result<Option<RemoteRecord>, RemoteError>> {
        let client_id = client_id.clone();
        Box::pin(async move {
            let mut state = self.state();
            if let Some(error) = state.remote_script.pop_front() {
                return Err(error);
            }
            if !state.connected {
                return Err(RemoteError::Unavailable(TransportError::ConnectionClosed));
            }
            Ok(state.records.get(&client_id).cloned())
        })
    }
}

/// In-memory store whose writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: bcn_core::MemoryStore,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl FlakyStore {
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

impl KeyValueStore for FlakyStore {
    fn get(&self, key: &str) -> bcn_core::Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> bcn_core::Result<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(bcn_core::Error::Io(std::io::Error::other("disk full")));
        }
        self.inner.set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> bcn_core::Result<bool> {
        self.inner.delete(key)
    }

    fn list_by_prefix(&self, prefix: &str) -> bcn_core::Result<Vec<(String, String)>> {
        self.inner.list_by_prefix(prefix)
    }
}

/// Config with short timings for tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.reconnect.initial_delay_ms = 1_000;
    config.reconnect.max_delay_ms = 30_000;
    config.reconnect.max_attempts = 10;
    config.dispatch.batch_pause_ms = 0;
    config
}

/// Session components wired to a [`MockRelay`] and an in-memory store.
pub struct Harness {
    pub relay: Arc<MockRelay>,
    pub store: Arc<bcn_core::MemoryStore>,
    pub stamps: Arc<bcn_core::StampClock>,
    pub ids: Arc<bcn_core::IdGenerator>,
    pub session: Arc<crate::session::Session>,
    pub registry: Arc<crate::registry::ChannelRegistry>,
    pub connection: Arc<crate::connection::ConnectionManager>,
    pub dispatcher: Arc<crate::dispatch::MessageDispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_store(config, Arc::new(bcn_core::MemoryStore::new()))
    }

    pub fn with_store(config: Config, store: Arc<bcn_core::MemoryStore>) -> Self {
        let relay = MockRelay::new();
        let stamps = Arc::new(bcn_core::StampClock::system());
        let ids = Arc::new(bcn_core::IdGenerator::with_seed("harness"));
        let session = crate::session::Session::new();
        let registry = Arc::new(crate::registry::ChannelRegistry::new(
            Arc::clone(&session),
            relay.clone(),
            &config,
        ));
        let connection = crate::connection::ConnectionManager::new(
            Arc::clone(&session),
            relay.clone(),
            Arc::clone(&registry),
            crate::backoff::ReconnectPolicy::from(config.reconnect),
        );
        let dispatcher = Arc::new(
            crate::dispatch::MessageDispatcher::new(
                Arc::clone(&session),
                relay.clone(),
                Arc::clone(&registry),
                store.clone(),
                Arc::clone(&stamps),
                Arc::clone(&ids),
                config.dispatch,
            )
            .unwrap(),
        );
        Harness { relay, store, stamps, ids, session, registry, connection, dispatcher }
    }

    /// Connects through the connection manager.
    pub async fn connect(&self) {
        self.connection.connect().await.unwrap();
    }
}

/// Polls `condition` until it holds, sleeping between checks.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    condition()
}
