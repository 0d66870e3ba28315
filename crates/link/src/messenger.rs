// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Caller-facing entry point tying the session components together.
//!
//! A [`Messenger`] owns one session. A background pump reacts to session and
//! transport events: a `Connected` event starts a queue drain and a
//! reconciliation pass, inbound messages reach `on_message` observers, and a
//! dropped connection is handed to the connection manager for reconnection.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use bcn_core::{
    ChannelId, ClientId, IdGenerator, InboundMessage, KeyValueStore, MessageId, OfflineEntity,
    OutboundMessage, Priority, SqliteStore, StampClock, SyncStatus,
};

use crate::backoff::ReconnectPolicy;
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::dispatch::{Delivery, DrainReport, FailedDelivery, MessageDispatcher};
use crate::emergency::{BroadcastReport, EmergencyCoordinator};
use crate::error::Result;
use crate::offline::{OfflineStore, SyncStats};
use crate::reconcile::{ConflictResolution, ReconcileReport, SyncReconciler};
use crate::registry::ChannelRegistry;
use crate::session::{ConnectionState, EmergencyState, Session, SessionEvent};
use crate::transport::{RelayTransport, RemoteStore, TransportEvent};
use crate::ws::WebSocketTransport;

/// Messaging and offline sync for one relay session.
pub struct Messenger {
    session: Arc<Session>,
    connection: Arc<ConnectionManager>,
    registry: Arc<ChannelRegistry>,
    dispatcher: Arc<MessageDispatcher>,
    emergency: EmergencyCoordinator,
    offline: Arc<OfflineStore>,
    reconciler: Arc<SyncReconciler>,
    tasks: Vec<AbortHandle>,
}

impl Messenger {
    /// Opens a messenger speaking WebSocket to `config.relay.url`, with its
    /// durable state in the SQLite file at `db_path`.
    ///
    /// Must be called within a tokio runtime.
    pub fn open(config: Config, db_path: &Path) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(db_path)?);
        let relay = Arc::new(WebSocketTransport::from_config(&config.relay));
        Self::new(config, relay.clone(), relay, store)
    }

    /// Assembles a messenger over explicit seams.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(
        config: Config,
        transport: Arc<dyn RelayTransport>,
        remote: Arc<dyn RemoteStore>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        config.validate()?;

        let session = Session::new();
        let stamps = Arc::new(StampClock::system());
        let ids = Arc::new(IdGenerator::new());

        let registry = Arc::new(ChannelRegistry::new(Arc::clone(&session), Arc::clone(&transport), &config));
        let connection = ConnectionManager::new(
            Arc::clone(&session),
            Arc::clone(&transport),
            Arc::clone(&registry),
            ReconnectPolicy::from(config.reconnect),
        );
        let dispatcher = Arc::new(MessageDispatcher::new(
            Arc::clone(&session),
            Arc::clone(&transport),
            Arc::clone(&registry),
            Arc::clone(&store),
            Arc::clone(&stamps),
            Arc::clone(&ids),
            config.dispatch,
        )?);
        let emergency =
            EmergencyCoordinator::new(Arc::clone(&session), Arc::clone(&registry), Arc::clone(&dispatcher));
        let offline = Arc::new(OfflineStore::new(store, stamps, ids));
        let reconciler =
            Arc::new(SyncReconciler::new(Arc::clone(&offline), remote, config.sync.entity_ttl()));

        let mut tasks = vec![spawn_pump(
            session.subscribe(),
            transport.events(),
            Arc::clone(&session),
            Arc::clone(&connection),
            Arc::clone(&dispatcher),
            Arc::clone(&reconciler),
            config.dispatch.retry_delay(),
        )];
        if let Some(interval) = config.sync.interval() {
            tasks.push(spawn_periodic_reconcile(interval, Arc::clone(&session), Arc::clone(&reconciler)));
        }

        Ok(Messenger { session, connection, registry, dispatcher, emergency, offline, reconciler, tasks })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }

    pub fn compose(
        &self,
        channel_id: impl Into<ChannelId>,
        content: impl Into<String>,
        priority: Priority,
    ) -> OutboundMessage {
        self.dispatcher.compose(channel_id, content, priority)
    }

    pub async fn send(&self, message: OutboundMessage) -> Result<Delivery> {
        self.dispatcher.send(message).await
    }

    /// Publishes queued messages now instead of waiting for the next connect.
    pub async fn drain(&self) -> Result<DrainReport> {
        self.dispatcher.drain().await
    }

    pub fn queued(&self) -> Vec<OutboundMessage> {
        self.dispatcher.queued()
    }

    pub fn failed_deliveries(&self) -> Vec<FailedDelivery> {
        self.dispatcher.failed_deliveries()
    }

    pub fn retry_failed(&self, id: &MessageId) -> Result<()> {
        self.dispatcher.retry_failed(id)
    }

    pub async fn join_channel(&self, channel_id: impl Into<ChannelId>) -> bool {
        self.registry.join_channel(&channel_id.into()).await
    }

    pub async fn leave_channel(&self, channel_id: impl Into<ChannelId>) -> bool {
        self.registry.leave_channel(&channel_id.into()).await
    }

    pub async fn declare_emergency(&self, reason: impl Into<String>) -> Result<BroadcastReport> {
        self.emergency.declare_emergency(reason).await
    }

    pub async fn resolve_emergency(&self) -> Result<BroadcastReport> {
        self.emergency.resolve_emergency().await
    }

    pub fn create_offline(&self, payload: serde_json::Value) -> Result<OfflineEntity> {
        self.offline.create(payload)
    }

    pub fn offline(&self, client_id: &ClientId) -> Result<Option<OfflineEntity>> {
        self.offline.get(client_id)
    }

    pub fn offline_by_status(&self, status: SyncStatus) -> Result<Vec<OfflineEntity>> {
        self.offline.get_by_status(status)
    }

    pub fn delete_offline(&self, client_id: &ClientId) -> Result<bool> {
        self.offline.delete(client_id)
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconciler.reconcile().await
    }

    pub async fn resolve_conflict(
        &self,
        client_id: &ClientId,
        resolution: ConflictResolution,
    ) -> Result<OfflineEntity> {
        self.reconciler.resolve_conflict(client_id, resolution).await
    }

    pub fn sync_stats(&self) -> Result<SyncStats> {
        self.offline.stats()
    }

    pub fn on_message(&self, callback: impl Fn(&InboundMessage) + Send + Sync + 'static) {
        self.session.on_message(callback);
    }

    pub fn on_connection_state_change(&self, callback: impl Fn(&ConnectionState) + Send + Sync + 'static) {
        self.session.on_connection_state_change(callback);
    }

    pub fn on_emergency_change(&self, callback: impl Fn(&EmergencyState) + Send + Sync + 'static) {
        self.session.on_emergency_change(callback);
    }

    pub fn on_delivery_failure(&self, callback: impl Fn(&FailedDelivery) + Send + Sync + 'static) {
        self.session.on_delivery_failure(callback);
    }
}

impl Drop for Messenger {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.connection.cancel_reconnect();
    }
}

fn spawn_pump(
    mut session_events: tokio::sync::broadcast::Receiver<SessionEvent>,
    mut transport_events: tokio::sync::broadcast::Receiver<TransportEvent>,
    session: Arc<Session>,
    connection: Arc<ConnectionManager>,
    dispatcher: Arc<MessageDispatcher>,
    reconciler: Arc<SyncReconciler>,
    retry_delay: Duration,
) -> AbortHandle {
    tokio::spawn(async move {
        // At most one delayed drain waits at a time.
        let retry_scheduled = Arc::new(AtomicBool::new(false));
        loop {
            tokio::select! {
                event = session_events.recv() => match event {
                    Ok(SessionEvent::Connected) => {
                        let dispatcher = Arc::clone(&dispatcher);
                        let reconciler = Arc::clone(&reconciler);
                        tokio::spawn(async move {
                            if let Err(e) = dispatcher.drain().await {
                                warn!(error = %e, "drain after connect failed");
                            }
                            if let Err(e) = reconciler.reconcile().await {
                                warn!(error = %e, "reconcile after connect failed");
                            }
                        });
                    }
                    Ok(SessionEvent::DrainRequested) => {
                        if retry_scheduled.swap(true, Ordering::SeqCst) {
                            continue;
                        }
                        let dispatcher = Arc::clone(&dispatcher);
                        let retry_scheduled = Arc::clone(&retry_scheduled);
                        tokio::spawn(async move {
                            tokio::time::sleep(retry_delay).await;
                            retry_scheduled.store(false, Ordering::SeqCst);
                            if let Err(e) = dispatcher.drain().await {
                                warn!(error = %e, "retry drain failed");
                            }
                        });
                    }
                    Ok(SessionEvent::ReconnectExhausted { attempts }) => {
                        warn!(attempts, "giving up on automatic reconnection");
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "session event pump lagged"),
                    Err(RecvError::Closed) => break,
                },
                event = transport_events.recv() => match event {
                    Ok(TransportEvent::Message(message)) => {
                        if session.is_member(&message.channel_id) {
                            session.notify_message(&message);
                        } else {
                            debug!(channel = %message.channel_id, "dropping message for channel not joined");
                        }
                    }
                    Ok(TransportEvent::ConnectionLost { reason }) => {
                        connection.handle_connection_lost(&reason);
                    }
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "transport event pump lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("event pump stopped");
    })
    .abort_handle()
}

fn spawn_periodic_reconcile(
    interval: Duration,
    session: Arc<Session>,
    reconciler: Arc<SyncReconciler>,
) -> AbortHandle {
    info!(interval_secs = interval.as_secs(), "periodic reconcile enabled");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !session.is_connected() {
                continue;
            }
            if let Err(e) = reconciler.reconcile().await {
                warn!(error = %e, "periodic reconcile failed");
            }
        }
    })
    .abort_handle()
}

#[cfg(test)]
#[path = "messenger_tests.rs"]
mod tests;
