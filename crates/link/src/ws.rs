// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket transport to a `bcn-relay` node.
//!
//! One connection carries both publish/subscribe traffic and remote store
//! requests. A writer task owns the sink; a reader task routes replies to the
//! waiting request by `request_id` and turns `event` frames into
//! [`TransportEvent::Message`]s. Every request is bounded by the configured
//! timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use bcn_core::protocol::{ClientFrame, ServerFrame};
use bcn_core::{
    Channel, ChannelId, ChannelKind, ClientId, Envelope, InboundMessage, RemoteId, RemoteRecord,
    SyncRecord, WriteMode,
};

use crate::config::RelayConfig;
use crate::transport::{
    BoxFuture, RelayTransport, RemoteError, RemoteStore, SubscriptionHandle, TransportError,
    TransportEvent, TransportResult,
};

const EVENT_BUFFER: usize = 1024;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<ServerFrame>>>>;

struct Connection {
    generation: u64,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    closing: Arc<AtomicBool>,
    reader: AbortHandle,
}

type Slot = Arc<Mutex<Option<Connection>>>;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// [`RelayTransport`] and [`RemoteStore`] over a single WebSocket.
pub struct WebSocketTransport {
    url: String,
    timeout: Duration,
    slot: Slot,
    events: broadcast::Sender<TransportEvent>,
    next_request: AtomicU64,
    next_generation: AtomicU64,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        WebSocketTransport {
            url: url.into(),
            timeout,
            slot: Arc::new(Mutex::new(None)),
            events,
            next_request: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.url.clone(), config.request_timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.slot).is_some()
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    async fn open(&self) -> TransportResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let (ws, _) = tokio::time::timeout(self.timeout, tokio_tungstenite::connect_async(self.url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout_ms()))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (outgoing, mut rx) = mpsc::unbounded_channel::<Message>();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closing = Arc::new(AtomicBool::new(false));

        // Tasks are spawned under the slot lock so the reader cannot observe
        // the slot before its own connection is in it.
        let mut slot = lock(&self.slot);
        if let Some(previous) = slot.take() {
            shutdown(previous);
        }

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    debug!(error = %e, "relay write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = {
            let pending = Arc::clone(&pending);
            let closing = Arc::clone(&closing);
            let events = self.events.clone();
            let slot = Arc::clone(&self.slot);
            tokio::spawn(async move {
                let reason = loop {
                    match stream.next().await {
                        Some(Ok(Message::Text(text))) => route(text.as_str(), &pending, &events),
                        Some(Ok(Message::Close(_))) => break "closed by relay".to_string(),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break e.to_string(),
                        None => break "stream ended".to_string(),
                    }
                };

                lock(&pending).clear();
                {
                    let mut slot = lock(&slot);
                    if slot.as_ref().is_some_and(|c| c.generation == generation) {
                        *slot = None;
                    }
                }
                if !closing.load(Ordering::SeqCst) {
                    warn!(reason = %reason, "relay connection lost");
                    let _ = events.send(TransportEvent::ConnectionLost { reason });
                }
            })
        };

        *slot = Some(Connection {
            generation,
            outgoing,
            pending,
            closing,
            reader: reader.abort_handle(),
        });
        drop(slot);

        info!(url = %self.url, "connected to relay");
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        let connection = lock(&self.slot).take();
        if let Some(connection) = connection {
            shutdown(connection);
            info!(url = %self.url, "disconnected from relay");
        }
        Ok(())
    }

    async fn request(&self, build: impl FnOnce(u64) -> ClientFrame) -> TransportResult<ServerFrame> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let json = build(request_id)
            .to_json()
            .map_err(|e| TransportError::SerializationError(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        let pending = {
            let slot = lock(&self.slot);
            let connection = slot.as_ref().ok_or(TransportError::ConnectionClosed)?;
            lock(&connection.pending).insert(request_id, tx);
            connection
                .outgoing
                .send(Message::text(json))
                .map_err(|_| TransportError::ConnectionClosed)?;
            Arc::clone(&connection.pending)
        };

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(TransportError::ConnectionClosed),
            Err(_) => {
                lock(&pending).remove(&request_id);
                Err(TransportError::Timeout(self.timeout_ms()))
            }
        }
    }

    /// Round-trips a keepalive.
    pub async fn ping(&self) -> TransportResult<()> {
        match self.request(|request_id| ClientFrame::Ping { request_id }).await? {
            ServerFrame::Pong { .. } => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn expect_ack(&self, build: impl FnOnce(u64) -> ClientFrame) -> TransportResult<()> {
        match self.request(build).await? {
            ServerFrame::Ack { .. } => Ok(()),
            ServerFrame::Rejected { reason, .. } => Err(TransportError::Rejected(reason)),
            other => Err(unexpected(&other)),
        }
    }
}

fn shutdown(connection: Connection) {
    connection.closing.store(true, Ordering::SeqCst);
    lock(&connection.pending).clear();
    // Dropping the sender lets the writer close the socket.
    drop(connection.outgoing);
    connection.reader.abort();
}

fn route(text: &str, pending: &Pending, events: &broadcast::Sender<TransportEvent>) {
    let frame = match ServerFrame::from_json(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "unparseable frame from relay");
            return;
        }
    };
    match frame {
        ServerFrame::Event { channel_id, envelope, .. } => {
            let _ = events.send(TransportEvent::Message(InboundMessage { channel_id, envelope }));
        }
        frame => {
            let Some(request_id) = frame.request_id() else {
                return;
            };
            match lock(pending).remove(&request_id) {
                Some(waiter) => {
                    let _ = waiter.send(frame);
                }
                None => debug!(request_id, "reply for unknown or expired request"),
            }
        }
    }
}

fn unexpected(frame: &ServerFrame) -> TransportError {
    TransportError::UnexpectedReply(format!("{frame:?}"))
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(connection) = lock(&self.slot).take() {
            shutdown(connection);
        }
    }
}

impl RelayTransport for WebSocketTransport {
    fn connect(&self) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(self.open())
    }

    fn disconnect(&self) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(self.close())
    }

    fn publish(&self, channel_id: &ChannelId, envelope: Envelope) -> BoxFuture<'_, TransportResult<()>> {
        let channel_id = channel_id.clone();
        Box::pin(async move {
            self.expect_ack(|request_id| ClientFrame::Publish { request_id, channel_id, envelope })
                .await
        })
    }

    fn subscribe_to_channel(
        &self,
        channel_id: &ChannelId,
    ) -> BoxFuture<'_, TransportResult<SubscriptionHandle>> {
        let channel_id = channel_id.clone();
        Box::pin(async move {
            let subscribe = channel_id.clone();
            match self
                .request(|request_id| ClientFrame::Subscribe { request_id, channel_id: subscribe })
                .await?
            {
                ServerFrame::Subscribed { subscription_id, .. } => {
                    Ok(SubscriptionHandle { id: subscription_id, channel_id })
                }
                ServerFrame::Rejected { reason, .. } => Err(TransportError::Rejected(reason)),
                other => Err(unexpected(&other)),
            }
        })
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            self.expect_ack(|request_id| ClientFrame::Unsubscribe { request_id, subscription_id: handle.id })
                .await
        })
    }

    fn discover_channels(&self, kind: ChannelKind) -> BoxFuture<'_, TransportResult<Vec<Channel>>> {
        Box::pin(async move {
            match self.request(|request_id| ClientFrame::Discover { request_id, kind }).await? {
                ServerFrame::Channels { channels, .. } => Ok(channels),
                ServerFrame::Rejected { reason, .. } => Err(TransportError::Rejected(reason)),
                other => Err(unexpected(&other)),
            }
        })
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

impl RemoteStore for WebSocketTransport {
    fn upsert(&self, record: SyncRecord, mode: WriteMode) -> BoxFuture<'_, Result<RemoteId, RemoteError>> {
        Box::pin(async move {
            match self.request(|request_id| ClientFrame::Upsert { request_id, record, mode }).await? {
                ServerFrame::Upserted { remote_id, .. } => Ok(remote_id),
                ServerFrame::Conflict { remote_id, .. } => Err(RemoteError::Conflict { remote_id }),
                ServerFrame::Rejected { reason, .. } => Err(RemoteError::Rejected(reason)),
                other => Err(RemoteError::Unavailable(unexpected(&other))),
            }
        })
    }

    fn fetch(&self, client_id: &ClientId) -> BoxFuture<'_, Result<Option<RemoteRecord>, RemoteError>> {
        let client_id = client_id.clone();
        Box::pin(async move {
            match self.request(|request_id| ClientFrame::Fetch { request_id, client_id }).await? {
                ServerFrame::Record { record, .. } => Ok(record),
                ServerFrame::Rejected { reason, .. } => Err(RemoteError::Rejected(reason)),
                other => Err(RemoteError::Unavailable(unexpected(&other))),
            }
        })
    }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
