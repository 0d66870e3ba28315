// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Seams to the relay network and the remote record store.
//!
//! The messaging layer never talks to sockets directly. It drives a
//! [`RelayTransport`] for publish/subscribe traffic and a [`RemoteStore`] for
//! record synchronization. [`crate::WebSocketTransport`] implements both over
//! one relay connection; tests substitute in-memory doubles.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::broadcast;

use bcn_core::{
    Channel, ChannelId, ChannelKind, ClientId, Envelope, InboundMessage, RemoteId, RemoteRecord,
    SyncRecord, WriteMode,
};

/// Boxed future returned by the transport traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error type for transport operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// No open connection, or it closed underneath the request.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The relay did not answer in time.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The relay refused the request.
    #[error("rejected by relay: {0}")]
    Rejected(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// The relay answered with a frame that does not fit the request.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// A live channel subscription on the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: u64,
    pub channel_id: ChannelId,
}

/// Events pushed by the transport outside of request/response traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A message arrived on a subscribed channel.
    Message(InboundMessage),
    /// The underlying connection dropped.
    ConnectionLost { reason: String },
}

/// Publish/subscribe access to the relay network.
pub trait RelayTransport: Send + Sync {
    /// Open the connection.
    fn connect(&self) -> BoxFuture<'_, TransportResult<()>>;

    /// Close the connection. Closing an already-closed transport succeeds.
    fn disconnect(&self) -> BoxFuture<'_, TransportResult<()>>;

    /// Publish an envelope to a channel.
    fn publish(&self, channel_id: &ChannelId, envelope: Envelope)
        -> BoxFuture<'_, TransportResult<()>>;

    /// Start receiving messages for a channel.
    fn subscribe_to_channel(
        &self,
        channel_id: &ChannelId,
    ) -> BoxFuture<'_, TransportResult<SubscriptionHandle>>;

    /// Stop a subscription.
    fn unsubscribe(&self, handle: SubscriptionHandle) -> BoxFuture<'_, TransportResult<()>>;

    /// List channels of the given kind known to the relay.
    fn discover_channels(&self, kind: ChannelKind) -> BoxFuture<'_, TransportResult<Vec<Channel>>>;

    /// Stream of inbound messages and connection drops.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Error type for remote store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// A diverging record already exists for the client id.
    #[error("conflicting remote record {remote_id}")]
    Conflict { remote_id: RemoteId },

    /// The remote store refused the record.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The remote store could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(#[from] TransportError),
}

/// Record storage on the remote side, keyed by client id.
///
/// `upsert` must be idempotent per client id: replaying an identical record
/// returns the id of the record already stored instead of creating another.
pub trait RemoteStore: Send + Sync {
    fn upsert(&self, record: SyncRecord, mode: WriteMode) -> BoxFuture<'_, Result<RemoteId, RemoteError>>;

    fn fetch(&self, client_id: &ClientId) -> BoxFuture<'_, Result<Option<RemoteRecord>, RemoteError>>;
}
