// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! bcn-link: resilient relay messaging and offline synchronization.
//!
//! The [`Messenger`] is the entry point. Underneath it, one [`Session`] is
//! shared by the connection manager, channel registry, message dispatcher,
//! emergency coordinator and sync reconciler. The relay is reached through the
//! [`RelayTransport`] and [`RemoteStore`] seams, implemented over WebSocket by
//! [`WebSocketTransport`].

pub mod backoff;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod emergency;
pub mod error;
pub mod messenger;
pub mod offline;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod transport;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_support;

pub use backoff::ReconnectPolicy;
pub use config::Config;
pub use connection::ConnectionManager;
pub use dispatch::{Delivery, DrainReport, FailedDelivery, MessageDispatcher};
pub use emergency::{BroadcastReport, EmergencyCoordinator, EmergencyNotice, NoticeKind};
pub use error::{Error, Result, RetryScope};
pub use messenger::Messenger;
pub use offline::{OfflineStore, SyncStats};
pub use queue::OutboundQueue;
pub use reconcile::{ConflictResolution, ReconcileReport, SyncReconciler};
pub use registry::ChannelRegistry;
pub use session::{ConnectionState, EmergencyState, Session, SessionEvent};
pub use transport::{
    BoxFuture, RelayTransport, RemoteError, RemoteStore, SubscriptionHandle, TransportError,
    TransportEvent, TransportResult,
};
pub use ws::WebSocketTransport;
