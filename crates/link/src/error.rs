// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the messaging layer.
//!
//! Transient network errors are retried internally (reconnect backoff,
//! message re-queue, entity back to `pending`). Capacity, conflict and
//! exhausted-retry errors are structural and always reach the caller with the
//! ids and attempt counts needed to act on them.

use std::fmt;

use bcn_core::{ChannelId, ClientId, MessageId, RemoteId};

use crate::transport::TransportError;

/// What ran out of retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryScope {
    /// Automatic reconnection.
    Reconnect,
    /// Delivery of one outbound message.
    Message(MessageId),
}

impl fmt::Display for RetryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryScope::Reconnect => write!(f, "reconnect"),
            RetryScope::Message(id) => write!(f, "delivery of message {id}"),
        }
    }
}

/// All errors surfaced by the messaging layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transient network error: {0}")]
    TransientNetwork(#[from] TransportError),

    #[error("message {message_id} is {size} bytes, over the {max} byte limit of channel {channel_id}")]
    Capacity {
        message_id: MessageId,
        channel_id: ChannelId,
        size: usize,
        max: usize,
    },

    #[error("offline entity {client_id} conflicts with remote record {}\n  hint: resolve it with keep-local, keep-remote or merge", remote_id.as_ref().map(|r| r.as_str()).unwrap_or("(unknown)"))]
    Conflict {
        client_id: ClientId,
        remote_id: Option<RemoteId>,
    },

    #[error("{scope} retries exhausted after {attempts} attempts\n  hint: call connect() or retry the message explicitly")]
    ExhaustedRetries { scope: RetryScope, attempts: u32 },

    #[error("offline entity not found: {0}")]
    EntityNotFound(ClientId),

    #[error("failed delivery not found: {0}")]
    DeliveryNotFound(MessageId),

    #[error("store error: {0}")]
    Store(#[from] bcn_core::Error),

    #[error("invalid config: {0}")]
    Config(String),
}

impl Error {
    /// Returns true for errors the layer retries on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientNetwork(_))
    }
}

/// A specialized Result type for messaging layer operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
