// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket frames exchanged between a client session and a relay.
//!
//! Every client request carries a `request_id` that the relay echoes in its
//! reply. Relays also push unsolicited `event` frames for channels the
//! connection has subscribed to.

use serde::{Deserialize, Serialize};

use crate::channel::{Channel, ChannelKind};
use crate::entity::{RemoteRecord, SyncRecord, WriteMode};
use crate::ids::{ChannelId, ClientId, RemoteId};
use crate::message::Envelope;

/// Frames sent from client to relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Publish an envelope to every subscriber of a channel.
    Publish { request_id: u64, channel_id: ChannelId, envelope: Envelope },

    /// Start receiving `event` frames for a channel.
    Subscribe { request_id: u64, channel_id: ChannelId },

    /// Stop a subscription created earlier.
    Unsubscribe { request_id: u64, subscription_id: u64 },

    /// List channels of the given kind known to the relay.
    Discover { request_id: u64, kind: ChannelKind },

    /// Create or update a record keyed by its client id.
    Upsert { request_id: u64, record: SyncRecord, mode: WriteMode },

    /// Look up the record stored for a client id.
    Fetch { request_id: u64, client_id: ClientId },

    /// Keepalive.
    Ping { request_id: u64 },
}

impl ClientFrame {
    pub fn request_id(&self) -> u64 {
        match self {
            ClientFrame::Publish { request_id, .. }
            | ClientFrame::Subscribe { request_id, .. }
            | ClientFrame::Unsubscribe { request_id, .. }
            | ClientFrame::Discover { request_id, .. }
            | ClientFrame::Upsert { request_id, .. }
            | ClientFrame::Fetch { request_id, .. }
            | ClientFrame::Ping { request_id } => *request_id,
        }
    }

    /// Serializes the frame to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the frame from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Frames sent from relay to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Request accepted (publish, unsubscribe).
    Ack { request_id: u64 },

    /// Subscription created.
    Subscribed { request_id: u64, subscription_id: u64 },

    /// Discovery result.
    Channels { request_id: u64, channels: Vec<Channel> },

    /// Record stored (or an identical replay acknowledged).
    Upserted { request_id: u64, remote_id: RemoteId },

    /// Fetch result.
    Record { request_id: u64, record: Option<RemoteRecord> },

    /// A diverging record already exists for the client id.
    Conflict { request_id: u64, remote_id: RemoteId },

    /// Request refused.
    Rejected { request_id: u64, reason: String },

    /// Keepalive reply.
    Pong { request_id: u64 },

    /// A message published on a subscribed channel.
    Event { subscription_id: u64, channel_id: ChannelId, envelope: Envelope },
}

impl ServerFrame {
    /// The request this frame answers, or `None` for pushed events.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            ServerFrame::Ack { request_id }
            | ServerFrame::Subscribed { request_id, .. }
            | ServerFrame::Channels { request_id, .. }
            | ServerFrame::Upserted { request_id, .. }
            | ServerFrame::Record { request_id, .. }
            | ServerFrame::Conflict { request_id, .. }
            | ServerFrame::Rejected { request_id, .. }
            | ServerFrame::Pong { request_id } => Some(*request_id),
            ServerFrame::Event { .. } => None,
        }
    }

    pub fn rejected(request_id: u64, reason: impl Into<String>) -> Self {
        ServerFrame::Rejected { request_id, reason: reason.into() }
    }

    /// Serializes the frame to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the frame from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
