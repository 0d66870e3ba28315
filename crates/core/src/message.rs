// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound and inbound message types.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::clock::Stamp;
use crate::ids::{ChannelId, MessageId};

/// Delivery urgency. Higher values are drained first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(i32);

impl Priority {
    /// Lowest routine priority.
    pub const LOW: Priority = Priority(0);
    /// Default priority for ordinary traffic.
    pub const NORMAL: Priority = Priority(1);
    /// Highest value routine traffic may use.
    pub const ROUTINE_MAX: Priority = Priority(1000);
    /// Emergency stand-down notices.
    pub const STAND_DOWN: Priority = Priority(5000);
    /// Emergency declarations; outranks everything else.
    pub const EMERGENCY: Priority = Priority(10_000);

    /// Routine priority, clamped to `LOW..=ROUTINE_MAX`.
    pub fn routine(value: i32) -> Self {
        Priority(value.clamp(Self::LOW.0, Self::ROUTINE_MAX.0))
    }

    pub fn value(&self) -> i32 {
        self.0
    }

    pub fn is_routine(&self) -> bool {
        *self <= Self::ROUTINE_MAX
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message body as published to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: MessageId,
    pub content: String,
    pub priority: Priority,
    pub created_at: Stamp,
}

/// A message waiting in (or drained from) the outbound queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub content: String,
    pub priority: Priority,
    pub created_at: Stamp,
    #[serde(default)]
    pub attempts: u32,
}

impl OutboundMessage {
    pub fn new(
        id: MessageId,
        channel_id: ChannelId,
        content: impl Into<String>,
        priority: Priority,
        created_at: Stamp,
    ) -> Self {
        OutboundMessage {
            id,
            channel_id,
            content: content.into(),
            priority,
            created_at,
            attempts: 0,
        }
    }

    /// Size of the body in bytes, as checked against channel limits.
    pub fn size(&self) -> usize {
        self.content.len()
    }

    pub fn envelope(&self) -> Envelope {
        Envelope {
            message_id: self.id.clone(),
            content: self.content.clone(),
            priority: self.priority,
            created_at: self.created_at,
        }
    }

    /// Queue order: priority descending, then creation ascending, then id.
    pub fn drain_order(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// A message received from a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_id: ChannelId,
    pub envelope: Envelope,
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
