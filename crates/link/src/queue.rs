// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Durable outbound message queue.
//!
//! Messages are held in drain order in memory and mirrored to the key-value
//! store under `outbox/<id>`. A popped message stays persisted until it is
//! acknowledged, so a crash mid-publish replays it on the next start.

use std::sync::Arc;

use bcn_core::{KeyValueStore, MessageId, OutboundMessage};

/// Key prefix for persisted outbound messages.
pub const OUTBOX_PREFIX: &str = "outbox/";

fn outbox_key(id: &MessageId) -> String {
    format!("{OUTBOX_PREFIX}{id}")
}

/// Priority-ordered queue of messages awaiting publication.
pub struct OutboundQueue {
    store: Arc<dyn KeyValueStore>,
    messages: Vec<OutboundMessage>,
}

impl OutboundQueue {
    /// Opens the queue and loads any persisted messages.
    pub fn open(store: Arc<dyn KeyValueStore>) -> bcn_core::Result<Self> {
        let mut queue = OutboundQueue { store, messages: Vec::new() };
        queue.restore()?;
        Ok(queue)
    }

    /// Loads persisted messages not already held in memory.
    ///
    /// Returns the number of messages added.
    pub fn restore(&mut self) -> bcn_core::Result<usize> {
        let mut added = 0;
        for (_, value) in self.store.list_by_prefix(OUTBOX_PREFIX)? {
            let message: OutboundMessage = serde_json::from_str(&value)?;
            if !self.contains(&message.id) {
                self.insert(message);
                added += 1;
            }
        }
        Ok(added)
    }

    /// Adds or replaces a message. The message is persisted before it is queued.
    pub fn enqueue(&mut self, message: OutboundMessage) -> bcn_core::Result<()> {
        let json = serde_json::to_string(&message)?;
        self.store.set(&outbox_key(&message.id), &json, None)?;
        self.messages.retain(|m| m.id != message.id);
        self.insert(message);
        Ok(())
    }

    fn insert(&mut self, message: OutboundMessage) {
        let at = self
            .messages
            .partition_point(|queued| queued.drain_order(&message).is_lt());
        self.messages.insert(at, message);
    }

    /// Removes up to `max` messages from the front of the queue.
    ///
    /// The messages remain persisted until [`OutboundQueue::ack`].
    pub fn pop_batch(&mut self, max: usize) -> Vec<OutboundMessage> {
        let n = max.min(self.messages.len());
        self.messages.drain(..n).collect()
    }

    /// Forgets a message for good.
    pub fn ack(&mut self, id: &MessageId) -> bcn_core::Result<()> {
        self.messages.retain(|m| &m.id != id);
        self.store.delete(&outbox_key(id))?;
        Ok(())
    }

    /// Queued messages in drain order.
    pub fn peek_all(&self) -> Vec<OutboundMessage> {
        self.messages.clone()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| &m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
