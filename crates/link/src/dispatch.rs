// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound message dispatch with offline buffering.
//!
//! Messages are published straight away while connected and queued otherwise.
//! [`MessageDispatcher::drain`] flushes the queue in priority order, a batch at
//! a time, once the connection is back.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use bcn_core::{ChannelId, IdGenerator, KeyValueStore, MessageId, OutboundMessage, Priority, StampClock};

use crate::config::DispatchConfig;
use crate::error::{Error, Result, RetryScope};
use crate::queue::OutboundQueue;
use crate::registry::ChannelRegistry;
use crate::session::{ConnectionState, Session, SessionEvent};
use crate::transport::{RelayTransport, TransportError};

/// Outcome of [`MessageDispatcher::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Published to the relay.
    Sent,
    /// Not connected; buffered for the next drain.
    Queued,
    /// Publishing failed; buffered again after `attempts` tries.
    Requeued { attempts: u32 },
}

/// A message that will not be retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDelivery {
    pub message: OutboundMessage,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Counters from one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub sent: usize,
    pub requeued: usize,
    pub failed: usize,
    /// Messages still queued when the pass ended.
    pub remaining: usize,
    /// Another drain was already running.
    pub skipped: bool,
}

/// Publishes outbound messages and owns the outbound queue.
pub struct MessageDispatcher {
    session: Arc<Session>,
    transport: Arc<dyn RelayTransport>,
    registry: Arc<ChannelRegistry>,
    stamps: Arc<StampClock>,
    ids: Arc<IdGenerator>,
    config: DispatchConfig,
    queue: Mutex<OutboundQueue>,
    failed: Mutex<Vec<FailedDelivery>>,
    drain_gate: tokio::sync::Mutex<()>,
}

impl MessageDispatcher {
    /// Creates the dispatcher and restores persisted outbound messages.
    pub fn new(
        session: Arc<Session>,
        transport: Arc<dyn RelayTransport>,
        registry: Arc<ChannelRegistry>,
        store: Arc<dyn KeyValueStore>,
        stamps: Arc<StampClock>,
        ids: Arc<IdGenerator>,
        config: DispatchConfig,
    ) -> Result<Self> {
        let queue = OutboundQueue::open(store)?;
        if !queue.is_empty() {
            info!(messages = queue.len(), "restored outbound queue");
        }
        Ok(MessageDispatcher {
            session,
            transport,
            registry,
            stamps,
            ids,
            config,
            queue: Mutex::new(queue),
            failed: Mutex::new(Vec::new()),
            drain_gate: tokio::sync::Mutex::new(()),
        })
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, OutboundQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn failed(&self) -> std::sync::MutexGuard<'_, Vec<FailedDelivery>> {
        self.failed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Builds a message with a fresh id and creation stamp.
    ///
    /// Priorities other than the emergency levels are clamped to the routine range.
    pub fn compose(
        &self,
        channel_id: impl Into<ChannelId>,
        content: impl Into<String>,
        priority: Priority,
    ) -> OutboundMessage {
        let priority = if priority == Priority::EMERGENCY || priority == Priority::STAND_DOWN {
            priority
        } else {
            Priority::routine(priority.value())
        };
        let created_at = self.stamps.next();
        OutboundMessage::new(self.ids.message_id(created_at), channel_id.into(), content, priority, created_at)
    }

    /// Reloads persisted messages missing from the in-memory queue.
    pub fn restore(&self) -> Result<usize> {
        Ok(self.queue().restore()?)
    }

    /// Sends one message, buffering it when it cannot go out now.
    pub async fn send(&self, mut message: OutboundMessage) -> Result<Delivery> {
        let max = self.registry.max_message_size(&message.channel_id);
        let size = message.size();
        if size > max {
            return Err(Error::Capacity { message_id: message.id, channel_id: message.channel_id, size, max });
        }

        if !self.session.is_connected() {
            debug!(id = %message.id, channel = %message.channel_id, "offline, queueing message");
            self.queue().enqueue(message)?;
            // The drain started by the connection coming up may already be past
            // this message.
            if matches!(self.session.state(), ConnectionState::Connecting | ConnectionState::Connected) {
                self.request_drain();
            }
            return Ok(Delivery::Queued);
        }

        match self.transport.publish(&message.channel_id, message.envelope()).await {
            Ok(()) => {
                debug!(id = %message.id, channel = %message.channel_id, "message sent");
                Ok(Delivery::Sent)
            }
            Err(e) => {
                message.attempts = message.attempts.saturating_add(1);
                let attempts = message.attempts;
                let id = message.id.clone();
                if self.requeue_or_fail(message, &e)? {
                    self.request_drain();
                    Ok(Delivery::Requeued { attempts })
                } else {
                    Err(Error::ExhaustedRetries { scope: RetryScope::Message(id), attempts })
                }
            }
        }
    }

    /// Re-queues a message after a failed publish, or records it as failed once
    /// it hit the attempt ceiling. Returns true if it was re-queued.
    fn requeue_or_fail(&self, message: OutboundMessage, error: &TransportError) -> Result<bool> {
        if message.attempts < self.config.max_attempts {
            debug!(id = %message.id, attempts = message.attempts, error = %error, "publish failed, requeueing");
            self.queue().enqueue(message)?;
            return Ok(true);
        }

        self.queue().ack(&message.id)?;
        warn!(
            id = %message.id,
            channel = %message.channel_id,
            attempts = message.attempts,
            error = %error,
            "message delivery failed permanently"
        );
        let failure = FailedDelivery { message, error: error.to_string(), failed_at: Utc::now() };
        self.failed().push(failure.clone());
        self.session.notify_failure(&failure);
        Ok(false)
    }

    /// Asks the session owner for a drain after the retry delay.
    fn request_drain(&self) {
        debug!(queued = self.queue_len(), "drain requested");
        self.session.emit(SessionEvent::DrainRequested);
    }

    /// Publishes queued messages while connected.
    ///
    /// Each batch is published concurrently and fully settled before the next
    /// one starts. Only one drain runs at a time; a call made while another is
    /// running returns a skipped report. A batch that finds the connection
    /// closed ends the pass; what is left waits for a later drain.
    pub async fn drain(&self) -> Result<DrainReport> {
        let Ok(_gate) = self.drain_gate.try_lock() else {
            debug!("drain already running");
            return Ok(DrainReport { skipped: true, ..Default::default() });
        };

        let mut report = DrainReport::default();
        let batch_size = self.config.batch_size.max(1);

        while self.session.is_connected() {
            let batch = self.queue().pop_batch(batch_size);
            if batch.is_empty() {
                break;
            }

            let outcomes = join_all(
                batch.iter().map(|m| self.transport.publish(&m.channel_id, m.envelope())),
            )
            .await;

            let mut connection_closed = false;
            for (mut message, outcome) in batch.into_iter().zip(outcomes) {
                match outcome {
                    Ok(()) => {
                        self.queue().ack(&message.id)?;
                        report.sent += 1;
                    }
                    Err(e) => {
                        connection_closed |= e == TransportError::ConnectionClosed;
                        message.attempts = message.attempts.saturating_add(1);
                        if self.requeue_or_fail(message, &e)? {
                            report.requeued += 1;
                        } else {
                            report.failed += 1;
                        }
                    }
                }
            }

            if connection_closed {
                debug!("connection closed mid-drain, stopping pass");
                break;
            }

            if !self.queue().is_empty() && !self.config.batch_pause().is_zero() {
                tokio::time::sleep(self.config.batch_pause()).await;
            }
        }

        report.remaining = self.queue_len();
        if report.remaining > 0 && self.session.is_connected() {
            self.request_drain();
        }
        if report.sent + report.requeued + report.failed > 0 {
            info!(
                sent = report.sent,
                requeued = report.requeued,
                failed = report.failed,
                remaining = report.remaining,
                "outbound queue drained"
            );
        }
        Ok(report)
    }

    /// Messages that exhausted their attempts, oldest failure first.
    pub fn failed_deliveries(&self) -> Vec<FailedDelivery> {
        self.failed().clone()
    }

    /// Puts a failed message back in the queue with a fresh attempt budget.
    pub fn retry_failed(&self, id: &MessageId) -> Result<()> {
        let Some(failure) = self.failed().iter().find(|f| &f.message.id == id).cloned() else {
            return Err(Error::DeliveryNotFound(id.clone()));
        };
        let mut message = failure.message;
        message.attempts = 0;
        self.queue().enqueue(message)?;
        self.failed().retain(|f| &f.message.id != id);
        info!(%id, "retrying failed message");
        Ok(())
    }

    /// Queued messages in drain order.
    pub fn queued(&self) -> Vec<OutboundMessage> {
        self.queue().peek_all()
    }

    pub fn queue_len(&self) -> usize {
        self.queue().len()
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
