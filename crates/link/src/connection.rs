// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection lifecycle and automatic reconnection.
//!
//! State machine:
//!
//! ```text
//! disconnected -> connecting -> connected
//! connecting | connected -> error -> connecting   (scheduled)
//! any -> disconnected                            (explicit disconnect only)
//! ```
//!
//! At most one reconnect timer is live per session. Scheduling always cancels
//! the previous timer first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::error::{Error, Result, RetryScope};
use crate::registry::ChannelRegistry;
use crate::session::{ConnectionState, Session, SessionEvent};
use crate::transport::{BoxFuture, RelayTransport, TransportError};

#[derive(Debug, Default)]
struct TimerSlot {
    generation: u64,
    handle: Option<AbortHandle>,
}

/// What happened when a reconnect was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    Scheduled,
    Exhausted(u32),
}

/// Drives the transport connection for one session.
pub struct ConnectionManager {
    session: Arc<Session>,
    transport: Arc<dyn RelayTransport>,
    registry: Arc<ChannelRegistry>,
    policy: ReconnectPolicy,
    timer: Mutex<TimerSlot>,
    /// Bumped by every explicit disconnect; attempts started earlier are stale.
    epoch: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        session: Arc<Session>,
        transport: Arc<dyn RelayTransport>,
        registry: Arc<ChannelRegistry>,
        policy: ReconnectPolicy,
    ) -> Arc<Self> {
        Arc::new(ConnectionManager {
            session,
            transport,
            registry,
            policy,
            timer: Mutex::new(TimerSlot::default()),
            epoch: AtomicU64::new(0),
        })
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Returns true while a reconnect timer is pending.
    pub fn reconnect_pending(&self) -> bool {
        self.timer.lock().unwrap_or_else(|e| e.into_inner()).handle.is_some()
    }

    /// Connects the session.
    ///
    /// A no-op when already connected. After an exhausted reconnect cycle a
    /// manual call starts a fresh one. On failure a reconnect is scheduled and
    /// the transport error is returned, or [`Error::ExhaustedRetries`] when the
    /// attempt budget is spent.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.session.is_connected() {
            return Ok(());
        }
        if !self.policy.allows(self.session.reconnect_attempts()) {
            debug!("starting a fresh reconnect cycle");
            self.session.reset_reconnect_attempts();
        }
        Arc::clone(self).attempt().await
    }

    /// One connection attempt. Boxed so scheduled timers can call it.
    ///
    /// An attempt overtaken by [`disconnect`](Self::disconnect) leaves the
    /// session disconnected and schedules nothing.
    fn attempt(self: Arc<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let epoch = self.epoch.load(Ordering::SeqCst);
            self.cancel_timer();
            self.session.set_state(ConnectionState::Connecting);

            let connected = self.transport.connect().await;
            if self.epoch.load(Ordering::SeqCst) != epoch {
                debug!(succeeded = connected.is_ok(), "disconnected during connect attempt, discarding it");
                if connected.is_ok() && self.session.state() == ConnectionState::Disconnected {
                    if let Err(e) = self.transport.disconnect().await {
                        debug!(error = %e, "closing stale connection failed");
                    }
                }
                return Err(Error::TransientNetwork(TransportError::ConnectionClosed));
            }

            match connected {
                Ok(()) => {
                    self.session.reset_reconnect_attempts();
                    self.session.set_state(ConnectionState::Connected);
                    info!("connected to relay");
                    self.registry.rejoin_all().await;
                    self.session.emit(SessionEvent::Connected);
                    Ok(())
                }
                Err(e) => {
                    warn!(error = %e, "connection attempt failed");
                    self.session.set_state(ConnectionState::Error);
                    match self.schedule_reconnect() {
                        Schedule::Scheduled => Err(Error::TransientNetwork(e)),
                        Schedule::Exhausted(attempts) => Err(Error::ExhaustedRetries {
                            scope: RetryScope::Reconnect,
                            attempts,
                        }),
                    }
                }
            }
        })
    }

    /// Reacts to the transport reporting a dropped connection.
    pub fn handle_connection_lost(self: &Arc<Self>, reason: &str) {
        match self.session.state() {
            ConnectionState::Connected | ConnectionState::Connecting => {
                warn!(reason, "connection lost");
                self.registry.forget_subscriptions();
                self.session.set_state(ConnectionState::Error);
                self.schedule_reconnect();
            }
            state => debug!(%state, reason, "ignoring connection loss"),
        }
    }

    /// Closes the connection and cancels any pending reconnect.
    ///
    /// Membership, queued messages and offline entities are kept.
    pub async fn disconnect(&self) -> Result<()> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel_timer();
        self.registry.release_all().await;
        let closed = self.transport.disconnect().await;
        self.session.reset_reconnect_attempts();
        self.session.set_state(ConnectionState::Disconnected);
        info!("disconnected from relay");
        closed.map_err(Error::from)
    }

    fn schedule_reconnect(self: &Arc<Self>) -> Schedule {
        let attempts = self.session.reconnect_attempts();
        if !self.policy.allows(attempts) {
            warn!(attempts, "reconnect attempts exhausted");
            self.session.emit(SessionEvent::ReconnectExhausted { attempts });
            return Schedule::Exhausted(attempts);
        }

        let delay = self.policy.delay_for(attempts);
        let attempt = self.session.bump_reconnect_attempts().saturating_add(1);

        let mut slot = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.handle.take() {
            previous.abort();
        }
        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !this.claim_timer(generation) {
                return;
            }
            debug!(attempt, "reconnect timer fired");
            if let Err(e) = this.attempt().await {
                debug!(error = %e, "scheduled reconnect failed");
            }
        });
        slot.handle = Some(task.abort_handle());
        drop(slot);

        debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        self.session.emit(SessionEvent::ReconnectScheduled { attempt, delay });
        Schedule::Scheduled
    }

    /// Empties the timer slot if it still belongs to `generation`.
    fn claim_timer(&self, generation: u64) -> bool {
        let mut slot = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if slot.generation != generation {
            return false;
        }
        slot.handle = None;
        true
    }

    /// Cancels a pending reconnect without touching the connection.
    pub fn cancel_reconnect(&self) {
        self.cancel_timer();
    }

    fn cancel_timer(&self) {
        let mut slot = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        slot.generation = slot.generation.wrapping_add(1);
        if let Some(handle) = slot.handle.take() {
            handle.abort();
            debug!("pending reconnect cancelled");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
