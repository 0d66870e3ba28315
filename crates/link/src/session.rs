// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The session shared by all messaging components.
//!
//! One [`Session`] exists per logical relay connection. Components hold it by
//! `Arc` and never keep its lock across an await. State changes are published
//! twice: on an internal broadcast channel of [`SessionEvent`]s that drives the
//! dispatcher and reconciler, and to caller-registered observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use bcn_core::{ChannelId, InboundMessage};

use crate::dispatch::FailedDelivery;

const EVENT_BUFFER: usize = 256;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected, and no reconnect pending from an explicit disconnect.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected to the relay.
    Connected,
    /// The last attempt failed or the connection dropped.
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether the session is in a declared emergency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyState {
    pub active: bool,
    pub reason: Option<String>,
    pub declared_at: Option<DateTime<Utc>>,
}

/// Internal notifications between session components.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged { from: ConnectionState, to: ConnectionState },
    /// The connection came up and memberships were replayed.
    Connected,
    ReconnectScheduled { attempt: u32, delay: Duration },
    ReconnectExhausted { attempts: u32 },
    EmergencyChanged(EmergencyState),
    DeliveryFailed(FailedDelivery),
    /// Messages are queued while the connection is up; drain after the retry delay.
    DrainRequested,
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Caller callbacks for one kind of notification.
pub(crate) struct Observers<T> {
    callbacks: Mutex<Vec<Callback<T>>>,
}

impl<T> Observers<T> {
    fn new() -> Self {
        Observers { callbacks: Mutex::new(Vec::new()) }
    }

    fn register(&self, callback: Callback<T>) {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner()).push(callback);
    }

    fn notify(&self, value: &T) {
        // Clone out so a callback may register further observers.
        let callbacks = self.callbacks.lock().unwrap_or_else(|e| e.into_inner()).clone();
        for callback in callbacks {
            callback(value);
        }
    }
}

#[derive(Debug)]
struct SessionInner {
    state: ConnectionState,
    reconnect_attempts: u32,
    active_channels: BTreeSet<ChannelId>,
    emergency: EmergencyState,
}

/// Shared state of one logical relay session.
pub struct Session {
    inner: Mutex<SessionInner>,
    events: broadcast::Sender<SessionEvent>,
    state_observers: Observers<ConnectionState>,
    message_observers: Observers<InboundMessage>,
    emergency_observers: Observers<EmergencyState>,
    failure_observers: Observers<FailedDelivery>,
}

impl Session {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(Session {
            inner: Mutex::new(SessionInner {
                state: ConnectionState::Disconnected,
                reconnect_attempts: 0,
                active_channels: BTreeSet::new(),
                emergency: EmergencyState::default(),
            }),
            events,
            state_observers: Observers::new(),
            message_observers: Observers::new(),
            emergency_observers: Observers::new(),
            failure_observers: Observers::new(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }

    /// Channels the session is a member of, in id order.
    pub fn active_channels(&self) -> Vec<ChannelId> {
        self.lock().active_channels.iter().cloned().collect()
    }

    pub fn is_member(&self, channel_id: &ChannelId) -> bool {
        self.lock().active_channels.contains(channel_id)
    }

    pub fn emergency(&self) -> EmergencyState {
        self.lock().emergency.clone()
    }

    /// Subscribe to internal session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn on_connection_state_change(&self, callback: impl Fn(&ConnectionState) + Send + Sync + 'static) {
        self.state_observers.register(Arc::new(callback));
    }

    pub fn on_message(&self, callback: impl Fn(&InboundMessage) + Send + Sync + 'static) {
        self.message_observers.register(Arc::new(callback));
    }

    pub fn on_emergency_change(&self, callback: impl Fn(&EmergencyState) + Send + Sync + 'static) {
        self.emergency_observers.register(Arc::new(callback));
    }

    pub fn on_delivery_failure(&self, callback: impl Fn(&FailedDelivery) + Send + Sync + 'static) {
        self.failure_observers.register(Arc::new(callback));
    }

    /// Moves to `to`, returning the previous state. Notifies only on change.
    pub(crate) fn set_state(&self, to: ConnectionState) -> ConnectionState {
        let from = {
            let mut inner = self.lock();
            std::mem::replace(&mut inner.state, to)
        };
        if from != to {
            tracing::debug!(%from, %to, "session state changed");
            self.emit(SessionEvent::StateChanged { from, to });
            self.state_observers.notify(&to);
        }
        from
    }

    pub(crate) fn reset_reconnect_attempts(&self) {
        self.lock().reconnect_attempts = 0;
    }

    /// Increments the attempt counter and returns the value before the increment.
    pub(crate) fn bump_reconnect_attempts(&self) -> u32 {
        let mut inner = self.lock();
        let before = inner.reconnect_attempts;
        inner.reconnect_attempts = before.saturating_add(1);
        before
    }

    /// Records membership. Returns true if it was not recorded before.
    pub(crate) fn add_channel(&self, channel_id: ChannelId) -> bool {
        self.lock().active_channels.insert(channel_id)
    }

    /// Drops membership. Returns true if it was recorded.
    pub(crate) fn remove_channel(&self, channel_id: &ChannelId) -> bool {
        self.lock().active_channels.remove(channel_id)
    }

    /// Applies `f` to the emergency state and returns its result with the new state.
    pub(crate) fn update_emergency<R>(
        &self,
        f: impl FnOnce(&mut EmergencyState) -> R,
    ) -> (R, EmergencyState) {
        let mut inner = self.lock();
        let result = f(&mut inner.emergency);
        (result, inner.emergency.clone())
    }

    pub(crate) fn notify_emergency(&self, state: &EmergencyState) {
        self.emit(SessionEvent::EmergencyChanged(state.clone()));
        self.emergency_observers.notify(state);
    }

    pub(crate) fn notify_message(&self, message: &InboundMessage) {
        self.message_observers.notify(message);
    }

    pub(crate) fn notify_failure(&self, failure: &FailedDelivery) {
        self.emit(SessionEvent::DeliveryFailed(failure.clone()));
        self.failure_observers.notify(failure);
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No receivers is fine: nothing is listening yet.
        let _ = self.events.send(event);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("inner", &*self.lock()).finish()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
