// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Emergency declaration and stand-down broadcasts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use bcn_core::{ChannelId, Priority};

use crate::dispatch::{Delivery, MessageDispatcher};
use crate::error::{Error, Result};
use crate::registry::ChannelRegistry;
use crate::session::{EmergencyState, Session};

/// Kind of emergency notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Declared,
    StandDown,
}

/// Body of an emergency broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyNotice {
    pub kind: NoticeKind,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl EmergencyNotice {
    pub fn priority(&self) -> Priority {
        match self.kind {
            NoticeKind::Declared => Priority::EMERGENCY,
            NoticeKind::StandDown => Priority::STAND_DOWN,
        }
    }
}

/// Per-channel result of a broadcast.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Channels the notice was sent to or queued for.
    pub reached: Vec<(ChannelId, Delivery)>,
    /// Channels that refused the notice, with the error text.
    pub rejected: Vec<(ChannelId, String)>,
}

impl BroadcastReport {
    /// Returns true if nothing was broadcast.
    pub fn is_empty(&self) -> bool {
        self.reached.is_empty() && self.rejected.is_empty()
    }
}

/// Toggles the session emergency state and fans out notices.
pub struct EmergencyCoordinator {
    session: Arc<Session>,
    registry: Arc<ChannelRegistry>,
    dispatcher: Arc<MessageDispatcher>,
    transition: tokio::sync::Mutex<()>,
}

impl EmergencyCoordinator {
    pub fn new(
        session: Arc<Session>,
        registry: Arc<ChannelRegistry>,
        dispatcher: Arc<MessageDispatcher>,
    ) -> Self {
        EmergencyCoordinator {
            session,
            registry,
            dispatcher,
            transition: tokio::sync::Mutex::new(()),
        }
    }

    /// Declares an emergency.
    ///
    /// Joins the emergency channels and broadcasts one notice to every active
    /// channel. While an emergency is already active only the reason changes
    /// and nothing is broadcast.
    pub async fn declare_emergency(&self, reason: impl Into<String>) -> Result<BroadcastReport> {
        let reason = reason.into();
        let _transition = self.transition.lock().await;

        let now = Utc::now();
        let (already_active, state) = self.session.update_emergency(|e| {
            let was_active = e.active;
            e.reason = Some(reason.clone());
            if !was_active {
                e.active = true;
                e.declared_at = Some(now);
            }
            was_active
        });

        if already_active {
            info!(reason = %reason, "emergency reason updated");
            self.session.notify_emergency(&state);
            return Ok(BroadcastReport::default());
        }

        warn!(reason = %reason, "emergency declared");
        for channel_id in self.registry.resolve_emergency_channels().await {
            self.registry.join_channel(&channel_id).await;
        }

        let notice = EmergencyNotice { kind: NoticeKind::Declared, reason: Some(reason), at: now };
        let report = match self.broadcast(&notice).await {
            Ok(report) => report,
            Err(e) => {
                // The declaration did not complete; the next one must broadcast again.
                self.session.update_emergency(|state| *state = EmergencyState::default());
                warn!(error = %e, "emergency broadcast failed, declaration rolled back");
                return Err(e);
            }
        };
        self.session.notify_emergency(&state);
        Ok(report)
    }

    /// Ends the emergency with one stand-down notice per active channel.
    ///
    /// A no-op when no emergency is active.
    pub async fn resolve_emergency(&self) -> Result<BroadcastReport> {
        let _transition = self.transition.lock().await;

        let current = self.session.emergency();
        if !current.active {
            return Ok(BroadcastReport::default());
        }

        let notice = EmergencyNotice { kind: NoticeKind::StandDown, reason: current.reason, at: Utc::now() };
        let report = self.broadcast(&notice).await?;

        let ((), state) = self.session.update_emergency(|e| *e = EmergencyState::default());
        info!("emergency resolved");
        self.session.notify_emergency(&state);
        Ok(report)
    }

    async fn broadcast(&self, notice: &EmergencyNotice) -> Result<BroadcastReport> {
        let body = serde_json::to_string(notice).map_err(bcn_core::Error::from)?;
        let mut report = BroadcastReport::default();
        for channel_id in self.session.active_channels() {
            let message = self.dispatcher.compose(channel_id.clone(), body.clone(), notice.priority());
            match self.dispatcher.send(message).await {
                Ok(delivery) => report.reached.push((channel_id, delivery)),
                Err(e @ Error::Store(_)) => return Err(e),
                Err(e) => {
                    warn!(channel = %channel_id, error = %e, "emergency notice rejected");
                    report.rejected.push((channel_id, e.to_string()));
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
#[path = "emergency_tests.rs"]
mod tests;
