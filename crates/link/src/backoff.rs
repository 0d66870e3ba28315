// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Exponential reconnect backoff.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Capped exponential backoff: `min(initial * 2^attempts, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(initial_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        ReconnectPolicy { initial_delay_ms, max_delay_ms, max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the attempt that follows `attempts` earlier ones.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let shift = attempts.min(32);
        let multiplier = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
        let delay = self.initial_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Returns true if another automatic attempt is allowed.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// The full delay sequence, one entry per allowed attempt.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts).map(move |n| self.delay_for(n))
    }
}

impl From<ReconnectConfig> for ReconnectPolicy {
    fn from(config: ReconnectConfig) -> Self {
        ReconnectPolicy::new(config.initial_delay_ms, config.max_delay_ms, config.max_attempts)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectConfig::default().into()
    }
}
