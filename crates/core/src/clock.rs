// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Monotonic creation stamps.
//!
//! A [`Stamp`] pairs wall clock milliseconds with a sequence number so that
//! two records created in the same millisecond (or after the wall clock
//! stepped backwards) still order in creation order.
//!
//! Format: `{wall_ms}-{seq}`

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// A monotonic creation timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stamp {
    /// Wall clock time in milliseconds since Unix epoch.
    pub wall_ms: u64,
    /// Sequence number among stamps issued at the same wall time.
    pub seq: u32,
}

impl Stamp {
    pub fn new(wall_ms: u64, seq: u32) -> Self {
        Stamp { wall_ms, seq }
    }

    /// The earliest possible stamp.
    pub fn min() -> Self {
        Stamp { wall_ms: 0, seq: 0 }
    }

    /// Milliseconds elapsed between this stamp and `now_ms` (zero if in the future).
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.wall_ms)
    }
}

impl Ord for Stamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wall_ms.cmp(&other.wall_ms).then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Stamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.wall_ms, self.seq)
    }
}

impl FromStr for Stamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (wall, seq) = s
            .split_once('-')
            .ok_or_else(|| Error::InvalidStamp(format!("expected 'wall_ms-seq', got '{s}'")))?;

        let wall_ms = wall
            .parse::<u64>()
            .map_err(|_| Error::InvalidStamp(format!("invalid wall_ms '{wall}' in '{s}'")))?;
        let seq = seq
            .parse::<u32>()
            .map_err(|_| Error::InvalidStamp(format!("invalid seq '{seq}' in '{s}'")))?;

        Ok(Stamp::new(wall_ms, seq))
    }
}

/// Source of wall clock time, injectable for tests.
pub trait ClockSource: Send + Sync {
    /// Returns the current time in milliseconds since Unix epoch.
    fn now_ms(&self) -> u64;
}

/// System clock implementation using `std::time::SystemTime`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        ManualClock { now_ms: AtomicU64::new(now_ms) }
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, AtomicOrdering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, AtomicOrdering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(AtomicOrdering::SeqCst)
    }
}

impl<C: ClockSource + ?Sized> ClockSource for std::sync::Arc<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// Issues strictly increasing [`Stamp`]s.
///
/// Thread-safe. If the wall clock stalls or goes backwards the last wall time
/// is kept and the sequence number advances instead.
pub struct StampClock {
    clock: Box<dyn ClockSource>,
    last: Mutex<Stamp>,
}

impl StampClock {
    /// Creates a stamp clock driven by the system clock.
    pub fn system() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Creates a stamp clock with a custom clock source.
    pub fn with_clock(clock: impl ClockSource + 'static) -> Self {
        StampClock { clock: Box::new(clock), last: Mutex::new(Stamp::min()) }
    }

    /// Current wall time of the underlying clock source.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Issues the next stamp.
    pub fn next(&self) -> Stamp {
        let physical = self.clock.now_ms();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());

        let next = if physical > last.wall_ms {
            Stamp::new(physical, 0)
        } else {
            Stamp::new(last.wall_ms, last.seq.saturating_add(1))
        };
        *last = next;
        next
    }

    /// Makes sure later stamps sort after `seen`.
    ///
    /// Used when records persisted by an earlier process are reloaded.
    pub fn observe(&self, seen: Stamp) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if seen > *last {
            *last = seen;
        }
    }
}

impl fmt::Debug for StampClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = *self.last.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("StampClock").field("last", &last).finish()
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
