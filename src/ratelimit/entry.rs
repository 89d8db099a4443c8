//! Per-key quota state and the fixed-window consume algorithm.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Offset used when an instant plus a duration does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Configuration for one key: how many uses fit in one recovery window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// Maximum uses allowed in the window
    pub max_uses: u64,
    /// Length of one window
    #[serde(rename = "recovery_ms", with = "millis")]
    pub recovery: Duration,
}

impl Quota {
    /// Create a new quota.
    pub fn new(max_uses: u64, recovery: Duration) -> Self {
        Self { max_uses, recovery }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Outcome of a single consume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    /// One use was consumed.
    Allowed,
    /// The window is exhausted; it expires after `retry_after`.
    Denied { retry_after: Duration },
}

/// Read-only view of an entry at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySnapshot {
    /// Uses consumed in the active window (0 once the window has expired)
    pub uses: u64,
    /// Configured ceiling
    pub max_uses: u64,
    /// Configured window length
    pub recovery: Duration,
    /// Uses still available before the window is exhausted
    pub remaining: u64,
    /// Time until the active window expires
    pub reset_after: Duration,
}

#[derive(Debug)]
struct EntryState {
    uses: u64,
    max_uses: u64,
    recovery: Duration,
    expires_at: Instant,
}

impl EntryState {
    fn consume(&mut self, now: Instant) -> Decision {
        if now >= self.expires_at {
            self.uses = 1;
            self.expires_at = instant_after(now, self.recovery);
            Decision::Allowed
        } else if self.uses < self.max_uses {
            self.uses += 1;
            Decision::Allowed
        } else {
            Decision::Denied {
                retry_after: self.expires_at - now,
            }
        }
    }
}

/// `now + span`, clamped far into the future instead of overflowing.
pub(crate) fn instant_after(now: Instant, span: Duration) -> Instant {
    now.checked_add(span).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Quota state for a single key.
///
/// Every field lives behind one mutex, held only while a decision is made.
/// A window rolls over lazily: the first consume attempt that observes
/// `now >= expires_at` starts a fresh window with that use already counted.
#[derive(Debug)]
pub struct LimitEntry {
    state: Mutex<EntryState>,
}

impl LimitEntry {
    /// Create an entry whose window is already expired, so the next use
    /// opens a fresh one.
    pub fn new(quota: Quota) -> Self {
        Self::new_at(quota, Instant::now())
    }

    /// Create an entry with its first use already consumed and a window
    /// starting now.
    pub fn consumed(quota: Quota) -> Self {
        Self::consumed_at(quota, Instant::now())
    }

    pub(crate) fn new_at(quota: Quota, now: Instant) -> Self {
        Self {
            state: Mutex::new(EntryState {
                uses: 0,
                max_uses: quota.max_uses,
                recovery: quota.recovery,
                expires_at: now,
            }),
        }
    }

    pub(crate) fn consumed_at(quota: Quota, now: Instant) -> Self {
        Self {
            state: Mutex::new(EntryState {
                uses: 1,
                max_uses: quota.max_uses,
                recovery: quota.recovery,
                expires_at: instant_after(now, quota.recovery),
            }),
        }
    }

    /// Replace the quota. The active window's use count and expiry are kept;
    /// a new `recovery` applies from the next rollover.
    pub fn reconfigure(&self, quota: Quota) {
        let mut state = self.state.lock();
        state.max_uses = quota.max_uses;
        state.recovery = quota.recovery;
    }

    /// Consume one use if the window allows it.
    ///
    /// The clock is read after the lock is acquired so that callers queued
    /// on the lock never decide on a stale instant.
    pub(crate) fn try_consume(&self) -> Decision {
        let mut state = self.state.lock();
        state.consume(Instant::now())
    }

    #[cfg(test)]
    pub(crate) fn try_consume_at(&self, now: Instant) -> Decision {
        self.state.lock().consume(now)
    }

    /// Current configuration.
    pub fn quota(&self) -> Quota {
        let state = self.state.lock();
        Quota::new(state.max_uses, state.recovery)
    }

    /// Describe the entry as of now without consuming or rolling over.
    pub fn snapshot(&self) -> EntrySnapshot {
        self.snapshot_at(Instant::now())
    }

    pub(crate) fn snapshot_at(&self, now: Instant) -> EntrySnapshot {
        let state = self.state.lock();
        let uses = if now >= state.expires_at { 0 } else { state.uses };

        EntrySnapshot {
            uses,
            max_uses: state.max_uses,
            recovery: state.recovery,
            remaining: state.max_uses.saturating_sub(uses),
            reset_after: state.expires_at.saturating_duration_since(now),
        }
    }
}
