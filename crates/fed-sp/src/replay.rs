//! Replay protection.
//!
//! Message ids are recorded with the instant they were first seen. An id
//! is refused while its first sighting is inside the window.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Sweep the map every this many checks.
const SWEEP_EVERY: u64 = 256;

/// Outcome of [`ReplayAttackGuard::check_and_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayCheck {
    /// First sighting inside the window. The id is now recorded.
    Accepted,
    /// The id was already consumed.
    Rejected,
}

impl ReplayCheck {
    /// Returns true for [`ReplayCheck::Accepted`].
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Sliding-window record of consumed message ids.
#[derive(Debug)]
pub struct ReplayAttackGuard {
    window: Duration,
    seen: DashMap<String, DateTime<Utc>>,
    checks: AtomicU64,
}

impl ReplayAttackGuard {
    /// Creates a guard with the given window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    /// Records `message_id` unless it was already seen inside the window.
    ///
    /// The check and the insert happen under the same shard lock, so two
    /// concurrent calls for one id never both succeed.
    pub fn check_and_record(&self, message_id: &str, now: DateTime<Utc>) -> ReplayCheck {
        let verdict = match self.seen.entry(message_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if now - *entry.get() < self.window {
                    ReplayCheck::Rejected
                } else {
                    entry.insert(now);
                    ReplayCheck::Accepted
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                ReplayCheck::Accepted
            }
        };

        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.evict_expired(now);
        }
        verdict
    }

    /// Drops ids whose first sighting left the window. Returns how many.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, first_seen| now - *first_seen < self.window);
        let evicted = before.saturating_sub(self.seen.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted consumed message ids");
        }
        evicted
    }

    /// Number of recorded ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
