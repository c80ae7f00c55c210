//! Per (list, destination) polling cadence and result-count memory.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// Identifies a (list, destination) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    pub list: String,
    pub destination: String,
}

impl ThrottleKey {
    pub fn new(list: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            list: list.into(),
            destination: destination.into(),
        }
    }
}

impl fmt::Display for ThrottleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.list, self.destination)
    }
}

/// Timing and count state of one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleState {
    pub last_evaluated: DateTime<Utc>,
    /// Matching-card count of the last evaluation; `None` before the first.
    pub last_count: Option<usize>,
}

/// Where a pair stands relative to its interval, without changing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Never seen; the next `should_evaluate` initializes it.
    Unseen,
    Due,
    Waiting,
}

/// Decides when a pair is due and detects nonzero-to-zero transitions.
#[derive(Debug, Default)]
pub struct ThrottleTracker {
    entries: HashMap<ThrottleKey, ThrottleState>,
}

impl ThrottleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is due at `now`.
    ///
    /// The first call for a key records `now` and returns false, so a newly
    /// registered pair stays quiet for one full interval.
    pub fn should_evaluate(
        &mut self,
        key: &ThrottleKey,
        interval_minutes: u64,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(state) = self.entries.get(key) else {
            self.entries.insert(
                key.clone(),
                ThrottleState {
                    last_evaluated: now,
                    last_count: None,
                },
            );
            return false;
        };
        interval_elapsed(state, interval_minutes, now)
    }

    /// Non-mutating counterpart of [`should_evaluate`](Self::should_evaluate).
    pub fn readiness(
        &self,
        key: &ThrottleKey,
        interval_minutes: u64,
        now: DateTime<Utc>,
    ) -> Readiness {
        match self.entries.get(key) {
            None => Readiness::Unseen,
            Some(state) if interval_elapsed(state, interval_minutes, now) => Readiness::Due,
            Some(_) => Readiness::Waiting,
        }
    }

    /// Record that `key` was evaluated at `now`.
    pub fn mark_evaluated(&mut self, key: &ThrottleKey, now: DateTime<Utc>) {
        self.entries
            .entry(key.clone())
            .and_modify(|s| s.last_evaluated = now)
            .or_insert(ThrottleState {
                last_evaluated: now,
                last_count: None,
            });
    }

    pub fn record_result_count(&mut self, key: &ThrottleKey, count: usize) {
        if let Some(state) = self.entries.get_mut(key) {
            state.last_count = Some(count);
        }
    }

    /// True iff the stored count is nonzero and `new_count` is zero.
    pub fn transitioned_to_empty(&self, key: &ThrottleKey, new_count: usize) -> bool {
        new_count == 0
            && self
                .entries
                .get(key)
                .and_then(|s| s.last_count)
                .is_some_and(|c| c > 0)
    }

    pub fn state(&self, key: &ThrottleKey) -> Option<&ThrottleState> {
        self.entries.get(key)
    }

    /// Drop one pair, so its next sighting is a first sighting.
    pub fn forget(&mut self, key: &ThrottleKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every pair of `list`, so the next sighting is a first sighting.
    pub fn forget_list(&mut self, list: &str) {
        self.entries.retain(|key, _| key.list != list);
    }

    /// Drop pairs of `list` whose destination is not in `destinations`.
    pub fn retain_destinations(&mut self, list: &str, destinations: &[String]) {
        self.entries
            .retain(|key, _| key.list != list || destinations.contains(&key.destination));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn interval_elapsed(state: &ThrottleState, interval_minutes: u64, now: DateTime<Utc>) -> bool {
    let elapsed = (now - state.last_evaluated).num_seconds();
    u64::try_from(elapsed).is_ok_and(|secs| secs >= interval_minutes.saturating_mul(60))
}
