//! Failure cache with cool-down gating.
//!
//! Prevents hot-looping on pairs whose last operation failed (transient
//! exchange errors, balances still settling). Entries are process-local;
//! losing them on restart costs one extra immediate retry, never
//! correctness.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::ledger::PairId;

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    last_failure: DateTime<Utc>,
    attempts: u32,
}

/// In-memory cache of recently failed pairs.
///
/// `mark_failed` returns the consecutive-failure count so callers can apply
/// a retry-exhaustion policy on top of the cool-down.
#[derive(Debug, Default)]
pub struct RetryCache {
    failures: Mutex<HashMap<PairId, FailureRecord>>,
}

impl RetryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for `id` at `now`. Returns the consecutive-failure
    /// count including this one.
    pub fn mark_failed(&self, id: PairId, now: DateTime<Utc>) -> u32 {
        let mut failures = self.failures.lock().expect("retry cache poisoned");
        let record = failures.entry(id).or_insert(FailureRecord {
            last_failure: now,
            attempts: 0,
        });
        record.last_failure = now;
        record.attempts += 1;
        record.attempts
    }

    /// True if `id` has no recorded failure, or its last failure is older
    /// than `cool_down`.
    pub fn is_eligible(&self, id: PairId, now: DateTime<Utc>, cool_down: Duration) -> bool {
        let failures = self.failures.lock().expect("retry cache poisoned");
        match failures.get(&id) {
            None => true,
            Some(record) => {
                let elapsed = now.signed_duration_since(record.last_failure);
                elapsed.num_milliseconds() >= cool_down.as_millis() as i64
            }
        }
    }

    /// Drop the failure record for `id`. Called on successful operations.
    pub fn clear(&self, id: PairId) {
        let mut failures = self.failures.lock().expect("retry cache poisoned");
        failures.remove(&id);
    }

    /// Number of pairs currently in cool-down tracking.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.lock().expect("retry cache poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_unknown_pair_is_eligible() {
        let cache = RetryCache::new();
        let now = Utc::now();
        assert!(cache.is_eligible(PairId::new(1), now, Duration::from_secs(300)));
    }

    #[test]
    fn test_cool_down_boundary() {
        let cache = RetryCache::new();
        let now = Utc::now();
        let cool_down = Duration::from_secs(300);

        cache.mark_failed(PairId::new(1), now);

        assert!(!cache.is_eligible(PairId::new(1), now, cool_down));
        assert!(!cache.is_eligible(
            PairId::new(1),
            now + ChronoDuration::seconds(299),
            cool_down
        ));
        assert!(cache.is_eligible(
            PairId::new(1),
            now + ChronoDuration::seconds(300),
            cool_down
        ));
    }

    #[test]
    fn test_attempt_counting_and_clear() {
        let cache = RetryCache::new();
        let now = Utc::now();

        assert_eq!(cache.mark_failed(PairId::new(7), now), 1);
        assert_eq!(cache.mark_failed(PairId::new(7), now), 2);
        assert_eq!(cache.mark_failed(PairId::new(7), now), 3);
        assert_eq!(cache.len(), 1);

        cache.clear(PairId::new(7));
        assert!(cache.is_empty());
        assert!(cache.is_eligible(PairId::new(7), now, Duration::from_secs(300)));

        // Counting restarts after a clear
        assert_eq!(cache.mark_failed(PairId::new(7), now), 1);
    }

    #[test]
    fn test_pairs_tracked_independently() {
        let cache = RetryCache::new();
        let now = Utc::now();
        let cool_down = Duration::from_secs(300);

        cache.mark_failed(PairId::new(1), now);

        assert!(!cache.is_eligible(PairId::new(1), now, cool_down));
        assert!(cache.is_eligible(PairId::new(2), now, cool_down));
    }
}
