//! Per-relay retry bookkeeping.
//!
//! [`RetryTracker`] is the pure decision core of the connection manager: it
//! owns the attempt counters, the reliability windows and the explicit-close
//! markers, and answers "what now?" for every connect and failure. It never
//! sleeps or spawns; callers pass the current [`Instant`].

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Multiplier on the base timeout after which a live connection counts as
/// stable and its attempt counter is forgiven.
pub const STABILITY_FACTOR: u32 = 3;

/// Linear backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay unit and per-attempt connect timeout unit.
    pub base_timeout: Duration,
    /// Reconnects scheduled before giving up.
    pub attempt_limit: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(2),
            attempt_limit: 10,
        }
    }
}

impl RetryPolicy {
    /// Delay before reconnect number `attempt`; also that attempt's timeout.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_timeout.saturating_mul(attempt.max(1))
    }

    /// How long a connection must stay up before its counter resets.
    #[must_use]
    pub fn stability_window(&self) -> Duration {
        self.base_timeout.saturating_mul(STABILITY_FACTOR)
    }
}

/// What to do after a relay failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Reconnect after `delay`.
    Retry {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Time to wait before connecting.
        delay: Duration,
    },
    /// The failure was requested by the caller; do nothing.
    ExplicitlyClosed,
    /// The attempt limit is exhausted; do nothing.
    GaveUp {
        /// Attempts made.
        attempts: u32,
    },
}

#[derive(Debug, Default)]
struct RelayRecord {
    attempts: u32,
    stable_at: Option<Instant>,
}

impl RelayRecord {
    fn forgive_if_stable(&mut self, now: Instant) {
        if self.stable_at.is_some_and(|at| now >= at) {
            self.attempts = 0;
        }
    }
}

/// Attempt counters and explicit-close markers for every relay URL.
#[derive(Debug, Default)]
pub struct RetryTracker {
    policy: RetryPolicy,
    records: HashMap<String, RelayRecord>,
    explicitly_closed: HashSet<String>,
}

impl RetryTracker {
    /// Creates a tracker with the given policy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            records: HashMap::new(),
            explicitly_closed: HashSet::new(),
        }
    }

    /// Returns the policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Starts the reliability window of a fresh connection.
    pub fn record_connected(&mut self, url: &str, now: Instant) {
        let window = self.policy.stability_window();
        let record = self.records.entry(url.to_string()).or_default();
        record.stable_at = Some(now + window);
    }

    /// Decides how to react to a failed or dropped connection.
    ///
    /// A pending explicit-close marker is consumed here, so it suppresses
    /// exactly one failure.
    pub fn record_failure(&mut self, url: &str, now: Instant) -> FailureAction {
        let record = self.records.entry(url.to_string()).or_default();
        record.forgive_if_stable(now);
        record.stable_at = None;

        if self.explicitly_closed.remove(url) {
            log::debug!("Relay {url} closed on request, not reconnecting");
            return FailureAction::ExplicitlyClosed;
        }

        if record.attempts < self.policy.attempt_limit {
            record.attempts += 1;
            let attempt = record.attempts;
            log::info!(
                "Reconnecting to {url}, try {attempt} / {}",
                self.policy.attempt_limit
            );
            return FailureAction::Retry {
                attempt,
                delay: self.policy.delay_for(attempt),
            };
        }

        log::warn!("Reached attempt limit for {url}");
        FailureAction::GaveUp {
            attempts: record.attempts,
        }
    }

    /// Marks a URL so its next failure is not retried.
    pub fn mark_explicitly_closed(&mut self, url: &str) {
        self.explicitly_closed.insert(url.to_string());
    }

    /// Drops a pending explicit-close marker.
    pub fn clear_explicit_close(&mut self, url: &str) -> bool {
        self.explicitly_closed.remove(url)
    }

    /// Returns true if a close marker is pending for `url`.
    #[must_use]
    pub fn is_explicitly_closed(&self, url: &str) -> bool {
        self.explicitly_closed.contains(url)
    }

    /// Zeroes the attempt counter of `url`.
    pub fn reset(&mut self, url: &str) {
        if let Some(record) = self.records.get_mut(url) {
            record.attempts = 0;
            record.stable_at = None;
        }
    }

    /// Current attempt counter, after applying any elapsed reliability window.
    #[must_use]
    pub fn attempts(&self, url: &str, now: Instant) -> u32 {
        self.records.get(url).map_or(0, |record| {
            if record.stable_at.is_some_and(|at| now >= at) {
                0
            } else {
                record.attempts
            }
        })
    }

    /// Returns true if `url` has exhausted its attempts.
    #[must_use]
    pub fn has_given_up(&self, url: &str, now: Instant) -> bool {
        self.attempts(url, now) >= self.policy.attempt_limit
            && self
                .records
                .get(url)
                .is_some_and(|record| record.stable_at.is_none())
    }
}
