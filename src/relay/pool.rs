//! The relay connection manager.
//!
//! [`RelayPool`] owns the live relay set. Connection attempts run as tasks
//! that report back on the session channel; the owner feeds those reports
//! to [`RelayPool::handle_connected`] and [`RelayPool::handle_failed`],
//! which update the live set and schedule reconnects according to the
//! [`RetryTracker`].
//!
//! Closing a live relay produces one failure report from the transport,
//! which consumes the explicit-close marker. A connect requested before
//! that report arrives is parked and started once it does, so the report
//! can never be mistaken for the new attempt's failure.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use super::backoff::{FailureAction, RetryPolicy, RetryTracker};
use super::transport::Transport;
use super::types::{RelayConnectionStatus, RelayStatus};
use crate::session::{SessionEvent, SessionSender};

/// Live relay connections and their retry state.
pub struct RelayPool<T> {
    transport: Arc<T>,
    tracker: RetryTracker,
    live: Vec<String>,
    pending: HashMap<String, JoinHandle<()>>,
    after_close: HashSet<String>,
    gave_up: HashSet<String>,
    events: SessionSender,
}

impl<T: Transport> RelayPool<T> {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(transport: Arc<T>, policy: RetryPolicy, events: SessionSender) -> Self {
        Self {
            transport,
            tracker: RetryTracker::new(policy),
            live: Vec::new(),
            pending: HashMap::new(),
            after_close: HashSet::new(),
            gave_up: HashSet::new(),
            events,
        }
    }

    /// Returns the transport.
    #[must_use]
    pub const fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns the retry bookkeeping.
    #[must_use]
    pub const fn tracker(&self) -> &RetryTracker {
        &self.tracker
    }

    /// Relays with an established connection, in connect order.
    #[must_use]
    pub fn live(&self) -> &[String] {
        &self.live
    }

    /// Returns true if `url` is connected.
    #[must_use]
    pub fn is_live(&self, url: &str) -> bool {
        self.live.iter().any(|u| u == url)
    }

    /// Returns true if an attempt for `url` is scheduled, running, or
    /// waiting for an earlier close to be reported.
    #[must_use]
    pub fn is_pending(&self, url: &str) -> bool {
        self.pending.contains_key(url) || self.after_close.contains(url)
    }

    /// Starts connecting every URL that is neither live nor pending.
    ///
    /// Returns the URLs an attempt was started for.
    pub fn connect_all<I, S>(&mut self, urls: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        urls.into_iter()
            .filter(|url| self.connect(url.as_ref()))
            .map(|url| url.as_ref().to_string())
            .collect()
    }

    /// Starts connecting `url` unless it is live or pending.
    pub fn connect(&mut self, url: &str) -> bool {
        if self.is_live(url) || self.is_pending(url) {
            return false;
        }
        self.gave_up.remove(url);
        if self.tracker.is_explicitly_closed(url) {
            log::debug!("Connecting {url} once its close is reported");
            self.after_close.insert(url.to_string());
            return true;
        }
        self.start_attempt(url);
        true
    }

    fn start_attempt(&mut self, url: &str) {
        let timeout = self.tracker.policy().base_timeout;
        self.spawn_attempt(url.to_string(), Duration::ZERO, timeout);
    }

    fn spawn_attempt(&mut self, url: String, delay: Duration, timeout: Duration) {
        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();
        let target = url.clone();

        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let event = match transport.connect(&target, timeout).await {
                Ok(()) => SessionEvent::Connected { url: target },
                Err(e) => SessionEvent::Failed {
                    url: target,
                    reason: e.to_string(),
                },
            };
            let _ = events.send(event);
        });

        if let Some(previous) = self.pending.insert(url, handle) {
            previous.abort();
        }
    }

    /// Records a successful handshake.
    ///
    /// Returns true if `url` joined the live set. A handshake nobody is
    /// waiting for any more (the relay was closed meanwhile) is undone.
    pub fn handle_connected(&mut self, url: &str) -> bool {
        if self.pending.remove(url).is_none() {
            log::debug!("Dropping stale connection to {url}");
            self.tracker.mark_explicitly_closed(url);
            self.spawn_close(url.to_string());
            return false;
        }
        if self.is_live(url) {
            return false;
        }

        self.tracker.record_connected(url, Instant::now());
        self.live.push(url.to_string());
        log::info!("Connected to relay {url}");
        true
    }

    /// Records a failed attempt or a dropped connection and schedules the
    /// reconnect, if any.
    ///
    /// Returns `None` for a report about a relay the pool no longer
    /// tracks.
    pub fn handle_failed(&mut self, url: &str, reason: &str) -> Option<FailureAction> {
        let was_pending = self.pending.remove(url).is_some();
        let was_live = self.is_live(url);
        if !was_pending && !was_live && !self.tracker.is_explicitly_closed(url) {
            log::trace!("Ignoring failure of untracked relay {url}");
            return None;
        }

        log::warn!("Connection failed to relay {url} because: {reason}");
        self.live.retain(|u| u != url);

        let action = self.tracker.record_failure(url, Instant::now());
        match action {
            FailureAction::Retry { attempt, delay } => {
                let timeout = self.tracker.policy().delay_for(attempt);
                self.spawn_attempt(url.to_string(), delay, timeout);
            }
            FailureAction::GaveUp { .. } => {
                self.gave_up.insert(url.to_string());
            }
            FailureAction::ExplicitlyClosed => {
                if self.after_close.remove(url) {
                    self.start_attempt(url);
                }
            }
        }
        Some(action)
    }

    /// Closes `url` on request.
    ///
    /// A live connection is marked so the failure its closing produces is
    /// not retried. A pending attempt is cancelled. The attempt counter is
    /// reset either way. Returns true if the relay was live.
    pub fn close(&mut self, url: &str) -> bool {
        if let Some(handle) = self.pending.remove(url) {
            handle.abort();
        }
        self.after_close.remove(url);
        self.tracker.reset(url);
        self.gave_up.remove(url);

        let was_live = self.is_live(url);
        if was_live {
            self.live.retain(|u| u != url);
            self.tracker.mark_explicitly_closed(url);
            self.spawn_close(url.to_string());
        }
        was_live
    }

    fn spawn_close(&self, url: String) {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            transport.close(&url).await;
        });
    }

    /// Status of every relay the pool is tracking.
    #[must_use]
    pub fn statuses(&self) -> Vec<RelayConnectionStatus> {
        let now = Instant::now();
        let status = |url: &String, status: RelayStatus| RelayConnectionStatus {
            url: url.clone(),
            status,
            attempts: self.tracker.attempts(url, now),
        };

        let mut statuses: Vec<RelayConnectionStatus> = self
            .live
            .iter()
            .map(|url| status(url, RelayStatus::Connected))
            .collect();
        statuses.extend(
            self.pending
                .keys()
                .chain(&self.after_close)
                .map(|url| status(url, RelayStatus::Connecting)),
        );
        statuses.extend(self.gave_up.iter().map(|url| status(url, RelayStatus::GaveUp)));
        statuses
    }

    /// Cancels all attempts and closes every live connection.
    pub async fn shutdown(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
        self.after_close.clear();
        let live = std::mem::take(&mut self.live);
        for url in &live {
            self.tracker.mark_explicitly_closed(url);
        }
        let transport = Arc::clone(&self.transport);
        futures::future::join_all(live.iter().map(|url| transport.close(url))).await;
    }
}

impl<T> Drop for RelayPool<T> {
    fn drop(&mut self) {
        for handle in self.pending.values() {
            handle.abort();
        }
    }
}
