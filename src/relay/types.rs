//! Types for relay management.
//!
//! This module defines relay settings, connection status and publish
//! results.

use std::collections::BTreeMap;

use nostr::EventId;
use serde::{Deserialize, Serialize};

/// Read/write capability of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayPermissions {
    /// Queries are sent to the relay.
    #[serde(default = "enabled")]
    pub read: bool,
    /// Documents are published to the relay.
    #[serde(default = "enabled")]
    pub write: bool,
}

const fn enabled() -> bool {
    true
}

impl RelayPermissions {
    /// Read and write.
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
    };
}

impl Default for RelayPermissions {
    fn default() -> Self {
        Self::READ_WRITE
    }
}

/// Relay URL to capability mapping, persisted per identity.
///
/// Serializes to the object published as contacts content:
/// `{"wss://relay": {"read": true, "write": true}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelaySettings(BTreeMap<String, RelayPermissions>);

impl RelaySettings {
    /// Creates empty settings.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Settings with every URL read+write.
    #[must_use]
    pub fn read_write<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            urls.into_iter()
                .map(|url| (url.into(), RelayPermissions::READ_WRITE))
                .collect(),
        )
    }

    /// Inserts or replaces a relay, returning the previous permissions.
    pub fn insert(
        &mut self,
        url: impl Into<String>,
        permissions: RelayPermissions,
    ) -> Option<RelayPermissions> {
        self.0.insert(url.into(), permissions)
    }

    /// Removes a relay.
    pub fn remove(&mut self, url: &str) -> Option<RelayPermissions> {
        self.0.remove(url)
    }

    /// Returns the permissions of a relay.
    #[must_use]
    pub fn get(&self, url: &str) -> Option<RelayPermissions> {
        self.0.get(url).copied()
    }

    /// Returns true if the relay is configured.
    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.0.contains_key(url)
    }

    /// Returns true if no relay is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of configured relays.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Configured URLs in order.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    /// Iterates over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &RelayPermissions)> {
        self.0.iter()
    }

    /// Returns the entries of `other` whose URL is not configured yet.
    #[must_use]
    pub fn missing_from(&self, other: &Self) -> Self {
        Self(
            other
                .0
                .iter()
                .filter(|(url, _)| !self.contains(url))
                .map(|(url, permissions)| (url.clone(), *permissions))
                .collect(),
        )
    }

    /// Returns true if the relay may be published to.
    ///
    /// Relays without settings (default or priority relays) are writable.
    #[must_use]
    pub fn is_writable(&self, url: &str) -> bool {
        self.get(url).is_none_or(|p| p.write)
    }

    /// Serializes the settings as contacts document content.
    #[must_use]
    pub fn to_contacts_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parses contacts document content.
    ///
    /// Returns `None` for empty content, anything that is not a relay
    /// object, or an empty object.
    #[must_use]
    pub fn from_contacts_content(content: &str) -> Option<Self> {
        if content.trim().is_empty() {
            return None;
        }
        serde_json::from_str::<Self>(content)
            .ok()
            .filter(|settings| !settings.is_empty())
    }
}

/// Connection status for a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStatus {
    /// Connecting to the relay, or waiting to retry.
    Connecting,

    /// Connected and ready.
    Connected,

    /// Retrying stopped after the attempt limit.
    GaveUp,
}

/// Status of a single relay connection.
#[derive(Debug, Clone)]
pub struct RelayConnectionStatus {
    /// The relay URL.
    pub url: String,
    /// Current connection status.
    pub status: RelayStatus,
    /// Consecutive failed attempts.
    pub attempts: u32,
}

/// Result of publishing an event to relays.
#[derive(Debug, Clone)]
pub struct PublishResult {
    /// The event ID that was published.
    pub event_id: EventId,
    /// Relays that accepted the event.
    pub accepted_by: Vec<String>,
    /// Relays that rejected the event (with reasons).
    pub rejected_by: Vec<(String, String)>,
}

impl PublishResult {
    /// Returns true if at least one relay accepted the event.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !self.accepted_by.is_empty()
    }

    /// Returns the number of successful relays.
    #[must_use]
    pub const fn success_count(&self) -> usize {
        self.accepted_by.len()
    }

    /// Returns the total number of relays attempted.
    #[must_use]
    pub const fn total_attempted(&self) -> usize {
        self.accepted_by.len() + self.rejected_by.len()
    }
}
