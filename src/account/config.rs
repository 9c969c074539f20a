//! Account store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::relay::RetryPolicy;

/// Environment variable holding comma-separated priority relay URLs.
pub const PRIORITY_RELAYS_ENV: &str = "KITH_PRIORITY_RELAYS";

/// Relays used when an identity has no relay settings of its own.
const DEFAULT_RELAYS: [&str; 3] = [
    "wss://relay.primal.net",
    "wss://relay.damus.io",
    "wss://nos.lol",
];

/// Configuration for an [`AccountStore`](super::AccountStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Relay connecting timeout; unit of the linear backoff.
    #[serde(with = "millis", rename = "base_timeout_ms")]
    pub base_timeout: Duration,

    /// Reconnects attempted before a relay is given up.
    pub attempt_limit: u32,

    /// Wait before the second (last) signing agent lookup.
    #[serde(with = "millis", rename = "key_lookup_delay_ms")]
    pub key_lookup_delay: Duration,

    /// Fallback relays.
    pub default_relays: Vec<String>,

    /// Relays attached to every session while
    /// `connect_to_priority_relays` is on.
    pub priority_relays: Vec<String>,

    /// Whether priority relays are attached.
    pub connect_to_priority_relays: bool,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(2),
            attempt_limit: 10,
            key_lookup_delay: Duration::from_secs(1),
            default_relays: DEFAULT_RELAYS.iter().map(ToString::to_string).collect(),
            priority_relays: Vec::new(),
            connect_to_priority_relays: true,
        }
    }
}

impl AccountConfig {
    /// Sets the base timeout.
    #[must_use]
    pub const fn with_base_timeout(mut self, base_timeout: Duration) -> Self {
        self.base_timeout = base_timeout;
        self
    }

    /// Sets the attempt limit.
    #[must_use]
    pub const fn with_attempt_limit(mut self, attempt_limit: u32) -> Self {
        self.attempt_limit = attempt_limit;
        self
    }

    /// Sets the key lookup retry delay.
    #[must_use]
    pub const fn with_key_lookup_delay(mut self, delay: Duration) -> Self {
        self.key_lookup_delay = delay;
        self
    }

    /// Replaces the default relays.
    #[must_use]
    pub fn with_default_relays(mut self, relays: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.default_relays = relays.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the priority relays.
    #[must_use]
    pub fn with_priority_relays(
        mut self,
        relays: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.priority_relays = relays.into_iter().map(Into::into).collect();
        self
    }

    /// Turns priority relays on or off.
    #[must_use]
    pub const fn with_connect_to_priority_relays(mut self, flag: bool) -> Self {
        self.connect_to_priority_relays = flag;
        self
    }

    /// Appends priority relays from [`PRIORITY_RELAYS_ENV`], if set.
    #[must_use]
    pub fn with_priority_relays_from_env(mut self) -> Self {
        if let Ok(value) = std::env::var(PRIORITY_RELAYS_ENV) {
            for url in parse_relay_list(&value) {
                if !self.priority_relays.contains(&url) {
                    self.priority_relays.push(url);
                }
            }
        }
        self
    }

    /// The retry policy derived from this configuration.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_timeout: self.base_timeout,
            attempt_limit: self.attempt_limit,
        }
    }
}

fn parse_relay_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(ToString::to_string)
        .collect()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AccountConfig::default();
        assert_eq!(config.base_timeout, Duration::from_secs(2));
        assert_eq!(config.attempt_limit, 10);
        assert_eq!(config.key_lookup_delay, Duration::from_secs(1));
        assert!(config.connect_to_priority_relays);
        assert!(!config.default_relays.is_empty());
        assert!(config.priority_relays.is_empty());
    }

    #[test]
    fn builder_methods() {
        let config = AccountConfig::default()
            .with_base_timeout(Duration::from_millis(50))
            .with_attempt_limit(3)
            .with_key_lookup_delay(Duration::ZERO)
            .with_default_relays(["wss://a"])
            .with_priority_relays(vec!["wss://p".to_string()])
            .with_connect_to_priority_relays(false);

        assert_eq!(config.retry_policy().base_timeout, Duration::from_millis(50));
        assert_eq!(config.retry_policy().attempt_limit, 3);
        assert_eq!(config.default_relays, vec!["wss://a"]);
        assert_eq!(config.priority_relays, vec!["wss://p"]);
        assert!(!config.connect_to_priority_relays);
    }

    #[test]
    fn deserializes_partial_json_in_millis() {
        let config: AccountConfig =
            serde_json::from_str(r#"{"base_timeout_ms": 500, "attempt_limit": 4}"#).unwrap();
        assert_eq!(config.base_timeout, Duration::from_millis(500));
        assert_eq!(config.attempt_limit, 4);
        assert_eq!(config.key_lookup_delay, Duration::from_secs(1));
    }

    #[test]
    fn serializes_durations_as_millis() {
        let json = serde_json::to_value(AccountConfig::default()).unwrap();
        assert_eq!(json["base_timeout_ms"], 2000);
        assert_eq!(json["key_lookup_delay_ms"], 1000);
    }

    #[test]
    fn relay_list_parsing_skips_blanks() {
        assert_eq!(
            parse_relay_list(" wss://a , ,wss://b,"),
            vec!["wss://a".to_string(), "wss://b".to_string()]
        );
        assert!(parse_relay_list("").is_empty());
    }
}
