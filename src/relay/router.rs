//! Subscription routing.
//!
//! Every query sent to the relays carries a [`SubscriptionToken`] issued
//! here together with the [`QueryPurpose`] it serves and the relays it was
//! sent to. Inbound envelopes are matched back to their purpose by token;
//! anything unmatched (a query that was already closed, or another client's
//! id) is dropped.
//!
//! Each targeted relay ends its answer with its own EOSE. A query reaches
//! [`Delivery::EndOfStream`] once every targeted relay has sent EOSE or left
//! the pool ([`SubscriptionRouter::relay_gone`]).
//!
//! The router does not deduplicate. Several relays answering the same query
//! deliver the same document several times; the reconciler's timestamp gate
//! absorbs the repeats.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use super::error::RelayError;
use super::message::RelayEnvelope;
use crate::graph::{EditId, GraphScope, SocialDocument};

const TOKEN_PREFIX: &str = "kith:";

/// Correlation handle of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TOKEN_PREFIX}{}", self.0)
    }
}

impl FromStr for SubscriptionToken {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(TOKEN_PREFIX)
            .and_then(|n| n.parse().ok())
            .map(Self)
            .ok_or_else(|| RelayError::Subscription(format!("foreign subscription id {s}")))
    }
}

/// What a query was opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPurpose {
    /// Initial sync of one scope at session start.
    Sync(GraphScope),
    /// Fetch-before-write of an edit.
    Edit(EditId),
}

/// Payload of a routed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// One document.
    Document(SocialDocument),
    /// Every targeted relay finished sending stored documents.
    EndOfStream,
}

/// An inbound message matched to its query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    /// The query's token.
    pub token: SubscriptionToken,
    /// The query's purpose.
    pub purpose: QueryPurpose,
    /// The payload.
    pub delivery: Delivery,
}

#[derive(Debug)]
struct OpenQuery {
    purpose: QueryPurpose,
    awaiting: HashSet<String>,
}

/// Table of open queries.
#[derive(Debug, Default)]
pub struct SubscriptionRouter {
    next_token: u64,
    active: HashMap<SubscriptionToken, OpenQuery>,
}

impl SubscriptionRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a query sent to `relays` and returns its fresh token.
    ///
    /// A query with no relays ends at the first EOSE it sees.
    pub fn open<I, S>(&mut self, purpose: QueryPurpose, relays: I) -> SubscriptionToken
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next_token += 1;
        let token = SubscriptionToken(self.next_token);
        self.active.insert(
            token,
            OpenQuery {
                purpose,
                awaiting: relays.into_iter().map(Into::into).collect(),
            },
        );
        token
    }

    /// Adds `relay` to the relays an open query waits on.
    ///
    /// Returns false if the query is closed or already waits on `relay`.
    pub fn extend(&mut self, token: SubscriptionToken, relay: &str) -> bool {
        self.active
            .get_mut(&token)
            .is_some_and(|query| query.awaiting.insert(relay.to_string()))
    }

    /// Removes a query. Later messages for it are dropped.
    pub fn close(&mut self, token: SubscriptionToken) -> Option<QueryPurpose> {
        self.active.remove(&token).map(|query| query.purpose)
    }

    /// Returns the purpose of an open query.
    #[must_use]
    pub fn purpose(&self, token: SubscriptionToken) -> Option<QueryPurpose> {
        self.active.get(&token).map(|query| query.purpose)
    }

    /// Relays an open query is still waiting on.
    #[must_use]
    pub fn awaiting(&self, token: SubscriptionToken) -> Vec<String> {
        let mut relays: Vec<String> = self
            .active
            .get(&token)
            .map(|query| query.awaiting.iter().cloned().collect())
            .unwrap_or_default();
        relays.sort();
        relays
    }

    /// Finds the open query serving `purpose`.
    #[must_use]
    pub fn token_for(&self, purpose: QueryPurpose) -> Option<SubscriptionToken> {
        self.active
            .iter()
            .find(|(_, query)| query.purpose == purpose)
            .map(|(token, _)| *token)
    }

    /// Number of open queries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Returns true if no query is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Closes every query, returning their tokens.
    pub fn drain(&mut self) -> Vec<SubscriptionToken> {
        self.active.drain().map(|(token, _)| token).collect()
    }

    /// Matches an envelope from `relay` to its open query.
    ///
    /// Returns `None` for unknown subscriptions and for an EOSE after which
    /// other targeted relays are still pending.
    pub fn route(&mut self, relay: &str, envelope: RelayEnvelope) -> Option<Routed> {
        let Some((token, query)) = envelope
            .subscription_id()
            .parse::<SubscriptionToken>()
            .ok()
            .and_then(|token| self.active.get_mut(&token).map(|query| (token, query)))
        else {
            log::trace!(
                "Dropping message for unknown subscription {}",
                envelope.subscription_id()
            );
            return None;
        };

        let delivery = match envelope {
            RelayEnvelope::Event { document, .. } => Delivery::Document(document),
            RelayEnvelope::EndOfStoredEvents { .. } => {
                query.awaiting.remove(relay);
                if !query.awaiting.is_empty() {
                    log::trace!(
                        "{token}: EOSE from {relay}, {} relays pending",
                        query.awaiting.len()
                    );
                    return None;
                }
                Delivery::EndOfStream
            }
        };
        Some(Routed {
            token,
            purpose: query.purpose,
            delivery,
        })
    }

    /// Stops waiting on `relay` for one query it never received.
    ///
    /// Returns the end of stream if that was the last relay pending.
    pub fn skip(&mut self, token: SubscriptionToken, relay: &str) -> Option<Routed> {
        let query = self.active.get_mut(&token)?;
        (query.awaiting.remove(relay) && query.awaiting.is_empty()).then(|| Routed {
            token,
            purpose: query.purpose,
            delivery: Delivery::EndOfStream,
        })
    }

    /// Stops waiting on `relay`, which left the pool.
    ///
    /// Returns the queries that were waiting on it and have now heard from
    /// every other targeted relay.
    pub fn relay_gone(&mut self, relay: &str) -> Vec<Routed> {
        let mut finished: Vec<Routed> = self
            .active
            .iter_mut()
            .filter_map(|(token, query)| {
                (query.awaiting.remove(relay) && query.awaiting.is_empty()).then(|| Routed {
                    token: *token,
                    purpose: query.purpose,
                    delivery: Delivery::EndOfStream,
                })
            })
            .collect();
        finished.sort_by_key(|routed| routed.token);
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::KIND_CONTACTS;

    const R1: &str = "wss://r1.example.com";
    const R2: &str = "wss://r2.example.com";

    fn event(token: &str) -> RelayEnvelope {
        RelayEnvelope::Event {
            subscription_id: token.to_string(),
            document: SocialDocument::new(KIND_CONTACTS, 1),
        }
    }

    fn eose(token: SubscriptionToken) -> RelayEnvelope {
        RelayEnvelope::EndOfStoredEvents {
            subscription_id: token.to_string(),
        }
    }

    #[test]
    fn token_display_and_parse() {
        let token = SubscriptionToken(42);
        assert_eq!(token.to_string(), "kith:42");
        assert_eq!("kith:42".parse::<SubscriptionToken>().unwrap(), token);
        assert!("other:42".parse::<SubscriptionToken>().is_err());
        assert!("kith:abc".parse::<SubscriptionToken>().is_err());
        assert!("42".parse::<SubscriptionToken>().is_err());
    }

    #[test]
    fn tokens_are_unique() {
        let mut router = SubscriptionRouter::new();
        let a = router.open(QueryPurpose::Sync(GraphScope::Contacts), [R1]);
        let b = router.open(QueryPurpose::Sync(GraphScope::Contacts), [R1]);
        assert_ne!(a, b);
        assert_eq!(router.len(), 2);
    }

    #[test]
    fn routes_event_and_eose_to_purpose() {
        let mut router = SubscriptionRouter::new();
        let token = router.open(QueryPurpose::Edit(EditId(3)), [R1]);

        let routed = router.route(R1, event(&token.to_string())).unwrap();
        assert_eq!(routed.token, token);
        assert_eq!(routed.purpose, QueryPurpose::Edit(EditId(3)));
        assert!(matches!(routed.delivery, Delivery::Document(_)));

        assert_eq!(
            router.route(R1, eose(token)).unwrap().delivery,
            Delivery::EndOfStream
        );
    }

    #[test]
    fn end_of_stream_waits_for_every_relay() {
        let mut router = SubscriptionRouter::new();
        let token = router.open(QueryPurpose::Sync(GraphScope::Contacts), [R1, R2]);

        assert!(router.route(R1, eose(token)).is_none());
        assert_eq!(router.awaiting(token), vec![R2.to_string()]);

        // The slower relay's documents still arrive.
        assert!(router.route(R2, event(&token.to_string())).is_some());
        assert_eq!(
            router.route(R2, eose(token)).unwrap().delivery,
            Delivery::EndOfStream
        );
    }

    #[test]
    fn eose_from_untargeted_relay_is_ignored() {
        let mut router = SubscriptionRouter::new();
        let token = router.open(QueryPurpose::Sync(GraphScope::Mute), [R1]);

        assert!(router.route(R2, eose(token)).is_none());
        assert_eq!(router.awaiting(token), vec![R1.to_string()]);
    }

    #[test]
    fn late_relay_extends_open_query() {
        let mut router = SubscriptionRouter::new();
        let token = router.open(QueryPurpose::Sync(GraphScope::Contacts), [R1]);

        assert!(router.extend(token, R2));
        assert!(!router.extend(token, R2));
        assert!(router.route(R1, eose(token)).is_none());
        assert_eq!(
            router.route(R2, eose(token)).unwrap().delivery,
            Delivery::EndOfStream
        );
        router.close(token);
        assert!(!router.extend(token, R1), "closed queries are not extended");
    }

    #[test]
    fn departed_relay_completes_query() {
        let mut router = SubscriptionRouter::new();
        let edit = router.open(QueryPurpose::Edit(EditId(1)), [R1, R2]);
        let sync = router.open(QueryPurpose::Sync(GraphScope::Allowlist), [R1]);

        assert!(router.route(R1, eose(edit)).is_none());
        let finished = router.relay_gone(R2);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].token, edit);
        assert_eq!(finished[0].delivery, Delivery::EndOfStream);

        assert!(router.relay_gone(R2).is_empty());
        assert_eq!(router.awaiting(sync), vec![R1.to_string()]);
    }

    #[test]
    fn unsent_relay_is_skipped() {
        let mut router = SubscriptionRouter::new();
        let token = router.open(QueryPurpose::Sync(GraphScope::Contacts), [R1, R2]);

        assert!(router.skip(token, R2).is_none());
        assert!(router.skip(token, R2).is_none());
        assert_eq!(
            router.skip(token, R1).map(|routed| routed.delivery),
            Some(Delivery::EndOfStream)
        );
    }

    #[test]
    fn duplicates_are_all_delivered() {
        let mut router = SubscriptionRouter::new();
        let token = router.open(QueryPurpose::Sync(GraphScope::Mute), [R1, R2]);

        let first = router.route(R1, event(&token.to_string()));
        let second = router.route(R2, event(&token.to_string()));
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_and_closed_ids_are_dropped() {
        let mut router = SubscriptionRouter::new();
        let token = router.open(QueryPurpose::Sync(GraphScope::Allowlist), [R1]);

        assert!(router.route(R1, event("someone-else")).is_none());
        assert!(router.route(R1, event("kith:999")).is_none());

        assert_eq!(
            router.close(token),
            Some(QueryPurpose::Sync(GraphScope::Allowlist))
        );
        assert!(router.route(R1, event(&token.to_string())).is_none());
        assert!(router.is_empty());
    }

    #[test]
    fn token_for_finds_open_query() {
        let mut router = SubscriptionRouter::new();
        let token = router.open(QueryPurpose::Sync(GraphScope::FilterLists), [R1]);
        assert_eq!(
            router.token_for(QueryPurpose::Sync(GraphScope::FilterLists)),
            Some(token)
        );
        assert_eq!(router.token_for(QueryPurpose::Edit(EditId(1))), None);

        assert_eq!(router.drain(), vec![token]);
        assert!(router.is_empty());
    }
}
