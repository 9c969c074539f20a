//! Reusable test helpers for relay and account integration tests.
//!
//! [`MockTransport`] stands in for the relay network. It answers queries
//! from an in-memory set of documents, keeps every accepted publish, and
//! reports back through the same session channel the real transport uses.
//! Connection outcomes can be scripted per URL, and every connected relay
//! answers a query with its own EOSE.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kith_core::account::{scope_filters, AccountConfig, AccountStore, SqliteAccountStorage};
use kith_core::graph::{
    GraphScope, SocialDocument, TagBuilder, ALLOWLIST_IDENTIFIER, FILTER_LISTS_IDENTIFIER,
    KIND_CATEGORIZED_PEOPLE, KIND_CONTACTS, KIND_MUTE_LIST, MUTE_IDENTIFIER,
};
use kith_core::relay::{PublishResult, RelayEnvelope, RelayError, RelayResult, Transport};
use kith_core::{session_channel, SessionEvent, SessionReceiver, SessionSender};
use nostr::{EventId, Filter, Keys, PublicKey};

/// How long [`Harness::settle`] waits for the next event before it
/// considers the session quiet.
pub const QUIET: Duration = Duration::from_millis(100);

/// Builds a tag from string slices.
pub fn tag(parts: &[&str]) -> Vec<String> {
    parts.iter().map(ToString::to_string).collect()
}

/// A contacts document following `pubkeys`.
pub fn contacts(created_at: u64, pubkeys: &[&str]) -> SocialDocument {
    SocialDocument::new(KIND_CONTACTS, created_at)
        .with_tags(pubkeys.iter().map(|p| TagBuilder::p_tag(p)))
}

/// A mute list document muting `pubkeys`.
pub fn mute_list(created_at: u64, pubkeys: &[&str]) -> SocialDocument {
    SocialDocument::new(KIND_MUTE_LIST, created_at)
        .with_tags(pubkeys.iter().map(|p| TagBuilder::p_tag(p)))
}

/// A filter-list document with the given curator tags.
pub fn filter_lists(created_at: u64, curators: Vec<Vec<String>>) -> SocialDocument {
    SocialDocument::new(KIND_CATEGORIZED_PEOPLE, created_at)
        .with_tag(TagBuilder::d_tag(FILTER_LISTS_IDENTIFIER))
        .with_tags(curators)
}

/// An allowlist document allowing `pubkeys`.
pub fn allowlist(created_at: u64, pubkeys: &[&str]) -> SocialDocument {
    SocialDocument::new(KIND_CATEGORIZED_PEOPLE, created_at)
        .with_tag(TagBuilder::d_tag(ALLOWLIST_IDENTIFIER))
        .with_tags(pubkeys.iter().map(|p| TagBuilder::p_tag(p)))
}

/// Which documents a relay would return for a scope query.
fn answers(scope: GraphScope, document: &SocialDocument) -> bool {
    match scope {
        GraphScope::Contacts => document.kind == KIND_CONTACTS,
        GraphScope::Mute => {
            document.kind == KIND_MUTE_LIST
                || (document.kind == KIND_CATEGORIZED_PEOPLE
                    && document.has_identifier(MUTE_IDENTIFIER))
        }
        GraphScope::FilterLists => {
            document.kind == KIND_CATEGORIZED_PEOPLE
                && document.has_identifier(FILTER_LISTS_IDENTIFIER)
        }
        GraphScope::Allowlist => {
            document.kind == KIND_CATEGORIZED_PEOPLE && document.has_identifier(ALLOWLIST_IDENTIFIER)
        }
    }
}

#[derive(Default)]
struct MockState {
    outcomes: HashMap<String, VecDeque<bool>>,
    connects: Vec<(String, Duration)>,
    connected: Vec<String>,
    closes: Vec<String>,
    requests: Vec<(String, Vec<Filter>)>,
    targets: HashMap<String, Vec<String>>,
    unsubscribes: Vec<String>,
    published: Vec<(SocialDocument, Vec<String>)>,
    documents: Vec<SocialDocument>,
}

/// In-memory relay network.
pub struct MockTransport {
    owner: PublicKey,
    events: SessionSender,
    state: Mutex<MockState>,
    fail_connects: AtomicBool,
    fail_publish: AtomicBool,
    hold_queries: AtomicBool,
    report_close: AtomicBool,
}

impl MockTransport {
    /// A network where every connect succeeds and queries by `owner` are
    /// answered right away.
    pub fn new(owner: PublicKey, events: SessionSender) -> Self {
        Self {
            owner,
            events,
            state: Mutex::new(MockState::default()),
            fail_connects: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            hold_queries: AtomicBool::new(false),
            report_close: AtomicBool::new(true),
        }
    }

    /// Queues connect outcomes for `url`; once used up, the default applies.
    pub fn script(&self, url: &str, outcomes: &[bool]) {
        self.state
            .lock()
            .unwrap()
            .outcomes
            .entry(url.to_string())
            .or_default()
            .extend(outcomes.iter().copied());
    }

    /// Makes every unscripted connect fail.
    pub fn fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }

    /// Makes every publish fail.
    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Stops answering queries; they stay open until [`Self::answer`].
    pub fn hold_queries(&self, hold: bool) {
        self.hold_queries.store(hold, Ordering::SeqCst);
    }

    /// Whether closing a relay reports a failure, as a dropped socket does.
    pub fn report_close(&self, report: bool) {
        self.report_close.store(report, Ordering::SeqCst);
    }

    /// Stores a document on the "relays".
    pub fn store_document(&self, document: SocialDocument) {
        self.state.lock().unwrap().documents.push(document);
    }

    /// Reports a dropped connection for `url`.
    pub fn drop_connection(&self, url: &str) {
        self.state.lock().unwrap().connected.retain(|u| u != url);
        let _ = self.events.send(SessionEvent::Failed {
            url: url.to_string(),
            reason: "socket closed".to_string(),
        });
    }

    /// Answers an open query from every relay it was sent to.
    pub fn answer(&self, subscription_id: &str, documents: &[SocialDocument]) {
        for relay in self.targets(subscription_id) {
            self.answer_from(&relay, subscription_id, documents);
        }
    }

    /// Answers an open query from one relay: the documents, then EOSE.
    pub fn answer_from(&self, relay: &str, subscription_id: &str, documents: &[SocialDocument]) {
        let send = |envelope| {
            let _ = self.events.send(SessionEvent::Inbound {
                relay: relay.to_string(),
                envelope,
            });
        };
        for document in documents {
            send(RelayEnvelope::Event {
                subscription_id: subscription_id.to_string(),
                document: document.clone(),
            });
        }
        send(RelayEnvelope::EndOfStoredEvents {
            subscription_id: subscription_id.to_string(),
        });
    }

    /// Relays a query was sent to.
    pub fn targets(&self, subscription_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .targets
            .get(subscription_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Relays the mock currently holds a connection to.
    pub fn connected(&self) -> Vec<String> {
        self.state.lock().unwrap().connected.clone()
    }

    /// URLs and timeouts of every connect, in order.
    pub fn connects(&self) -> Vec<(String, Duration)> {
        self.state.lock().unwrap().connects.clone()
    }

    /// Number of connects to `url`.
    pub fn connect_count(&self, url: &str) -> usize {
        self.connects().iter().filter(|(u, _)| u == url).count()
    }

    /// URLs closed so far.
    pub fn closes(&self) -> Vec<String> {
        self.state.lock().unwrap().closes.clone()
    }

    /// Subscription ids and filters of every request.
    pub fn requests(&self) -> Vec<(String, Vec<Filter>)> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Subscription ids unsubscribed so far.
    pub fn unsubscribes(&self) -> Vec<String> {
        self.state.lock().unwrap().unsubscribes.clone()
    }

    /// Accepted publishes with their target relays.
    pub fn published(&self) -> Vec<(SocialDocument, Vec<String>)> {
        self.state.lock().unwrap().published.clone()
    }

    /// The last accepted document.
    pub fn last_published(&self) -> Option<SocialDocument> {
        self.published().last().map(|(document, _)| document.clone())
    }

    /// Subscription id of the last request for `scope`.
    pub fn last_request_for(&self, scope: GraphScope) -> Option<String> {
        let filters = scope_filters(scope, self.owner);
        self.requests()
            .into_iter()
            .rev()
            .find(|(_, f)| *f == filters)
            .map(|(id, _)| id)
    }

    fn scope_of(&self, filters: &[Filter]) -> Option<GraphScope> {
        GraphScope::ALL
            .into_iter()
            .find(|scope| scope_filters(*scope, self.owner) == filters)
    }
}

impl Transport for MockTransport {
    async fn connect(&self, url: &str, timeout: Duration) -> RelayResult<()> {
        let ok = {
            let mut state = self.state.lock().unwrap();
            state.connects.push((url.to_string(), timeout));
            let ok = state
                .outcomes
                .get_mut(url)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| !self.fail_connects.load(Ordering::SeqCst));
            if ok && !state.connected.iter().any(|u| u == url) {
                state.connected.push(url.to_string());
            }
            ok
        };
        if ok {
            Ok(())
        } else {
            Err(RelayError::Connection {
                url: url.to_string(),
                reason: "refused".to_string(),
            })
        }
    }

    async fn close(&self, url: &str) {
        {
            let mut state = self.state.lock().unwrap();
            state.closes.push(url.to_string());
            state.connected.retain(|u| u != url);
        }
        if self.report_close.load(Ordering::SeqCst) {
            let _ = self.events.send(SessionEvent::Failed {
                url: url.to_string(),
                reason: "closed".to_string(),
            });
        }
    }

    async fn request(
        &self,
        subscription_id: String,
        filters: Vec<Filter>,
        relays: Vec<String>,
    ) -> RelayResult<Vec<String>> {
        let scope = self.scope_of(&filters);
        let (matching, sent, unsent) = {
            let mut state = self.state.lock().unwrap();
            state.requests.push((subscription_id.clone(), filters));
            let (sent, unsent): (Vec<String>, Vec<String>) = relays
                .into_iter()
                .partition(|relay| state.connected.contains(relay));
            state
                .targets
                .entry(subscription_id.clone())
                .or_default()
                .extend(sent.iter().cloned());
            let matching: Vec<SocialDocument> = match scope {
                Some(scope) => state
                    .documents
                    .iter()
                    .filter(|d| answers(scope, d))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };
            (matching, sent, unsent)
        };
        if !self.hold_queries.load(Ordering::SeqCst) {
            for relay in &sent {
                self.answer_from(relay, &subscription_id, &matching);
            }
        }
        Ok(unsent)
    }

    async fn unsubscribe(&self, subscription_id: String) {
        self.state.lock().unwrap().unsubscribes.push(subscription_id);
    }

    async fn publish(
        &self,
        document: SocialDocument,
        relays: Vec<String>,
    ) -> RelayResult<PublishResult> {
        if relays.is_empty() {
            return Err(RelayError::NoWriteRelays);
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(RelayError::AllRelaysFailed);
        }
        let mut state = self.state.lock().unwrap();
        state.documents.push(document.clone());
        state.published.push((document, relays.clone()));
        Ok(PublishResult {
            event_id: EventId::all_zeros(),
            accepted_by: relays,
            rejected_by: Vec::new(),
        })
    }
}

/// Receives the next session event, if one arrives within [`QUIET`].
pub async fn next_event(rx: &mut SessionReceiver) -> Option<SessionEvent> {
    tokio::time::timeout(QUIET, rx.recv()).await.ok().flatten()
}

/// A store wired to a [`MockTransport`] and in-memory storage.
pub struct Harness {
    pub keys: Keys,
    pub transport: Arc<MockTransport>,
    pub store: AccountStore<MockTransport, SqliteAccountStorage>,
    pub rx: SessionReceiver,
}

impl Harness {
    /// Fast retry timings and a single default relay.
    pub fn config() -> AccountConfig {
        AccountConfig::default()
            .with_base_timeout(Duration::from_millis(2))
            .with_key_lookup_delay(Duration::from_millis(1))
            .with_default_relays(["wss://default.example.com"])
    }

    pub fn new() -> Self {
        Self::with_config(Self::config())
    }

    pub fn with_config(config: AccountConfig) -> Self {
        Self::with_storage(config, SqliteAccountStorage::in_memory().unwrap())
    }

    pub fn with_storage(config: AccountConfig, storage: SqliteAccountStorage) -> Self {
        Self::with_parts(config, storage, Keys::generate())
    }

    pub fn with_parts(config: AccountConfig, storage: SqliteAccountStorage, keys: Keys) -> Self {
        let (events, rx) = session_channel();
        let transport = Arc::new(MockTransport::new(keys.public_key(), events.clone()));
        let store = AccountStore::new(config, Arc::clone(&transport), storage, events);
        Self {
            keys,
            transport,
            store,
            rx,
        }
    }

    /// The identity's hex pubkey.
    pub fn own(&self) -> String {
        self.keys.public_key().to_hex()
    }

    /// Feeds events to the store until the session goes quiet.
    pub async fn settle(&mut self) {
        while let Some(event) = next_event(&mut self.rx).await {
            self.store.handle(event);
        }
    }

    /// Signs in and waits for the initial sync.
    pub async fn sign_in(&mut self) {
        self.store.set_public_key(self.keys.public_key());
        self.settle().await;
    }
}
