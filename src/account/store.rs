//! The account state store.
//!
//! [`AccountStore`] holds identity, relay settings and the reconciled social
//! graph, and exposes the actions the UI calls. It is driven from one
//! place: actions are plain `&mut self` calls, and everything that happens
//! on the network comes back as a [`SessionEvent`] fed to
//! [`AccountStore::handle`]. State therefore only changes between two
//! awaited events, never concurrently.
//!
//! Actions that need a round trip return an [`EditHandle`].

use std::collections::HashMap;
use std::sync::Arc;

use nostr::{Filter, Kind, PublicKey};
use tokio::task::JoinHandle;

use super::config::AccountConfig;
use super::edit::{Commit, EditHandle, EditOutcome, PendingEdit};
use super::error::{AccountError, AccountResult, StorageResult};
use super::identity::{lookup_public_key, SigningAgent};
use super::storage::AccountStorage;
use crate::graph::{
    merge_scoped, EditContext, EditId, FilterList, GraphCommit, GraphEdit, GraphScope,
    SocialDocument, SocialGraph, TagBuilder, ALLOWLIST_IDENTIFIER, FILTER_LISTS_IDENTIFIER,
    KIND_CATEGORIZED_PEOPLE, KIND_CONTACTS, KIND_MUTE_LIST, KIND_REACTION, MUTE_IDENTIFIER,
};
use crate::relay::{
    validate_relay_url, Delivery, FailureAction, PublishResult, QueryPurpose, RelayConnectionStatus,
    RelayEnvelope, RelayError, RelayPermissions, RelayPool, RelayResult, RelaySettings, Routed,
    SubscriptionRouter, SubscriptionToken, Transport,
};
use crate::session::{SessionEvent, SessionSender};

/// Content of a like reaction.
const LIKE_CONTENT: &str = "+";

/// Fetch-merge-write rounds an edit may take before a newer document
/// arriving during each send makes it give up.
const MAX_EDIT_ROUNDS: u32 = 3;

/// A state transition observers are told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// Identity set, or key lookup finished.
    Identity,
    /// The live relay set changed.
    Relays,
    /// Relay settings changed.
    RelaySettings,
    /// The follow list changed.
    Following,
    /// The mute list changed.
    Muted,
    /// Filter-list curators changed.
    FilterLists,
    /// The allowlist changed.
    Allowlist,
    /// Likes changed.
    Likes,
    /// A relay exhausted its reconnect attempts and will not be retried.
    RelayGaveUp(String),
}

type Observer = Box<dyn Fn(&StoreChange) + Send>;

/// Account, relay and social-graph state for one session.
pub struct AccountStore<T, S> {
    config: AccountConfig,
    pool: RelayPool<T>,
    router: SubscriptionRouter,
    storage: S,
    events: SessionSender,

    public_key: Option<PublicKey>,
    key_lookup_done: bool,
    sync_pending: bool,

    relay_settings: RelaySettings,
    graph: SocialGraph,
    likes: Vec<String>,

    edits: HashMap<EditId, PendingEdit>,
    next_edit: u64,
    observers: Vec<Observer>,
}

impl<T: Transport, S: AccountStorage> AccountStore<T, S> {
    /// Creates an anonymous store.
    ///
    /// `events` must be the sending half of the channel whose receiver
    /// drives [`AccountStore::handle`].
    #[must_use]
    pub fn new(config: AccountConfig, transport: Arc<T>, storage: S, events: SessionSender) -> Self {
        let pool = RelayPool::new(transport, config.retry_policy(), events.clone());
        Self {
            config,
            pool,
            router: SubscriptionRouter::new(),
            storage,
            events,
            public_key: None,
            key_lookup_done: false,
            sync_pending: false,
            relay_settings: RelaySettings::new(),
            graph: SocialGraph::default(),
            likes: Vec::new(),
            edits: HashMap::new(),
            next_edit: 0,
            observers: Vec::new(),
        }
    }

    // ==================== Accessors ====================

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &AccountConfig {
        &self.config
    }

    /// The active identity, `None` while anonymous.
    #[must_use]
    pub const fn public_key(&self) -> Option<&PublicKey> {
        self.public_key.as_ref()
    }

    /// Returns true once the startup key lookup finished.
    #[must_use]
    pub const fn is_key_lookup_done(&self) -> bool {
        self.key_lookup_done
    }

    /// Relay settings of the identity.
    #[must_use]
    pub const fn relay_settings(&self) -> &RelaySettings {
        &self.relay_settings
    }

    /// The reconciled social graph.
    #[must_use]
    pub const fn graph(&self) -> &SocialGraph {
        &self.graph
    }

    /// Followed pubkeys.
    #[must_use]
    pub fn following(&self) -> &[String] {
        &self.graph.following
    }

    /// Muted pubkeys.
    #[must_use]
    pub fn muted(&self) -> &[String] {
        &self.graph.muted
    }

    /// Filter-list curators.
    #[must_use]
    pub fn filter_lists(&self) -> &[FilterList] {
        &self.graph.filter_lists
    }

    /// Allowed pubkeys.
    #[must_use]
    pub fn allowlist(&self) -> &[String] {
        &self.graph.allowlist
    }

    /// Liked note ids.
    #[must_use]
    pub fn likes(&self) -> &[String] {
        &self.likes
    }

    /// Connected relays.
    #[must_use]
    pub fn connected_relays(&self) -> &[String] {
        self.pool.live()
    }

    /// Status of every tracked relay.
    #[must_use]
    pub fn relay_statuses(&self) -> Vec<RelayConnectionStatus> {
        self.pool.statuses()
    }

    /// Connected relays that may be published to.
    #[must_use]
    pub fn write_relays(&self) -> Vec<String> {
        self.pool
            .live()
            .iter()
            .filter(|url| self.relay_settings.is_writable(url))
            .cloned()
            .collect()
    }

    /// Number of unresolved edits.
    #[must_use]
    pub fn pending_edits(&self) -> usize {
        self.edits.len()
    }

    /// Number of open relay queries.
    #[must_use]
    pub fn open_queries(&self) -> usize {
        self.router.len()
    }

    /// Registers an observer called after every state transition.
    pub fn on_change(&mut self, observer: impl Fn(&StoreChange) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    fn notify(&self, change: &StoreChange) {
        for observer in &self.observers {
            observer(change);
        }
    }

    // ==================== Session events ====================

    /// Applies one session event.
    pub fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected { url } => self.on_connected(&url),
            SessionEvent::Failed { url, reason } => self.on_failed(&url, &reason),
            SessionEvent::Inbound { relay, envelope } => self.on_inbound(&relay, envelope),
            SessionEvent::QueryFailed { token, reason } => self.on_query_failed(token, reason),
            SessionEvent::QueryUnsent { token, relays } => self.on_query_unsent(token, &relays),
            SessionEvent::Published { edit, result } => self.on_published(edit, result),
            SessionEvent::KeyResolved(public_key) => self.on_key_resolved(public_key),
        }
    }

    fn on_connected(&mut self, url: &str) {
        if !self.pool.handle_connected(url) {
            return;
        }
        self.notify(&StoreChange::Relays);

        if self.sync_pending && self.public_key.is_some() {
            self.sync_pending = false;
            self.start_sync();
        } else {
            self.extend_sync(url);
        }
    }

    /// Sends the sync queries still in progress to a relay that joined late.
    fn extend_sync(&mut self, url: &str) {
        let Some(public_key) = self.public_key else {
            return;
        };
        for scope in GraphScope::ALL {
            let Some(token) = self.router.token_for(QueryPurpose::Sync(scope)) else {
                continue;
            };
            if self.router.extend(token, url) {
                log::debug!("{token}: syncing {} from {url} too", scope.as_str());
                self.spawn_request(token, scope_filters(scope, public_key), vec![url.to_string()]);
            }
        }
    }

    fn on_failed(&mut self, url: &str, reason: &str) {
        let action = self.pool.handle_failed(url, reason);
        self.release_queries(url);
        let Some(action) = action else {
            return;
        };
        self.notify(&StoreChange::Relays);
        if matches!(action, FailureAction::GaveUp { .. }) {
            self.notify(&StoreChange::RelayGaveUp(url.to_string()));
        }
    }

    fn on_inbound(&mut self, relay: &str, envelope: RelayEnvelope) {
        if let Some(routed) = self.router.route(relay, envelope) {
            self.on_routed(routed);
        }
    }

    /// Stops waiting on `url` in every open query.
    fn release_queries(&mut self, url: &str) {
        for routed in self.router.relay_gone(url) {
            self.on_routed(routed);
        }
    }

    fn on_query_unsent(&mut self, token: SubscriptionToken, relays: &[String]) {
        for relay in relays {
            log::debug!("{token} could not be sent to {relay}");
            if let Some(routed) = self.router.skip(token, relay) {
                self.on_routed(routed);
            }
        }
    }

    fn on_routed(&mut self, routed: Routed) {
        match (routed.purpose, routed.delivery) {
            (QueryPurpose::Sync(scope), Delivery::Document(document)) => {
                self.merge(scope, &document);
            }
            (QueryPurpose::Sync(scope), Delivery::EndOfStream) => {
                self.close_query(routed.token);
                if scope == GraphScope::FilterLists {
                    self.ensure_own_filter_list();
                }
            }
            (QueryPurpose::Edit(id), Delivery::Document(document)) => {
                let Some(scope) = self.edits.get(&id).and_then(|e| e.edit()).map(GraphEdit::scope)
                else {
                    return;
                };
                if self.merge(scope, &document) {
                    if let Some(pending) = self.edits.get_mut(&id) {
                        pending.record_merge();
                    }
                }
            }
            (QueryPurpose::Edit(id), Delivery::EndOfStream) => {
                self.close_query(routed.token);
                self.send_edit(id);
            }
        }
    }

    fn on_query_failed(&mut self, token: SubscriptionToken, reason: String) {
        match self.router.close(token) {
            Some(QueryPurpose::Edit(id)) => {
                if let Some(pending) = self.edits.remove(&id) {
                    self.resolve_edit(pending, Err(AccountError::Query(reason)));
                }
            }
            Some(QueryPurpose::Sync(scope)) => {
                log::warn!("Sync of {} failed: {reason}", scope.as_str());
            }
            None => {}
        }
    }

    fn on_published(&mut self, id: EditId, result: RelayResult<PublishResult>) {
        let Some(pending) = self.edits.remove(&id) else {
            return;
        };

        match result {
            Ok(published) => {
                log::debug!(
                    "{id} accepted by {}/{} relays",
                    published.success_count(),
                    published.total_attempted()
                );
                let applied = pending
                    .commit()
                    .cloned()
                    .is_none_or(|commit| self.apply_commit(commit));
                if applied {
                    self.resolve_edit(pending, Ok(EditOutcome::Committed));
                } else {
                    self.refetch_superseded(pending);
                }
            }
            Err(e) => {
                log::warn!("{id} was not published: {e}");
                self.resolve_edit(pending, Err(AccountError::Relay(e)));
            }
        }
    }

    fn on_key_resolved(&mut self, public_key: Option<PublicKey>) {
        self.key_lookup_done = true;
        match public_key {
            Some(public_key) => {
                log::info!("Key lookup finished: {public_key}");
                self.set_public_key(public_key);
            }
            None => {
                log::info!("Key lookup finished without a key, continuing anonymously");
                self.connect_to_relays(&RelaySettings::new());
                self.notify(&StoreChange::Identity);
            }
        }
    }

    // ==================== Identity ====================

    /// Resolves the identity from `agent` in the background.
    ///
    /// The result arrives as [`SessionEvent::KeyResolved`].
    pub fn spawn_key_lookup<A: SigningAgent>(&self, agent: Arc<A>) -> JoinHandle<()> {
        let events = self.events.clone();
        let delay = self.config.key_lookup_delay;
        tokio::spawn(async move {
            let public_key = lookup_public_key(agent.as_ref(), delay).await;
            let _ = events.send(SessionEvent::KeyResolved(public_key));
        })
    }

    /// Switches to `public_key`, loads its stored state, connects its
    /// relays and starts syncing its social graph.
    pub fn set_public_key(&mut self, public_key: PublicKey) {
        if self.public_key == Some(public_key) {
            return;
        }

        self.abandon_edits();
        for token in self.router.drain() {
            self.spawn_unsubscribe(token);
        }
        self.graph = SocialGraph::default();
        self.likes.clear();
        self.relay_settings = RelaySettings::new();
        self.public_key = Some(public_key);

        let own = public_key.to_hex();
        match self.storage.load(&own) {
            Ok(stored) => {
                self.relay_settings = stored.relay_settings;
                if stored.following_since > self.graph.following_since {
                    self.graph.following = stored.following;
                    self.graph.contact_tags = stored.following_tags;
                    self.graph.following_since = stored.following_since;
                }
                if stored.muted_since > self.graph.muted_since {
                    self.graph.muted = stored.muted;
                    self.graph.muted_private = stored.muted_private;
                    self.graph.muted_since = stored.muted_since;
                }
                self.likes = stored.likes;
            }
            Err(e) => log::warn!("Failed to load stored account: {e}"),
        }

        for change in [
            StoreChange::Identity,
            StoreChange::RelaySettings,
            StoreChange::Following,
            StoreChange::Muted,
            StoreChange::FilterLists,
            StoreChange::Allowlist,
            StoreChange::Likes,
        ] {
            self.notify(&change);
        }

        let settings = self.relay_settings.clone();
        self.connect_to_relays(&settings);

        if self.pool.live().is_empty() {
            self.sync_pending = true;
        } else {
            self.start_sync();
        }
    }

    fn start_sync(&mut self) {
        let Some(public_key) = self.public_key else {
            return;
        };
        for scope in GraphScope::ALL {
            if let Some(token) = self.router.token_for(QueryPurpose::Sync(scope)) {
                self.close_query(token);
            }
            self.open_query(QueryPurpose::Sync(scope), scope_filters(scope, public_key));
        }
    }

    fn ensure_own_filter_list(&mut self) {
        let Some(own) = self.own_hex() else {
            return;
        };
        if self.graph.ensure_own_filter_list(&own) {
            self.notify(&StoreChange::FilterLists);
        }
    }

    fn own_hex(&self) -> Option<String> {
        self.public_key.as_ref().map(PublicKey::to_hex)
    }

    // ==================== Relays ====================

    /// Connects `settings` (or the default relays when empty) plus the
    /// priority relays when enabled. Live or pending relays are skipped.
    pub fn connect_to_relays(&mut self, settings: &RelaySettings) {
        let mut urls = if settings.is_empty() {
            self.config.default_relays.clone()
        } else {
            settings.urls()
        };
        if self.config.connect_to_priority_relays {
            for url in &self.config.priority_relays {
                if !urls.contains(url) {
                    urls.push(url.clone());
                }
            }
        }
        self.pool.connect_all(urls);
    }

    /// Replaces or merges relay settings, then connects.
    ///
    /// Replacing closes every relay that is no longer configured. Merging
    /// only adds URLs that are not configured yet, and does nothing if
    /// there are none.
    pub fn set_relay_settings(&mut self, settings: RelaySettings, replace: bool) {
        if replace {
            for url in self.relay_settings.urls() {
                if !settings.contains(&url) {
                    self.close_relay(&url);
                }
            }
            self.relay_settings = settings;
        } else {
            let missing = self.relay_settings.missing_from(&settings);
            if missing.is_empty() {
                return;
            }
            for (url, permissions) in missing.iter() {
                self.relay_settings.insert(url.clone(), *permissions);
            }
        }

        self.persist(|storage, own, store| storage.save_relay_settings(own, &store.relay_settings));
        self.notify(&StoreChange::RelaySettings);

        let settings = self.relay_settings.clone();
        self.connect_to_relays(&settings);
    }

    /// Adds a relay, connects it and republishes the contacts document so
    /// its content carries the new settings.
    pub fn add_relay(&mut self, url: &str) -> EditHandle {
        if let Err(e) = validate_relay_url(url) {
            return EditHandle::ready(self.next_edit_id(), Err(e.into()));
        }

        let mut added = RelaySettings::new();
        added.insert(url, RelayPermissions::READ_WRITE);
        self.set_relay_settings(added, false);

        self.republish_contacts()
    }

    /// Closes and forgets a relay, then republishes the contacts document.
    pub fn remove_relay(&mut self, url: &str) -> EditHandle {
        if self.close_relay(url) {
            self.notify(&StoreChange::Relays);
        }
        if self.relay_settings.remove(url).is_some() {
            self.persist(|storage, own, store| {
                storage.save_relay_settings(own, &store.relay_settings)
            });
            self.notify(&StoreChange::RelaySettings);
        }

        self.republish_contacts()
    }

    fn republish_contacts(&mut self) -> EditHandle {
        if self.public_key.is_none() {
            return EditHandle::ready(self.next_edit_id(), Ok(EditOutcome::Unchanged));
        }
        self.begin_edit(GraphEdit::RepublishContacts)
    }

    /// Turns priority relays on (connect) or off (close).
    pub fn set_connect_to_priority_relays(&mut self, flag: bool) {
        self.config.connect_to_priority_relays = flag;
        let priority = self.config.priority_relays.clone();
        if flag {
            self.pool.connect_all(&priority);
        } else {
            for url in &priority {
                if !self.relay_settings.contains(url) {
                    self.close_relay(url);
                }
            }
        }
        self.notify(&StoreChange::Relays);
    }

    /// Closes `url` on request and stops waiting on it in open queries.
    fn close_relay(&mut self, url: &str) -> bool {
        let was_live = self.pool.close(url);
        self.release_queries(url);
        was_live
    }

    /// Closes every default relay and resets its attempt counter.
    pub fn disconnect_default_relays(&mut self) {
        let defaults = self.config.default_relays.clone();
        for url in &defaults {
            self.close_relay(url);
        }
        self.notify(&StoreChange::Relays);
    }

    // ==================== Social graph ====================

    /// Follows `pubkey`.
    pub fn add_follow(&mut self, pubkey: &str) -> EditHandle {
        self.begin_edit(GraphEdit::Follow(pubkey.to_string()))
    }

    /// Unfollows `pubkey`.
    pub fn remove_follow(&mut self, pubkey: &str) -> EditHandle {
        self.begin_edit(GraphEdit::Unfollow(pubkey.to_string()))
    }

    /// Mutes `pubkey`.
    pub fn add_to_mute_list(&mut self, pubkey: &str) -> EditHandle {
        self.begin_edit(GraphEdit::Mute(pubkey.to_string()))
    }

    /// Unmutes `pubkey`.
    pub fn remove_from_mute_list(&mut self, pubkey: &str) -> EditHandle {
        self.begin_edit(GraphEdit::Unmute(pubkey.to_string()))
    }

    /// Adds a filter-list curator with both filters on.
    pub fn add_filter_list(&mut self, pubkey: &str) -> EditHandle {
        self.begin_edit(GraphEdit::AddFilterList(pubkey.to_string()))
    }

    /// Removes a filter-list curator. The user's own entry stays.
    pub fn remove_filter_list(&mut self, pubkey: &str) -> EditHandle {
        self.begin_edit(GraphEdit::RemoveFilterList(pubkey.to_string()))
    }

    /// Changes a curator's filter flags.
    pub fn update_filter_list(&mut self, pubkey: &str, content: bool, trending: bool) -> EditHandle {
        self.begin_edit(GraphEdit::UpdateFilterList {
            pubkey: pubkey.to_string(),
            content,
            trending,
        })
    }

    /// Adds `pubkey` to the allowlist.
    pub fn add_to_allowlist(&mut self, pubkey: &str) -> EditHandle {
        self.begin_edit(GraphEdit::Allow(pubkey.to_string()))
    }

    /// Removes `pubkey` from the allowlist.
    pub fn remove_from_allowlist(&mut self, pubkey: &str) -> EditHandle {
        self.begin_edit(GraphEdit::Disallow(pubkey.to_string()))
    }

    /// Likes a note: publishes a reaction and records it on success.
    pub fn add_like(&mut self, event_id: &str, author: &str) -> EditHandle {
        let id = self.next_edit_id();
        if self.public_key.is_none() {
            return EditHandle::ready(id, Err(AccountError::Anonymous));
        }
        if self.likes.iter().any(|liked| liked == event_id) {
            return EditHandle::ready(id, Ok(EditOutcome::Unchanged));
        }
        let relays = self.write_relays();
        if relays.is_empty() {
            return EditHandle::ready(id, Err(RelayError::NoWriteRelays.into()));
        }

        let document = SocialDocument::new(KIND_REACTION, unix_now())
            .with_tags([TagBuilder::e_tag(event_id), TagBuilder::p_tag(author)])
            .with_content(LIKE_CONTENT);
        let (pending, handle) = PendingEdit::sending(id, Commit::Like(event_id.to_string()));
        self.edits.insert(id, pending);
        self.spawn_publish(id, document, relays);
        handle
    }

    fn next_edit_id(&mut self) -> EditId {
        self.next_edit += 1;
        EditId(self.next_edit)
    }

    /// Starts the fetch-merge-write protocol for `edit`.
    ///
    /// Edits of one scope run one at a time; a later one waits in
    /// `Queued` until the one before it resolved.
    fn begin_edit(&mut self, edit: GraphEdit) -> EditHandle {
        let id = self.next_edit_id();
        let Some(own) = self.own_hex() else {
            return EditHandle::ready(id, Err(AccountError::Anonymous));
        };
        if !edit.precheck(&self.graph, &own) {
            return EditHandle::ready(id, Ok(EditOutcome::Unchanged));
        }
        if self.pool.live().is_empty() {
            return EditHandle::ready(id, Err(no_relays()));
        }

        let scope = edit.scope();
        let busy = self.edit_in_flight(scope);
        let (pending, handle) = PendingEdit::queued(id, edit);
        self.edits.insert(id, pending);
        if busy {
            log::debug!("{id}: queued behind another {} edit", scope.as_str());
        } else {
            self.start_fetch(id);
        }
        handle
    }

    /// Sends the fetch-before-write query of a graph edit.
    fn start_fetch(&mut self, id: EditId) {
        let Some(scope) = self
            .edits
            .get(&id)
            .and_then(PendingEdit::edit)
            .map(GraphEdit::scope)
        else {
            return;
        };
        let public_key = match self.public_key {
            Some(public_key) if !self.pool.live().is_empty() => public_key,
            other => {
                let error = if other.is_none() {
                    AccountError::Anonymous
                } else {
                    no_relays()
                };
                if let Some(pending) = self.edits.remove(&id) {
                    self.resolve_edit(pending, Err(error));
                }
                return;
            }
        };

        log::debug!("{id}: fetching latest {} before write", scope.as_str());
        let token = self.open_query(QueryPurpose::Edit(id), scope_filters(scope, public_key));
        if let Some(pending) = self.edits.get_mut(&id) {
            pending.begin_fetch(token);
        }
    }

    /// Returns true if an edit of `scope` is fetching or sending.
    fn edit_in_flight(&self, scope: GraphScope) -> bool {
        self.edits.values().any(|pending| {
            !pending.is_queued() && pending.edit().is_some_and(|edit| edit.scope() == scope)
        })
    }

    /// Resolves an edit that was removed from the table and starts the
    /// next queued edit of its scope.
    fn resolve_edit(&mut self, pending: PendingEdit, result: AccountResult<EditOutcome>) {
        let scope = pending.edit().map(GraphEdit::scope);
        pending.resolve(result);
        let Some(scope) = scope else {
            return;
        };
        if self.edit_in_flight(scope) {
            return;
        }
        let next = self
            .edits
            .values()
            .filter(|pending| {
                pending.is_queued() && pending.edit().is_some_and(|edit| edit.scope() == scope)
            })
            .map(PendingEdit::id)
            .min();
        if let Some(id) = next {
            self.start_fetch(id);
        }
    }

    /// Runs fetch-merge-write again for an edit whose published document
    /// lost to a newer one that arrived while it was being sent.
    fn refetch_superseded(&mut self, pending: PendingEdit) {
        let id = pending.id();
        if pending.rounds() >= MAX_EDIT_ROUNDS {
            log::warn!("{id}: superseded {} times, giving up", pending.rounds());
            self.resolve_edit(pending, Err(AccountError::Superseded));
            return;
        }
        log::debug!("{id}: superseded by a newer document, fetching again");
        self.edits.insert(id, pending);
        self.start_fetch(id);
    }

    /// Builds and publishes the document of an edit whose fetch finished.
    fn send_edit(&mut self, id: EditId) {
        let Some(mut pending) = self.edits.remove(&id) else {
            return;
        };
        let (Some(edit), Some(own)) = (pending.edit().cloned(), self.own_hex()) else {
            self.resolve_edit(pending, Err(AccountError::Anonymous));
            return;
        };

        let ctx = EditContext {
            now: unix_now(),
            contacts_content: self.relay_settings.to_contacts_content(),
            own_pubkey: own,
        };
        let Some(proposal) = edit.propose(&self.graph, &ctx) else {
            log::debug!("{id}: nothing to change after merge");
            self.resolve_edit(pending, Ok(EditOutcome::Unchanged));
            return;
        };

        let relays = self.write_relays();
        if relays.is_empty() {
            self.resolve_edit(pending, Err(RelayError::NoWriteRelays.into()));
            return;
        }

        pending.start_sending(Commit::Graph(proposal.commit));
        self.edits.insert(id, pending);
        self.spawn_publish(id, proposal.document, relays);
    }

    fn abandon_edits(&mut self) {
        for (_, pending) in self.edits.drain() {
            pending.resolve(Err(AccountError::Abandoned));
        }
    }

    /// Merges an inbound document; returns true if state changed.
    fn merge(&mut self, scope: GraphScope, document: &SocialDocument) -> bool {
        if !merge_scoped(&mut self.graph, scope, document).is_applied() {
            return false;
        }

        match scope {
            GraphScope::Contacts => {
                if let Some(settings) = RelaySettings::from_contacts_content(&document.content) {
                    if settings != self.relay_settings {
                        self.set_relay_settings(settings, true);
                    }
                }
                self.persist_following();
                self.notify(&StoreChange::Following);
            }
            GraphScope::Mute => {
                self.persist_muted();
                self.notify(&StoreChange::Muted);
            }
            GraphScope::FilterLists => self.notify(&StoreChange::FilterLists),
            GraphScope::Allowlist => self.notify(&StoreChange::Allowlist),
        }
        true
    }

    /// Applies an acknowledged commit. Returns false if a newer document
    /// was merged while it was being sent.
    fn apply_commit(&mut self, commit: Commit) -> bool {
        match commit {
            Commit::Graph(commit) => {
                let scope = commit.scope();
                if commit_since(&commit) <= self.graph.since(scope) {
                    log::debug!("Published {} superseded meanwhile", scope.as_str());
                    return false;
                }
                commit.apply(&mut self.graph);
                match scope {
                    GraphScope::Contacts => {
                        self.persist_following();
                        self.notify(&StoreChange::Following);
                    }
                    GraphScope::Mute => {
                        self.persist_muted();
                        self.notify(&StoreChange::Muted);
                    }
                    GraphScope::FilterLists => self.notify(&StoreChange::FilterLists),
                    GraphScope::Allowlist => self.notify(&StoreChange::Allowlist),
                }
            }
            Commit::Like(event_id) => {
                if !self.likes.contains(&event_id) {
                    self.likes.push(event_id);
                }
                self.persist(|storage, own, store| storage.save_likes(own, &store.likes));
                self.notify(&StoreChange::Likes);
            }
        }
        true
    }

    // ==================== Persistence ====================

    fn persist(&self, save: impl FnOnce(&S, &str, &Self) -> StorageResult<()>) {
        let Some(own) = self.own_hex() else {
            return;
        };
        if let Err(e) = save(&self.storage, &own, self) {
            log::warn!("Failed to persist account state: {e}");
        }
    }

    fn persist_following(&self) {
        self.persist(|storage, own, store| {
            storage.save_following(
                own,
                &store.graph.following,
                &store.graph.contact_tags,
                store.graph.following_since,
            )
        });
    }

    fn persist_muted(&self) {
        self.persist(|storage, own, store| {
            storage.save_muted(
                own,
                &store.graph.muted,
                &store.graph.muted_private,
                store.graph.muted_since,
            )
        });
    }

    // ==================== Tasks ====================

    fn close_query(&mut self, token: SubscriptionToken) {
        if self.router.close(token).is_some() {
            self.spawn_unsubscribe(token);
        }
    }

    /// Sends a query to every live relay and waits on all of them.
    fn open_query(&mut self, purpose: QueryPurpose, filters: Vec<Filter>) -> SubscriptionToken {
        let relays = self.pool.live().to_vec();
        let token = self.router.open(purpose, relays.iter().cloned());
        self.spawn_request(token, filters, relays);
        token
    }

    fn spawn_request(&self, token: SubscriptionToken, filters: Vec<Filter>, relays: Vec<String>) {
        let transport = Arc::clone(self.pool.transport());
        let events = self.events.clone();
        tokio::spawn(async move {
            let event = match transport.request(token.to_string(), filters, relays).await {
                Ok(unsent) if unsent.is_empty() => return,
                Ok(unsent) => SessionEvent::QueryUnsent {
                    token,
                    relays: unsent,
                },
                Err(e) => SessionEvent::QueryFailed {
                    token,
                    reason: e.to_string(),
                },
            };
            let _ = events.send(event);
        });
    }

    fn spawn_unsubscribe(&self, token: SubscriptionToken) {
        let transport = Arc::clone(self.pool.transport());
        tokio::spawn(async move {
            transport.unsubscribe(token.to_string()).await;
        });
    }

    fn spawn_publish(&self, edit: EditId, document: SocialDocument, relays: Vec<String>) {
        let transport = Arc::clone(self.pool.transport());
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = transport.publish(document, relays).await;
            let _ = events.send(SessionEvent::Published { edit, result });
        });
    }

    /// Resolves pending edits as abandoned, ends open queries and closes
    /// every connection.
    pub async fn shutdown(&mut self) {
        self.abandon_edits();
        let transport = Arc::clone(self.pool.transport());
        let tokens = self.router.drain();
        futures::future::join_all(
            tokens
                .iter()
                .map(|token| transport.unsubscribe(token.to_string())),
        )
        .await;
        self.pool.shutdown().await;
    }
}

/// Query for the newest documents of one scope authored by `author`.
///
/// The mute scope needs two filters: the mute list has no identifier, and
/// the categorized mute list is only one of the author's kind-30000 lists.
#[must_use]
pub fn scope_filters(scope: GraphScope, author: PublicKey) -> Vec<Filter> {
    let filter = Filter::new().author(author);
    let categorized = filter.clone().kind(Kind::from(KIND_CATEGORIZED_PEOPLE));
    match scope {
        GraphScope::Contacts => vec![filter.kind(Kind::from(KIND_CONTACTS))],
        GraphScope::Mute => vec![
            filter.kind(Kind::from(KIND_MUTE_LIST)),
            categorized.identifier(MUTE_IDENTIFIER),
        ],
        GraphScope::FilterLists => vec![categorized.identifier(FILTER_LISTS_IDENTIFIER)],
        GraphScope::Allowlist => vec![categorized.identifier(ALLOWLIST_IDENTIFIER)],
    }
}

fn no_relays() -> AccountError {
    AccountError::Query("no relays connected".to_string())
}

const fn commit_since(commit: &GraphCommit) -> u64 {
    match commit {
        GraphCommit::Following { since, .. }
        | GraphCommit::Muted { since, .. }
        | GraphCommit::FilterLists { since, .. }
        | GraphCommit::Allowlist { since, .. } => *since,
    }
}

fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}
