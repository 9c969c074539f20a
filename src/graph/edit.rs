//! Local edits to the social graph.
//!
//! An edit is computed against the canonical state *after* the latest
//! document for its scope has been fetched and merged, so a change made from
//! another session is never overwritten with a stale local copy. The result
//! is a [`Proposal`]: the document to publish and the [`GraphCommit`] to apply
//! once a relay accepts it.

use std::fmt;

use super::document::{
    GraphScope, SocialDocument, ALLOWLIST_IDENTIFIER, FILTER_LISTS_IDENTIFIER,
    KIND_CATEGORIZED_PEOPLE, KIND_CONTACTS, KIND_MUTE_LIST,
};
use super::state::{FilterList, SocialGraph};
use super::tags::TagBuilder;

/// Identifier of one in-flight edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EditId(pub u64);

impl fmt::Display for EditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edit-{}", self.0)
    }
}

/// A requested change to the social graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEdit {
    /// Add a pubkey to the follow list.
    Follow(String),
    /// Remove a pubkey from the follow list.
    Unfollow(String),
    /// Republish the follow list unchanged (carries new relay settings).
    RepublishContacts,
    /// Add a pubkey to the mute list.
    Mute(String),
    /// Remove a pubkey from the mute list.
    Unmute(String),
    /// Add a filter-list curator.
    AddFilterList(String),
    /// Remove a filter-list curator.
    RemoveFilterList(String),
    /// Change a curator's filter flags.
    UpdateFilterList {
        /// Curator pubkey.
        pubkey: String,
        /// Apply to content feeds.
        content: bool,
        /// Apply to trending feeds.
        trending: bool,
    },
    /// Add a pubkey to the allowlist.
    Allow(String),
    /// Remove a pubkey from the allowlist.
    Disallow(String),
}

/// Inputs an edit needs besides the graph itself.
#[derive(Debug, Clone, Default)]
pub struct EditContext {
    /// Current unix time in seconds.
    pub now: u64,
    /// Content for an outbound contacts document (relay settings JSON).
    pub contacts_content: String,
    /// The user's own pubkey (hex).
    pub own_pubkey: String,
}

/// State changes to apply once an outbound document is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphCommit {
    /// New follow list.
    Following {
        /// Followed pubkeys.
        pubkeys: Vec<String>,
        /// Full contact tag list.
        tags: Vec<Vec<String>>,
        /// Timestamp of the published document.
        since: u64,
    },
    /// New mute list.
    Muted {
        /// Muted pubkeys.
        pubkeys: Vec<String>,
        /// Timestamp of the published document.
        since: u64,
    },
    /// New filter-list curators.
    FilterLists {
        /// Curator entries.
        lists: Vec<FilterList>,
        /// Timestamp of the published document.
        since: u64,
    },
    /// New allowlist.
    Allowlist {
        /// Allowed pubkeys.
        pubkeys: Vec<String>,
        /// Timestamp of the published document.
        since: u64,
    },
}

impl GraphCommit {
    /// Returns the scope this commit replaces.
    #[must_use]
    pub const fn scope(&self) -> GraphScope {
        match self {
            Self::Following { .. } => GraphScope::Contacts,
            Self::Muted { .. } => GraphScope::Mute,
            Self::FilterLists { .. } => GraphScope::FilterLists,
            Self::Allowlist { .. } => GraphScope::Allowlist,
        }
    }

    /// Applies the commit to canonical state.
    pub fn apply(self, graph: &mut SocialGraph) {
        match self {
            Self::Following {
                pubkeys,
                tags,
                since,
            } => {
                graph.following = pubkeys;
                graph.contact_tags = tags;
                graph.following_since = since;
            }
            Self::Muted { pubkeys, since } => {
                graph.muted = pubkeys;
                graph.muted_since = since;
            }
            Self::FilterLists { lists, since } => {
                graph.filter_lists = lists;
                graph.filter_lists_since = since;
            }
            Self::Allowlist { pubkeys, since } => {
                graph.allowlist = pubkeys;
                graph.allowlist_since = since;
            }
        }
    }
}

/// An outbound document and the commit it enables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// Document to publish.
    pub document: SocialDocument,
    /// Commit to apply on acceptance.
    pub commit: GraphCommit,
}

/// Returns a timestamp strictly newer than `since`, preferring `now`.
#[must_use]
pub fn next_timestamp(now: u64, since: u64) -> u64 {
    now.max(since.saturating_add(1))
}

impl GraphEdit {
    /// Returns the scope this edit reads and writes.
    #[must_use]
    pub const fn scope(&self) -> GraphScope {
        match self {
            Self::Follow(_) | Self::Unfollow(_) | Self::RepublishContacts => GraphScope::Contacts,
            Self::Mute(_) | Self::Unmute(_) => GraphScope::Mute,
            Self::AddFilterList(_) | Self::RemoveFilterList(_) | Self::UpdateFilterList { .. } => {
                GraphScope::FilterLists
            }
            Self::Allow(_) | Self::Disallow(_) => GraphScope::Allowlist,
        }
    }

    /// Returns false if the edit is pointless before any fetch.
    ///
    /// Follow and mute edits are checked against the cached state up front;
    /// list edits are only checked once the latest document is merged. The
    /// user's own filter list can never be removed.
    #[must_use]
    pub fn precheck(&self, graph: &SocialGraph, own_pubkey: &str) -> bool {
        match self {
            Self::Follow(pubkey) => !graph.is_following(pubkey),
            Self::Unfollow(pubkey) => graph.is_following(pubkey),
            Self::Mute(pubkey) => !graph.is_muted(pubkey),
            Self::Unmute(pubkey) => graph.is_muted(pubkey),
            Self::RemoveFilterList(pubkey) => pubkey != own_pubkey,
            _ => true,
        }
    }

    /// Builds the outbound document from freshly merged state.
    ///
    /// Returns `None` if the merged state already satisfies the edit.
    #[must_use]
    pub fn propose(&self, graph: &SocialGraph, ctx: &EditContext) -> Option<Proposal> {
        let since = next_timestamp(ctx.now, graph.since(self.scope()));

        match self {
            Self::Follow(pubkey) => {
                if graph.is_following(pubkey) {
                    return None;
                }
                let mut pubkeys = graph.following.clone();
                pubkeys.push(pubkey.clone());
                let mut tags = graph.contact_tags.clone();
                tags.push(TagBuilder::p_tag(pubkey));
                Some(contacts_proposal(pubkeys, tags, since, ctx))
            }
            Self::Unfollow(pubkey) => {
                if !graph.is_following(pubkey) {
                    return None;
                }
                let pubkeys = without(&graph.following, pubkey);
                let tags = graph
                    .contact_tags
                    .iter()
                    .filter(|tag| TagBuilder::value(tag, "p") != Some(pubkey.as_str()))
                    .cloned()
                    .collect();
                Some(contacts_proposal(pubkeys, tags, since, ctx))
            }
            Self::RepublishContacts => Some(contacts_proposal(
                graph.following.clone(),
                graph.contact_tags.clone(),
                since,
                ctx,
            )),
            Self::Mute(pubkey) => {
                if graph.is_muted(pubkey) {
                    return None;
                }
                let mut pubkeys = graph.muted.clone();
                pubkeys.push(pubkey.clone());
                Some(mute_proposal(pubkeys, &graph.muted_private, since))
            }
            Self::Unmute(pubkey) => {
                if !graph.is_muted(pubkey) {
                    return None;
                }
                Some(mute_proposal(
                    without(&graph.muted, pubkey),
                    &graph.muted_private,
                    since,
                ))
            }
            Self::AddFilterList(pubkey) => {
                if graph.filter_list(pubkey).is_some() {
                    return None;
                }
                let mut lists = graph.filter_lists.clone();
                lists.push(FilterList::new(pubkey.clone()));
                Some(filter_lists_proposal(lists, since))
            }
            Self::RemoveFilterList(pubkey) => {
                if pubkey == &ctx.own_pubkey || graph.filter_list(pubkey).is_none() {
                    return None;
                }
                let lists = graph
                    .filter_lists
                    .iter()
                    .filter(|l| &l.pubkey != pubkey)
                    .cloned()
                    .collect();
                Some(filter_lists_proposal(lists, since))
            }
            Self::UpdateFilterList {
                pubkey,
                content,
                trending,
            } => {
                graph.filter_list(pubkey)?;
                let lists = graph
                    .filter_lists
                    .iter()
                    .map(|l| {
                        if &l.pubkey == pubkey {
                            FilterList {
                                content: *content,
                                trending: *trending,
                                ..l.clone()
                            }
                        } else {
                            l.clone()
                        }
                    })
                    .collect();
                Some(filter_lists_proposal(lists, since))
            }
            Self::Allow(pubkey) => {
                if graph.is_allowed(pubkey) {
                    return None;
                }
                let mut pubkeys = graph.allowlist.clone();
                pubkeys.push(pubkey.clone());
                Some(allowlist_proposal(pubkeys, since))
            }
            Self::Disallow(pubkey) => {
                if !graph.is_allowed(pubkey) {
                    return None;
                }
                Some(allowlist_proposal(without(&graph.allowlist, pubkey), since))
            }
        }
    }
}

fn without(pubkeys: &[String], pubkey: &str) -> Vec<String> {
    pubkeys.iter().filter(|p| *p != pubkey).cloned().collect()
}

fn contacts_proposal(
    pubkeys: Vec<String>,
    tags: Vec<Vec<String>>,
    since: u64,
    ctx: &EditContext,
) -> Proposal {
    let document = SocialDocument::new(KIND_CONTACTS, since)
        .with_tags(tags.iter().cloned())
        .with_content(ctx.contacts_content.clone());
    Proposal {
        document,
        commit: GraphCommit::Following {
            pubkeys,
            tags,
            since,
        },
    }
}

fn mute_proposal(pubkeys: Vec<String>, private: &str, since: u64) -> Proposal {
    let document = SocialDocument::new(KIND_MUTE_LIST, since)
        .with_tags(pubkeys.iter().map(|p| TagBuilder::p_tag(p)))
        .with_content(private);
    Proposal {
        document,
        commit: GraphCommit::Muted { pubkeys, since },
    }
}

fn filter_lists_proposal(lists: Vec<FilterList>, since: u64) -> Proposal {
    let document = SocialDocument::new(KIND_CATEGORIZED_PEOPLE, since)
        .with_tag(TagBuilder::d_tag(FILTER_LISTS_IDENTIFIER))
        .with_tags(lists.iter().map(FilterList::to_tag));
    Proposal {
        document,
        commit: GraphCommit::FilterLists { lists, since },
    }
}

fn allowlist_proposal(pubkeys: Vec<String>, since: u64) -> Proposal {
    let document = SocialDocument::new(KIND_CATEGORIZED_PEOPLE, since)
        .with_tag(TagBuilder::d_tag(ALLOWLIST_IDENTIFIER))
        .with_tags(pubkeys.iter().map(|p| TagBuilder::p_tag(p)));
    Proposal {
        document,
        commit: GraphCommit::Allowlist { pubkeys, since },
    }
}
