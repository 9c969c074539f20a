//! Last-write-wins merge of inbound documents into canonical state.
//!
//! Relays deliver the same document more than once and in no particular
//! order. Because a document only lands if it is strictly newer than the
//! stored timestamp for its scope, the final state does not depend on
//! delivery order for replace scopes, and re-delivery is always a no-op.

use super::document::{GraphScope, SocialDocument};
use super::state::{FilterList, SocialGraph};

/// What happened to an inbound document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The document replaced (or extended) canonical state.
    Applied(GraphScope),
    /// The document was not newer than what is stored.
    Stale {
        /// Scope of the document.
        scope: GraphScope,
        /// Timestamp already stored for the scope.
        stored: u64,
        /// Timestamp of the discarded document.
        received: u64,
    },
    /// The document failed its discriminator check or targets another scope.
    Ignored,
}

impl MergeOutcome {
    /// Returns true if canonical state changed.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Merges a document into whichever scope it classifies as.
pub fn merge_document(graph: &mut SocialGraph, document: &SocialDocument) -> MergeOutcome {
    match document.scope() {
        Some(scope) => merge_into(graph, scope, document),
        None => {
            log::debug!(
                "Ignoring kind {} document without a known discriminator",
                document.kind
            );
            MergeOutcome::Ignored
        }
    }
}

/// Merges a document only if it belongs to `scope`.
///
/// Queries are issued per scope, but a relay may answer a kind 30000 query
/// with any categorized list; those are ignored here.
pub fn merge_scoped(
    graph: &mut SocialGraph,
    scope: GraphScope,
    document: &SocialDocument,
) -> MergeOutcome {
    if document.scope() != Some(scope) {
        return MergeOutcome::Ignored;
    }
    merge_into(graph, scope, document)
}

fn merge_into(graph: &mut SocialGraph, scope: GraphScope, document: &SocialDocument) -> MergeOutcome {
    let stored = graph.since(scope);
    if document.created_at <= stored {
        log::debug!(
            "Discarding stale {} document ({} <= {stored})",
            scope.as_str(),
            document.created_at
        );
        return MergeOutcome::Stale {
            scope,
            stored,
            received: document.created_at,
        };
    }

    match scope {
        GraphScope::Contacts => merge_contacts(graph, document),
        GraphScope::Mute => merge_mute(graph, document),
        GraphScope::FilterLists => merge_filter_lists(graph, document),
        GraphScope::Allowlist => merge_allowlist(graph, document),
    }

    MergeOutcome::Applied(scope)
}

// A contacts document is the complete list, never a diff.
fn merge_contacts(graph: &mut SocialGraph, document: &SocialDocument) {
    graph.following = document.pubkeys();
    graph.contact_tags = document.tags.clone();
    graph.following_since = document.created_at;
}

fn merge_mute(graph: &mut SocialGraph, document: &SocialDocument) {
    for pubkey in document.pubkeys() {
        if !graph.is_muted(&pubkey) {
            graph.muted.push(pubkey);
        }
    }
    graph.muted_private.clone_from(&document.content);
    graph.muted_since = document.created_at;
}

fn merge_filter_lists(graph: &mut SocialGraph, document: &SocialDocument) {
    graph.filter_lists_since = document.created_at;

    let entries: Vec<FilterList> = document
        .p_tags()
        .filter_map(FilterList::from_tag)
        .collect();

    // A list without curators is an explicit clear.
    if entries.is_empty() {
        graph.filter_lists.clear();
        return;
    }

    for entry in entries {
        match graph
            .filter_lists
            .iter_mut()
            .find(|l| l.pubkey == entry.pubkey)
        {
            Some(existing) => *existing = entry,
            None => graph.filter_lists.push(entry),
        }
    }
}

fn merge_allowlist(graph: &mut SocialGraph, document: &SocialDocument) {
    graph.allowlist = document.pubkeys();
    graph.allowlist_since = document.created_at;
}
