//! Canonical social-graph state.

use serde::{Deserialize, Serialize};

use super::document::GraphScope;
use super::tags::TagBuilder;

/// Marker flag enabling content filtering for a curator.
const CONTENT_FLAG: &str = "content";

/// Marker flag enabling trending filtering for a curator.
const TRENDING_FLAG: &str = "trending";

/// Filter preferences taken from one curator's mute list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterList {
    /// Curator pubkey.
    pub pubkey: String,
    /// Relay hint.
    pub relay: String,
    /// Local petname.
    pub petname: String,
    /// Apply the curator's list to content feeds.
    pub content: bool,
    /// Apply the curator's list to trending feeds.
    pub trending: bool,
}

impl FilterList {
    /// Creates an entry with both filters enabled.
    #[must_use]
    pub fn new(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            relay: String::new(),
            petname: String::new(),
            content: true,
            trending: true,
        }
    }

    /// Parses a `["p", pubkey, relay?, petname?, flags?]` tag.
    ///
    /// Flags are matched by substring, so `"content,trending"` and
    /// `"trending content"` both enable both filters.
    #[must_use]
    pub fn from_tag(tag: &[String]) -> Option<Self> {
        let pubkey = TagBuilder::value(tag, "p")?;
        let flags = tag.get(4).map_or("", String::as_str);

        Some(Self {
            pubkey: pubkey.to_string(),
            relay: tag.get(2).cloned().unwrap_or_default(),
            petname: tag.get(3).cloned().unwrap_or_default(),
            content: flags.contains(CONTENT_FLAG),
            trending: flags.contains(TRENDING_FLAG),
        })
    }

    /// Returns the comma-joined flags.
    #[must_use]
    pub fn flags(&self) -> String {
        let mut flags = Vec::with_capacity(2);
        if self.content {
            flags.push(CONTENT_FLAG);
        }
        if self.trending {
            flags.push(TRENDING_FLAG);
        }
        flags.join(",")
    }

    /// Builds the tag this entry is published as.
    #[must_use]
    pub fn to_tag(&self) -> Vec<String> {
        TagBuilder::p_tag_with_marker(&self.pubkey, &self.relay, &self.petname, &self.flags())
    }
}

/// The client's reconciled view of the user's social graph.
///
/// Each scope carries the `created_at` of the document it was last replaced
/// by; `0` means nothing has been seen yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocialGraph {
    /// Followed pubkeys.
    pub following: Vec<String>,
    /// Timestamp of the contacts document `following` came from.
    pub following_since: u64,
    /// Full tag list of that contacts document (keeps relay hints and petnames).
    pub contact_tags: Vec<Vec<String>>,

    /// Muted pubkeys.
    pub muted: Vec<String>,
    /// Encrypted private part of the mute list, kept verbatim.
    pub muted_private: String,
    /// Timestamp of the newest accepted mute document.
    pub muted_since: u64,

    /// Filter-list curators.
    pub filter_lists: Vec<FilterList>,
    /// Timestamp of the newest accepted filter-list document.
    pub filter_lists_since: u64,

    /// Allowed pubkeys.
    pub allowlist: Vec<String>,
    /// Timestamp of the newest accepted allowlist document.
    pub allowlist_since: u64,
}

impl SocialGraph {
    /// Returns the stored timestamp for a scope.
    #[must_use]
    pub const fn since(&self, scope: GraphScope) -> u64 {
        match scope {
            GraphScope::Contacts => self.following_since,
            GraphScope::Mute => self.muted_since,
            GraphScope::FilterLists => self.filter_lists_since,
            GraphScope::Allowlist => self.allowlist_since,
        }
    }

    /// Returns true if `pubkey` is followed.
    #[must_use]
    pub fn is_following(&self, pubkey: &str) -> bool {
        self.following.iter().any(|p| p == pubkey)
    }

    /// Returns true if `pubkey` is muted.
    #[must_use]
    pub fn is_muted(&self, pubkey: &str) -> bool {
        self.muted.iter().any(|p| p == pubkey)
    }

    /// Returns true if `pubkey` is on the allowlist.
    #[must_use]
    pub fn is_allowed(&self, pubkey: &str) -> bool {
        self.allowlist.iter().any(|p| p == pubkey)
    }

    /// Looks up a filter-list curator.
    #[must_use]
    pub fn filter_list(&self, pubkey: &str) -> Option<&FilterList> {
        self.filter_lists.iter().find(|l| l.pubkey == pubkey)
    }

    /// Puts the user's own curator entry first if it is missing.
    ///
    /// Returns true if an entry was inserted.
    pub fn ensure_own_filter_list(&mut self, own_pubkey: &str) -> bool {
        if self.filter_list(own_pubkey).is_some() {
            return false;
        }
        self.filter_lists.insert(0, FilterList::new(own_pubkey));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(parts: &[&str]) -> Vec<String> {
        parts.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn filter_list_from_full_tag() {
        let list = FilterList::from_tag(&tag(&["p", "A", "wss://r", "alice", "content"])).unwrap();
        assert_eq!(list.pubkey, "A");
        assert_eq!(list.relay, "wss://r");
        assert_eq!(list.petname, "alice");
        assert!(list.content);
        assert!(!list.trending);
    }

    #[test]
    fn filter_list_from_bare_tag_has_no_flags() {
        let list = FilterList::from_tag(&tag(&["p", "A"])).unwrap();
        assert_eq!(list.relay, "");
        assert_eq!(list.petname, "");
        assert!(!list.content);
        assert!(!list.trending);
    }

    #[test]
    fn filter_list_flags_match_by_substring() {
        let list = FilterList::from_tag(&tag(&["p", "A", "", "", "trending content"])).unwrap();
        assert!(list.content);
        assert!(list.trending);
    }

    #[test]
    fn filter_list_rejects_non_p_tag() {
        assert!(FilterList::from_tag(&tag(&["d", "mutelists"])).is_none());
    }

    #[test]
    fn filter_list_tag_survives_parse() {
        let mut list = FilterList::new("A");
        list.trending = false;
        let parsed = FilterList::from_tag(&list.to_tag()).unwrap();
        assert_eq!(parsed, list);
    }

    #[test]
    fn empty_flags_string() {
        let mut list = FilterList::new("A");
        list.content = false;
        list.trending = false;
        assert_eq!(list.flags(), "");
    }

    #[test]
    fn since_per_scope() {
        let graph = SocialGraph {
            following_since: 1,
            muted_since: 2,
            filter_lists_since: 3,
            allowlist_since: 4,
            ..SocialGraph::default()
        };
        assert_eq!(graph.since(GraphScope::Contacts), 1);
        assert_eq!(graph.since(GraphScope::Mute), 2);
        assert_eq!(graph.since(GraphScope::FilterLists), 3);
        assert_eq!(graph.since(GraphScope::Allowlist), 4);
    }

    #[test]
    fn ensure_own_filter_list_inserts_at_front_once() {
        let mut graph = SocialGraph {
            filter_lists: vec![FilterList::new("B")],
            ..SocialGraph::default()
        };

        assert!(graph.ensure_own_filter_list("ME"));
        assert!(!graph.ensure_own_filter_list("ME"));
        assert_eq!(graph.filter_lists[0].pubkey, "ME");
        assert_eq!(graph.filter_lists.len(), 2);
    }
}
