//! Social-graph document types.
//!
//! A [`SocialDocument`] is the unsigned view of a Nostr event the reconciler
//! works with: kind, creation time, tags and opaque content. Signing and
//! ids belong to the transport.

use nostr::Event;
use serde::{Deserialize, Serialize};

use super::error::{GraphError, GraphResult};
use super::tags::TagBuilder;

/// Event kind for contact lists (NIP-02).
pub const KIND_CONTACTS: u16 = 3;

/// Event kind for reactions (NIP-25).
pub const KIND_REACTION: u16 = 7;

/// Event kind for mute lists (NIP-51).
pub const KIND_MUTE_LIST: u16 = 10000;

/// Event kind for categorized people lists (NIP-51).
pub const KIND_CATEGORIZED_PEOPLE: u16 = 30000;

/// `d` tag value of a categorized list used as a mute list.
pub const MUTE_IDENTIFIER: &str = "mute";

/// `d` tag value of the filter-list curator document.
pub const FILTER_LISTS_IDENTIFIER: &str = "mutelists";

/// `d` tag value of the allowlist document.
pub const ALLOWLIST_IDENTIFIER: &str = "allowlist";

/// The piece of canonical state a document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphScope {
    /// Follow list.
    Contacts,
    /// Muted pubkeys.
    Mute,
    /// Per-curator filter preferences.
    FilterLists,
    /// Allowed pubkeys.
    Allowlist,
}

impl GraphScope {
    /// All scopes, in the order they are synced at session start.
    pub const ALL: [Self; 4] = [Self::Contacts, Self::Mute, Self::FilterLists, Self::Allowlist];

    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Contacts => "contacts",
            Self::Mute => "mute",
            Self::FilterLists => "filter_lists",
            Self::Allowlist => "allowlist",
        }
    }
}

/// A tagged, timestamped social-graph document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SocialDocument {
    /// Protocol kind.
    pub kind: u16,

    /// Unix timestamp (seconds) the author created the document at.
    pub created_at: u64,

    /// Ordered tags; the first element of each is its discriminator.
    #[serde(default)]
    pub tags: Vec<Vec<String>>,

    /// Opaque content.
    #[serde(default)]
    pub content: String,
}

impl SocialDocument {
    /// Creates an empty document.
    #[must_use]
    pub const fn new(kind: u16, created_at: u64) -> Self {
        Self {
            kind,
            created_at,
            tags: Vec::new(),
            content: String::new(),
        }
    }

    /// Decodes a document from a relay payload object.
    ///
    /// Extra event fields (`id`, `pubkey`, `sig`) are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not an object or lacks `kind` or
    /// `created_at`.
    pub fn from_value(payload: serde_json::Value) -> GraphResult<Self> {
        if !payload.is_object() {
            return Err(GraphError::InvalidDocument(format!(
                "expected an object, got {payload}"
            )));
        }
        Ok(serde_json::from_value(payload)?)
    }

    /// Appends a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: Vec<String>) -> Self {
        self.tags.push(tag);
        self
    }

    /// Appends several tags.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Vec<String>>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Sets the content.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Iterates over all `p` tags.
    pub fn p_tags(&self) -> impl Iterator<Item = &[String]> {
        self.tags
            .iter()
            .map(Vec::as_slice)
            .filter(|tag| tag.first().is_some_and(|name| name == "p"))
    }

    /// Collects the pubkeys of all `p` tags, skipping duplicates.
    #[must_use]
    pub fn pubkeys(&self) -> Vec<String> {
        let mut pubkeys: Vec<String> = Vec::new();
        for tag in self.p_tags() {
            if let Some(pubkey) = tag.get(1) {
                if !pubkeys.contains(pubkey) {
                    pubkeys.push(pubkey.clone());
                }
            }
        }
        pubkeys
    }

    /// Returns true if any `d` tag carries `identifier`.
    #[must_use]
    pub fn has_identifier(&self, identifier: &str) -> bool {
        self.tags
            .iter()
            .any(|tag| TagBuilder::value(tag, "d") == Some(identifier))
    }

    /// Classifies the document, or `None` if it fails its discriminator check.
    #[must_use]
    pub fn scope(&self) -> Option<GraphScope> {
        match self.kind {
            KIND_CONTACTS => Some(GraphScope::Contacts),
            KIND_MUTE_LIST => Some(GraphScope::Mute),
            KIND_CATEGORIZED_PEOPLE if self.has_identifier(MUTE_IDENTIFIER) => {
                Some(GraphScope::Mute)
            }
            KIND_CATEGORIZED_PEOPLE if self.has_identifier(FILTER_LISTS_IDENTIFIER) => {
                Some(GraphScope::FilterLists)
            }
            KIND_CATEGORIZED_PEOPLE if self.has_identifier(ALLOWLIST_IDENTIFIER) => {
                Some(GraphScope::Allowlist)
            }
            _ => None,
        }
    }
}

impl From<&Event> for SocialDocument {
    fn from(event: &Event) -> Self {
        Self {
            kind: event.kind.as_u16(),
            created_at: event.created_at.as_u64(),
            tags: event.tags.iter().map(|tag| tag.as_slice().to_vec()).collect(),
            content: event.content.clone(),
        }
    }
}
