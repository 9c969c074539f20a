//! Social-graph documents and their reconciliation.
//!
//! Follow, mute, filter and allow lists are replaceable documents published
//! by the user. Every relay may hold a different version, so the client keeps
//! a canonical copy per scope and only accepts a document whose `created_at`
//! is strictly newer than the one it already holds.
//!
//! # Scopes
//!
//! | Scope | Kind | Discriminator | Merge |
//! |-------|------|---------------|-------|
//! | Contacts | 3 | - | replace |
//! | Mute | 10000 | - | union |
//! | Mute | 30000 | `d` = `mute` | union |
//! | Filter lists | 30000 | `d` = `mutelists` | upsert by curator |
//! | Allowlist | 30000 | `d` = `allowlist` | replace |
//!
//! Local edits never touch canonical state directly. A [`GraphEdit`] turns
//! the freshly merged state into an outbound document plus a [`GraphCommit`]
//! that is applied only once a relay accepted the document.

mod document;
mod edit;
mod error;
mod reconciler;
mod state;
mod tags;

pub use document::{
    GraphScope, SocialDocument, ALLOWLIST_IDENTIFIER, FILTER_LISTS_IDENTIFIER, KIND_CATEGORIZED_PEOPLE,
    KIND_CONTACTS, KIND_MUTE_LIST, KIND_REACTION, MUTE_IDENTIFIER,
};
pub use edit::{next_timestamp, EditContext, EditId, GraphCommit, GraphEdit, Proposal};
pub use error::{GraphError, GraphResult};
pub use reconciler::{merge_document, merge_scoped, MergeOutcome};
pub use state::{FilterList, SocialGraph};
pub use tags::TagBuilder;
