//! The session event channel.
//!
//! Connection attempts, transport notifications, publish acknowledgements
//! and the key lookup all run as tasks. None of them touch account state;
//! they report through this channel and the owner of the
//! [`AccountStore`](crate::AccountStore) feeds each event to
//! [`AccountStore::handle`](crate::AccountStore::handle), one at a time.

use nostr::PublicKey;
use tokio::sync::mpsc;

use crate::graph::EditId;
use crate::relay::{PublishResult, RelayEnvelope, RelayResult, SubscriptionToken};

/// Something that happened outside the store.
#[derive(Debug)]
pub enum SessionEvent {
    /// A relay handshake succeeded.
    Connected {
        /// The relay URL.
        url: String,
    },
    /// A connection attempt failed or a live connection dropped.
    Failed {
        /// The relay URL.
        url: String,
        /// Why.
        reason: String,
    },
    /// A relay message for one of our subscriptions.
    Inbound {
        /// The relay that sent it.
        relay: String,
        /// The message.
        envelope: RelayEnvelope,
    },
    /// A query reached some of its relays but not `relays`.
    QueryUnsent {
        /// The query's token.
        token: SubscriptionToken,
        /// Relays that did not receive it.
        relays: Vec<String>,
    },
    /// A query could not be sent.
    QueryFailed {
        /// The query's token.
        token: SubscriptionToken,
        /// Why.
        reason: String,
    },
    /// A publish finished.
    Published {
        /// The edit the document belonged to.
        edit: EditId,
        /// Relay acknowledgements, or the failure.
        result: RelayResult<PublishResult>,
    },
    /// The key lookup finished; `None` means anonymous.
    KeyResolved(Option<PublicKey>),
}

/// Sending half of the session channel.
pub type SessionSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiving half of the session channel.
pub type SessionReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Creates a session channel.
#[must_use]
pub fn session_channel() -> (SessionSender, SessionReceiver) {
    mpsc::unbounded_channel()
}
