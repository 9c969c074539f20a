//! Relay connectivity and query routing.
//!
//! # Architecture
//!
//! ```text
//! AccountStore
//!     │ connect / close            open / route / close
//!     ▼                                   ▼
//! RelayPool ── RetryTracker        SubscriptionRouter
//!     │
//!     ▼
//! Transport (nostr-sdk Client)
//!     │  Connected / Failed / Inbound { relay, envelope }
//!     ▼
//! session channel ──► AccountStore::handle
//! ```
//!
//! # Retry policy
//!
//! | Event | Effect |
//! |-------|--------|
//! | failure, explicit-close marker set | marker consumed, no reconnect |
//! | failure, attempts < limit | attempts += 1, reconnect after `base × attempts` |
//! | failure, attempts = limit | give up |
//! | connection up for `3 × base` | attempts reset to 0 |
//! | connect while a close is still unreported | attempt starts once the close's failure arrives |

mod backoff;
mod error;
mod message;
mod pool;
mod router;
mod transport;
mod types;

pub use backoff::{FailureAction, RetryPolicy, RetryTracker, STABILITY_FACTOR};
pub use error::{RelayError, RelayResult};
pub use message::RelayEnvelope;
pub use pool::RelayPool;
pub use router::{Delivery, QueryPurpose, Routed, SubscriptionRouter, SubscriptionToken};
pub use transport::{validate_relay_url, NostrSdkTransport, Transport};
pub use types::{
    PublishResult, RelayConnectionStatus, RelayPermissions, RelaySettings, RelayStatus,
};
