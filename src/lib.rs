//! Kith Core Library
//!
//! Client-side account state for a Nostr social client: relay connection
//! lifecycle with bounded retry, subscription routing, and last-write-wins
//! reconciliation of follow, mute, filter and allow lists.
//!
//! # Architecture
//!
//! ```text
//! UI actions ──► AccountStore ──► GraphEdit (fetch, merge, write)
//!                    │   ▲
//!                    ▼   │ SessionEvent
//!               RelayPool / SubscriptionRouter
//!                    │
//!                    ▼
//!               Transport (nostr-sdk)
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

pub mod account;
pub mod graph;
pub mod relay;
pub mod session;

pub use account::{AccountConfig, AccountError, AccountResult, AccountStore, StoreChange};
pub use session::{session_channel, SessionEvent, SessionReceiver, SessionSender};
