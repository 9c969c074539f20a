//! Account and session state.
//!
//! This module owns everything tied to the signed-in identity:
//!
//! - **Identity**: the public key, resolved once at startup from a
//!   [`SigningAgent`] (one retry, then anonymous)
//! - **Relays**: relay settings plus the connection pool and its retry policy
//! - **Social graph**: follows, mutes, filter lists and the allowlist,
//!   reconciled from relay documents and edited with fetch-merge-write
//! - **Persistence**: relay settings, follows, mutes and likes per identity
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      AccountStore                            │
//! │   actions (&mut self)            handle(SessionEvent)        │
//! └──────┬──────────────────────────────────▲────────────────────┘
//!        │ spawn                            │ session channel
//! ┌──────▼──────────┐ ┌──────────────┐ ┌────┴───────────────────┐
//! │ RelayPool       │ │ Subscription │ │ connect / publish /    │
//! │ (retry policy)  │ │ Router       │ │ notification tasks     │
//! └──────┬──────────┘ └──────────────┘ └────▲───────────────────┘
//!        │                                  │
//! ┌──────▼──────────────────────────────────┴───────────────────┐
//! │                  Transport (nostr-sdk)                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kith_core::account::{AccountConfig, AccountStore, SqliteAccountStorage};
//! use kith_core::relay::NostrSdkTransport;
//! use kith_core::session_channel;
//!
//! let (events, mut rx) = session_channel();
//! let transport = Arc::new(NostrSdkTransport::new(client, events.clone(), watch));
//! transport.spawn_notification_pump();
//!
//! let storage = SqliteAccountStorage::new(&path)?;
//! let mut store = AccountStore::new(AccountConfig::default(), transport, storage, events);
//! store.spawn_key_lookup(Arc::new(keys));
//!
//! while let Some(event) = rx.recv().await {
//!     store.handle(event);
//! }
//! ```

mod config;
mod edit;
mod error;
mod identity;
mod storage;
mod store;

pub use config::{AccountConfig, PRIORITY_RELAYS_ENV};
pub use edit::{Commit, EditHandle, EditOutcome, EditPhase, PendingEdit};
pub use error::{AccountError, AccountResult, IdentityError, StorageError, StorageResult};
pub use identity::{lookup_public_key, SigningAgent};
pub use storage::{AccountStorage, SqliteAccountStorage, StoredAccount};
pub use store::{scope_filters, AccountStore, StoreChange};
