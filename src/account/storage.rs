//! Per-identity account persistence.
//!
//! Relay settings, the follow list, the mute list and likes survive
//! restarts so a session can render before the relays answer. Filter lists
//! and the allowlist are relay-only and always re-synced.

// SQLite operations need to hold the lock for the duration of the operation.
#![allow(clippy::significant_drop_tightening)]

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use super::error::{StorageError, StorageResult};
use crate::graph::TagBuilder;
use crate::relay::RelaySettings;

/// Everything persisted for one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredAccount {
    /// Relay settings.
    pub relay_settings: RelaySettings,
    /// Followed pubkeys.
    pub following: Vec<String>,
    /// Tags of the contacts document `following` came from.
    pub following_tags: Vec<Vec<String>>,
    /// Timestamp of that contacts document.
    pub following_since: u64,
    /// Muted pubkeys.
    pub muted: Vec<String>,
    /// Encrypted private part of the mute list.
    pub muted_private: String,
    /// Timestamp of the newest mute document.
    pub muted_since: u64,
    /// Ids of liked notes.
    pub likes: Vec<String>,
}

/// Local persistence for account state.
///
/// Saves are partial: each writes one slice of [`StoredAccount`] and leaves
/// the rest untouched.
pub trait AccountStorage: Send {
    /// Loads the stored state of `pubkey`; unknown identities load empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read.
    fn load(&self, pubkey: &str) -> StorageResult<StoredAccount>;

    /// Saves relay settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn save_relay_settings(&self, pubkey: &str, settings: &RelaySettings) -> StorageResult<()>;

    /// Saves the follow list.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn save_following(
        &self,
        pubkey: &str,
        following: &[String],
        tags: &[Vec<String>],
        since: u64,
    ) -> StorageResult<()>;

    /// Saves the mute list.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn save_muted(
        &self,
        pubkey: &str,
        muted: &[String],
        private: &str,
        since: u64,
    ) -> StorageResult<()>;

    /// Saves liked note ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn save_likes(&self, pubkey: &str, likes: &[String]) -> StorageResult<()>;
}

/// `SQLite`-based account storage.
pub struct SqliteAccountStorage {
    conn: Mutex<Connection>,
}

impl SqliteAccountStorage {
    /// Opens (or creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or initialized.
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    /// Creates an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Storage(format!("Failed to acquire database lock: {e}")))
    }

    fn initialize_schema(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS accounts (
                pubkey TEXT PRIMARY KEY,
                relay_settings TEXT NOT NULL DEFAULT '{}',
                following TEXT NOT NULL DEFAULT '[]',
                following_tags TEXT NOT NULL DEFAULT '[]',
                following_since INTEGER NOT NULL DEFAULT 0,
                muted TEXT NOT NULL DEFAULT '[]',
                muted_private TEXT NOT NULL DEFAULT '',
                muted_since INTEGER NOT NULL DEFAULT 0,
                likes TEXT NOT NULL DEFAULT '[]'
            );
            ",
        )?;
        Ok(())
    }
}

fn to_sql_time(since: u64) -> StorageResult<i64> {
    i64::try_from(since).map_err(|_| StorageError::InvalidData(format!("timestamp {since} out of range")))
}

fn from_sql_time(since: i64) -> StorageResult<u64> {
    u64::try_from(since).map_err(|_| StorageError::InvalidData(format!("negative timestamp {since}")))
}

fn decode<T: serde::de::DeserializeOwned>(column: &str, json: &str) -> StorageResult<T> {
    serde_json::from_str(json).map_err(|e| StorageError::InvalidData(format!("Invalid {column} JSON: {e}")))
}

impl AccountStorage for SqliteAccountStorage {
    fn load(&self, pubkey: &str) -> StorageResult<StoredAccount> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                r"
                SELECT relay_settings, following, following_tags, following_since,
                       muted, muted_private, muted_since, likes
                FROM accounts
                WHERE pubkey = ?1
                ",
                params![pubkey],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            relay_settings,
            following,
            following_tags,
            following_since,
            muted,
            muted_private,
            muted_since,
            likes,
        )) = row
        else {
            return Ok(StoredAccount::default());
        };

        let following: Vec<String> = decode("following", &following)?;
        let mut following_tags: Vec<Vec<String>> = decode("following_tags", &following_tags)?;
        if following_tags.is_empty() {
            following_tags = following.iter().map(|p| TagBuilder::p_tag(p)).collect();
        }

        Ok(StoredAccount {
            relay_settings: decode("relay_settings", &relay_settings)?,
            following,
            following_tags,
            following_since: from_sql_time(following_since)?,
            muted: decode("muted", &muted)?,
            muted_private,
            muted_since: from_sql_time(muted_since)?,
            likes: decode("likes", &likes)?,
        })
    }

    fn save_relay_settings(&self, pubkey: &str, settings: &RelaySettings) -> StorageResult<()> {
        let json = serde_json::to_string(settings)?;
        let conn = self.lock()?;
        conn.execute(
            r"
            INSERT INTO accounts (pubkey, relay_settings) VALUES (?1, ?2)
            ON CONFLICT(pubkey) DO UPDATE SET relay_settings = excluded.relay_settings
            ",
            params![pubkey, json],
        )?;
        Ok(())
    }

    fn save_following(
        &self,
        pubkey: &str,
        following: &[String],
        tags: &[Vec<String>],
        since: u64,
    ) -> StorageResult<()> {
        let following = serde_json::to_string(following)?;
        let tags = serde_json::to_string(tags)?;
        let since = to_sql_time(since)?;
        let conn = self.lock()?;
        conn.execute(
            r"
            INSERT INTO accounts (pubkey, following, following_tags, following_since)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(pubkey) DO UPDATE SET
                following = excluded.following,
                following_tags = excluded.following_tags,
                following_since = excluded.following_since
            ",
            params![pubkey, following, tags, since],
        )?;
        Ok(())
    }

    fn save_muted(
        &self,
        pubkey: &str,
        muted: &[String],
        private: &str,
        since: u64,
    ) -> StorageResult<()> {
        let muted = serde_json::to_string(muted)?;
        let since = to_sql_time(since)?;
        let conn = self.lock()?;
        conn.execute(
            r"
            INSERT INTO accounts (pubkey, muted, muted_private, muted_since)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(pubkey) DO UPDATE SET
                muted = excluded.muted,
                muted_private = excluded.muted_private,
                muted_since = excluded.muted_since
            ",
            params![pubkey, muted, private, since],
        )?;
        Ok(())
    }

    fn save_likes(&self, pubkey: &str, likes: &[String]) -> StorageResult<()> {
        let likes = serde_json::to_string(likes)?;
        let conn = self.lock()?;
        conn.execute(
            r"
            INSERT INTO accounts (pubkey, likes) VALUES (?1, ?2)
            ON CONFLICT(pubkey) DO UPDATE SET likes = excluded.likes
            ",
            params![pubkey, likes],
        )?;
        Ok(())
    }
}
