//! Durable key-value stores for cached responses.
//!
//! Two backends share the [`KeyValueStore`] trait:
//!
//! - [`Store`]: a single SQLite file in WAL mode, mutated only by one
//!   lazily spawned writer task that batches commits
//! - [`FileStore`]: one file per key under a directory tree, addressed by
//!   the SHA-256 of the key

mod connection;
pub mod files;
pub mod hash;
pub mod migrations;
pub mod sqlite;
mod writer;

use async_trait::async_trait;

pub use crate::Error;

pub use files::FileStore;
pub use hash::{KeyScheme, compute_storage_key};
pub use sqlite::{Store, StoreConfig, StoreStats};

/// Text key to bytes storage used by the caching client.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the stored bytes, or `None` when nothing is stored.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), Error>;

    /// Removes `key` if present.
    async fn delete(&self, key: &str) -> Result<(), Error>;
}
