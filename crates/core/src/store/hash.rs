//! Content-addressed storage key generation.

use sha2::{Digest, Sha256};

/// Compute the hashed storage key for a request key.
pub fn compute_storage_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// How request keys map onto store keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyScheme {
    /// Store under the request key itself.
    #[default]
    Plain,
    /// Store under the hex SHA-256 of the request key.
    Hashed,
}

impl KeyScheme {
    pub fn storage_key(self, key: &str) -> String {
        match self {
            KeyScheme::Plain => key.to_string(),
            KeyScheme::Hashed => compute_storage_key(key),
        }
    }
}
