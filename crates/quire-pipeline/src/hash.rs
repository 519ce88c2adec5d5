//! Content hashing for emitted file names.

use sha2::{Digest, Sha256};

/// Hex SHA-256 of the bytes. Filename templates truncate it as they need.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
