//! Deterministic two-level hash-prefix sharding (`spec.md` §4.1).
//!
//! `shard(key, entity_id)` is `hex(sha256(key || entity_id))[0..2], [2..4]`.
//! The key is 32 cryptographically random bytes generated once per database
//! and persisted in the `sharding_key` singleton table; it is never
//! re-seeded.

use rand::RngCore;
use sha2::{Digest, Sha256};

pub const SHARD_KEY_LEN: usize = 32;

/// The per-database sharding secret.
#[derive(Clone, Copy)]
pub struct ShardKey(pub [u8; SHARD_KEY_LEN]);

impl ShardKey {
    /// Generate a new key from a cryptographically secure source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SHARD_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SHARD_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SHARD_KEY_LEN] {
        &self.0
    }
}

/// A two-level shard address, each level two lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub level1: String,
    pub level2: String,
}

/// `shard = hex(sha256(key || entity_id))[0..2], [2..4]` (`spec.md` invariant 8).
pub fn shard(key: &ShardKey, entity_id: &str) -> Shard {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(entity_id.as_bytes());
    let digest = hasher.finalize();
    Shard {
        level1: hex_byte(digest[0]),
        level2: hex_byte(digest[1]),
    }
}

fn hex_byte(b: u8) -> String {
    format!("{b:02x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_key_and_id() {
        let key = ShardKey::from_bytes([7u8; SHARD_KEY_LEN]);
        let a = shard(&key, "homer");
        let b = shard(&key, "homer");
        assert_eq!(a, b);
    }

    #[test]
    fn differs_across_keys() {
        let key_a = ShardKey::from_bytes([1u8; SHARD_KEY_LEN]);
        let key_b = ShardKey::from_bytes([2u8; SHARD_KEY_LEN]);
        assert_ne!(shard(&key_a, "homer"), shard(&key_b, "homer"));
    }

    #[test]
    fn levels_are_two_hex_chars() {
        let key = ShardKey::generate();
        let s = shard(&key, "bart");
        assert_eq!(s.level1.len(), 2);
        assert_eq!(s.level2.len(), 2);
        assert!(s.level1.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(s.level2.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
