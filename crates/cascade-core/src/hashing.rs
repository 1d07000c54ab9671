//! Feature hashing utilities.
//!
//! Every feature in Cascade is addressed by a 64-bit hashed index. This module
//! provides the hash families used to produce those indices, the chained hash
//! for key/value categorical features, and the index-combination rule used
//! when expanding namespace interactions.
//!
//! All functions here are pure: the same bytes and seed always produce the
//! same index, across calls and across process restarts. Model portability
//! depends on this.

use serde::{Deserialize, Serialize};

/// FNV-1a 64-bit offset basis.
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a 64-bit prime.
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Multiplier used when folding constituent indices into an interaction index.
pub const INTERACTION_PRIME: u64 = 0x5bd1_e995;

/// Weight index reserved for the constant (bias) feature.
pub const CONSTANT_HASH: u64 = 11650396;

/// Namespace index under which the constant feature is stored.
pub const CONSTANT_NAMESPACE: u8 = 128;

/// Hash family used to turn feature tokens into indices.
///
/// `Plain` treats numeric tokens as indices directly (offset by the namespace
/// seed), which matches the common case of pre-hashed integer features;
/// non-numeric tokens fall back to `AllBytes`. `AllBytes` always hashes the
/// full byte content of the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HashFamily {
    /// Numeric tokens index directly; strings hash by content.
    #[default]
    Plain,
    /// Every token hashes by byte content.
    AllBytes,
}

/// Hashes a byte string with the given seed.
///
/// This is the primitive underneath every other hash in the crate: an FNV-1a
/// walk over the bytes, folded into the seed.
#[inline]
pub fn hash_bytes(data: &[u8], seed: u64) -> u64 {
    let mut h = FNV_OFFSET ^ seed.wrapping_mul(FNV_PRIME);
    for &b in data {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// Hashes a namespace name into the seed used for its features.
#[inline]
pub fn hash_namespace(name: &str) -> u64 {
    hash_bytes(name.as_bytes(), 0)
}

/// Hashes a feature token under the configured hash family.
///
/// With [`HashFamily::Plain`], a token that parses as an unsigned integer is
/// used as an index directly, offset by the namespace seed.
#[inline]
pub fn hash_feature(family: HashFamily, token: &str, seed: u64) -> u64 {
    match family {
        HashFamily::Plain => match token.parse::<u64>() {
            Ok(n) => seed.wrapping_add(n),
            Err(_) => hash_bytes(token.as_bytes(), seed),
        },
        HashFamily::AllBytes => hash_bytes(token.as_bytes(), seed),
    }
}

/// Produces an index for a key/value categorical feature.
///
/// The value is hashed seeded with the hash of the key, which is itself
/// seeded with the namespace seed. The order of this chain is part of the
/// model format and must not change.
#[inline]
pub fn chain_hash(key: &str, value: &str, namespace_seed: u64) -> u64 {
    hash_bytes(value.as_bytes(), hash_bytes(key.as_bytes(), namespace_seed))
}

/// Folds a constituent feature index into an interaction index.
///
/// Interaction indices are built by repeated multiply-then-XOR over the
/// constituent raw indices, left to right in tuple order.
#[inline]
pub fn combine(h: u64, index: u64) -> u64 {
    h.wrapping_mul(INTERACTION_PRIME) ^ index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_bytes_deterministic() {
        let a = hash_bytes(b"feature", 42);
        let b = hash_bytes(b"feature", 42);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_bytes_seed_sensitive() {
        assert_ne!(hash_bytes(b"feature", 1), hash_bytes(b"feature", 2));
    }

    #[test]
    fn test_hash_bytes_content_sensitive() {
        assert_ne!(hash_bytes(b"alpha", 7), hash_bytes(b"beta", 7));
    }

    #[test]
    fn test_plain_family_numeric_tokens() {
        let seed = hash_namespace("user");
        assert_eq!(hash_feature(HashFamily::Plain, "5", seed), seed + 5);
        // Non-numeric tokens fall back to byte hashing.
        assert_eq!(
            hash_feature(HashFamily::Plain, "abc", seed),
            hash_bytes(b"abc", seed)
        );
    }

    #[test]
    fn test_all_bytes_family_hashes_numerics() {
        let seed = hash_namespace("user");
        assert_eq!(
            hash_feature(HashFamily::AllBytes, "5", seed),
            hash_bytes(b"5", seed)
        );
    }

    #[test]
    fn test_chain_hash_order_matters() {
        let seed = hash_namespace("n");
        assert_ne!(chain_hash("k", "v", seed), chain_hash("v", "k", seed));
    }

    #[test]
    fn test_combine_differs_from_constituents() {
        let a = hash_bytes(b"f1", 1);
        let b = hash_bytes(b"f2", 2);
        let cross = combine(a, b);
        assert_ne!(cross, a);
        assert_ne!(cross, b);
        assert_ne!(cross, CONSTANT_HASH);
    }

    #[test]
    fn test_combine_is_order_sensitive() {
        let a = hash_bytes(b"f1", 1);
        let b = hash_bytes(b"f2", 2);
        assert_ne!(combine(a, b), combine(b, a));
    }
}
