//! Identifier hashing and key normalization.
//!
//! Vector indexes address entries by integer key, the relational store by
//! article id. `hash_id` is the bridge: it must be applied identically when
//! vectors are added and when the `Article_Vectors` row is written, otherwise
//! the search join silently matches nothing.
//!
//! Keys are SHA-256 digests read as a big-endian integer and reduced modulo
//! `2^63 - 1`. With ~10^7 articles the probability of any collision is around
//! 10^-5; collisions are not detected and alias both articles under one key.

use crate::types::HashedKey;
use sha2::{Digest, Sha256};

/// Key space modulus (`2^63 - 1`).
pub const KEY_MODULUS: u64 = (1u64 << 63) - 1;

/// Location id modulus.
pub const LOCATION_MODULUS: u64 = 100_000_000;

/// Map an article id to its index key.
///
/// Deterministic across calls and process restarts.
pub fn hash_id(id: &str) -> HashedKey {
    HashedKey::from_reduced(digest_mod(id.as_bytes(), KEY_MODULUS))
}

/// Stable integer id for a normalized location name.
pub fn location_id(loc_normal: &str) -> i64 {
    digest_mod(loc_normal.as_bytes(), LOCATION_MODULUS) as i64
}

/// Strip the `<urn:uuid:...>` wrapper WARC records put around ids.
pub fn strip_uuid(raw: &str) -> &str {
    raw.strip_prefix("<urn:uuid:")
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(raw)
}

/// Top-level domain of a hostname (last dot-separated label).
pub fn extract_tld(hostname: &str) -> &str {
    hostname.rsplit('.').next().unwrap_or("")
}

/// SHA-256 of `bytes` as a big-endian integer, reduced modulo `modulus`.
fn digest_mod(bytes: &[u8], modulus: u64) -> u64 {
    let digest = Sha256::digest(bytes);
    let m = modulus as u128;
    digest
        .iter()
        .fold(0u128, |acc, &byte| ((acc << 8) | byte as u128) % m) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hash_matches_python_reduction() {
        // int(hashlib.sha256(s.encode()).hexdigest(), 16) % (2**63 - 1)
        assert_eq!(hash_id("").get(), 9_036_492_561_357_317_169);
        assert_eq!(hash_id("abc").get(), 7_844_562_598_752_555_730);
        assert_eq!(
            hash_id("0b4e7c4e-1111-2222-3333-444455556666").get(),
            3_880_058_529_794_686_093
        );
    }

    #[test]
    fn test_strip_uuid() {
        assert_eq!(
            strip_uuid("<urn:uuid:0b4e7c4e-1111-2222-3333-444455556666>"),
            "0b4e7c4e-1111-2222-3333-444455556666"
        );
        assert_eq!(strip_uuid("plain-id"), "plain-id");
        assert_eq!(strip_uuid("<urn:uuid:unterminated"), "<urn:uuid:unterminated");
    }

    #[test]
    fn test_extract_tld() {
        assert_eq!(extract_tld("www.spiegel.de"), "de");
        assert_eq!(extract_tld("localhost"), "localhost");
        assert_eq!(extract_tld(""), "");
    }

    #[test]
    fn test_location_id_range() {
        assert_eq!(location_id("köln"), 34_577_705);
        assert!((0..LOCATION_MODULUS as i64).contains(&location_id("münchen")));
    }

    proptest! {
        #[test]
        fn prop_hash_is_deterministic_and_in_range(s in ".*") {
            let a = hash_id(&s);
            let b = hash_id(&s);
            prop_assert_eq!(a, b);
            prop_assert!(a.get() < KEY_MODULUS);
            prop_assert!(a.as_i64() >= 0);
        }
    }
}
