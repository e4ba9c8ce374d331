//! Canonical bytes and SHA-256 digests.
//!
//! Revision checksums hash the canonical JSON of `(body, payload)`; identity
//! preimages hash raw UTF-8. Both go through [`sha256_hex`].
//!
//! Hashed structures must keep a stable byte form: struct fields serialize in
//! declaration order, `Vec` in index order, and maps are `BTreeMap` only.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serialize a value to canonical JSON bytes for hashing.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// SHA-256 of raw bytes as 64 lowercase hex characters.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Compute the SHA-256 hex digest of a serializable value's canonical bytes.
pub fn canonical_digest_hex<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(&to_canonical_bytes(value)?))
}

/// Constant-time equality for hex digests.
pub fn digests_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct TestStruct {
        name: String,
        value: i32,
    }

    #[test]
    fn test_determinism() {
        let s = TestStruct {
            name: "test".to_string(),
            value: 42,
        };

        let h1 = canonical_digest_hex(&s).unwrap();
        let h2 = canonical_digest_hex(&s).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_btreemap_insertion_order_irrelevant() {
        let mut a = BTreeMap::new();
        a.insert("b", 2);
        a.insert("a", 1);
        let mut b = BTreeMap::new();
        b.insert("a", 1);
        b.insert("b", 2);
        assert_eq!(canonical_digest_hex(&a).unwrap(), canonical_digest_hex(&b).unwrap());
    }

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256_hex(b"Hello World"),
            "a591a6d40bf420404a011733cfb7b190d62c65bf0bcda32b57b277d9ad9f146e"
        );
    }

    #[test]
    fn test_digests_match() {
        let h = sha256_hex(b"x");
        assert!(digests_match(&h, &h.clone()));
        assert!(!digests_match(&h, &sha256_hex(b"y")));
        assert!(!digests_match(&h, "short"));
    }
}
