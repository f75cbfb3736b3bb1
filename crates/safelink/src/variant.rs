//! Deterministic A/B variant assignment.
//!
//! Buckets a visitor by hashing their key: the first byte of
//! SHA-256(visitorKey) reduced mod 100 gives a stable value in [0, 99],
//! compared against the clamped A-weight. No stored state — the same
//! (key, weight) pair always lands in the same bucket.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// A/B test variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Variant {
    A,
    B,
}

/// Pick the variant for a visitor key with the given A-weight percentage.
///
/// `weight_a` is clamped to [0, 100]: 0 always yields B, 100 always yields A.
/// An empty key is valid input and hashes to a fixed digest.
pub fn pick_variant(visitor_key: &str, weight_a: i64) -> Variant {
    let digest = Sha256::digest(visitor_key.as_bytes());
    let percentage = i64::from(digest[0] % 100);
    let weight_a = weight_a.clamp(0, 100);
    if percentage < weight_a {
        Variant::A
    } else {
        Variant::B
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_for_same_inputs() {
        let first = pick_variant("visitor-123", 50);
        for _ in 0..50 {
            assert_eq!(pick_variant("visitor-123", 50), first);
        }
    }

    #[test]
    fn test_weight_edges() {
        for key in ["a", "b", "visitor-123", "10.0.0.1", ""] {
            assert_eq!(pick_variant(key, 0), Variant::B);
            assert_eq!(pick_variant(key, 100), Variant::A);
        }
    }

    #[test]
    fn test_weight_clamped() {
        assert_eq!(pick_variant("x", -5), pick_variant("x", 0));
        assert_eq!(pick_variant("x", 250), pick_variant("x", 100));
    }

    #[test]
    fn test_empty_key_is_valid() {
        // Just needs to not panic and stay stable
        assert_eq!(pick_variant("", 50), pick_variant("", 50));
    }

    #[test]
    fn test_distinct_keys_spread_across_buckets() {
        // With weight 50, a batch of distinct keys should not collapse
        // into a single variant.
        let variants: Vec<Variant> = (0..64)
            .map(|i| pick_variant(&format!("visitor-{i}"), 50))
            .collect();
        assert!(variants.contains(&Variant::A));
        assert!(variants.contains(&Variant::B));
    }
}
