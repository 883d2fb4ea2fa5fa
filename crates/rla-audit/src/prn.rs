// prn.rs — SHA-256 based sample numbers and hashing helpers.
//
// Each card's sample number is the first 8 bytes (big-endian) of
// SHA-256("<seed>:<card index>"). Anyone holding the published seed and the
// CVR export can recompute every sample number and hence the whole draw
// order. Journal lines are chained with the same hash, hex-encoded.

use sha2::{Digest, Sha256};

/// Hash arbitrary bytes, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Sample number of the card at `index` in the CVR export.
pub fn sample_number(seed: &str, index: usize) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(b":");
    hasher.update(index.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn sample_numbers_are_reproducible() {
        let seed = "12345678901234567890";
        assert_eq!(sample_number(seed, 7), sample_number(seed, 7));
        assert_ne!(sample_number(seed, 7), sample_number("other", 7));
    }

    #[test]
    fn sample_numbers_are_distinct() {
        let seed = "published seed";
        let prns: HashSet<u64> = (0..10_000).map(|i| sample_number(seed, i)).collect();
        assert_eq!(prns.len(), 10_000);
    }

    #[test]
    fn index_is_delimited_from_seed() {
        // "1" + ":" + "23" must not collide with "12" + ":" + "3".
        assert_ne!(sample_number("1", 23), sample_number("12", 3));
    }

    #[test]
    fn hash_is_hex_sha256() {
        let h = hash_str("hello");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
