//! Stable hashing helpers.
//!
//! Vector-index point ids and ranking jitter both need hashes that are
//! stable across processes and releases, so `std::hash` (randomized) is out.

use sha2::{Digest, Sha256};

/// Deterministic 64-bit hash of `user_did ⊕ uri`, used as the vector-index
/// point id so a post embedded for one user never collides with another
/// user's copy of the same post.
pub fn point_id(user_did: &str, uri: &str) -> u64 {
    stable_hash64(&[user_did.as_bytes(), b"\x1f", uri.as_bytes()])
}

/// Point id for a user-profile centroid.
pub fn profile_point_id(user_did: &str, cluster_id: i32) -> u64 {
    stable_hash64(&[
        user_did.as_bytes(),
        b"\x1fprofile\x1f",
        cluster_id.to_string().as_bytes(),
    ])
}

/// Deterministic jitter in `[0, range)` keyed by (uri, user).
pub fn score_jitter(uri: &str, user_did: &str, range: u64) -> u64 {
    if range == 0 {
        return 0;
    }
    stable_hash64(&[uri.as_bytes(), b"\x1f", user_did.as_bytes()]) % range
}

fn stable_hash64(parts: &[&[u8]]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_id_is_stable_and_user_scoped() {
        let a = point_id("did:plc:alice", "at://post/1");
        let b = point_id("did:plc:alice", "at://post/1");
        let c = point_id("did:plc:bob", "at://post/1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn jitter_stays_in_range() {
        for i in 0..64 {
            let uri = format!("at://post/{i}");
            assert!(score_jitter(&uri, "did:plc:u", 300) < 300);
        }
    }

    #[test]
    fn jitter_zero_range_is_zero() {
        assert_eq!(score_jitter("at://p", "did:plc:u", 0), 0);
    }
}
