//! Authenticated Chain Checkpoints
//!
//! A checkpoint is an HMAC-SHA256 over a chain segment's covered range and
//! its last link hash. Checkpoints exist so a chain cannot be silently
//! regenerated wholesale: rewriting events and recomputing every link hash
//! still fails checkpoint verification without the secret key, and the key
//! lives outside the trust boundary that can write events.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// An authenticated summary of the events in `covered_range` (inclusive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub hmac: String,
    /// Inclusive (first sequence, last sequence) interval.
    pub covered_range: (u64, u64),
    pub created_at: DateTime<Utc>,
}

/// Signs and verifies checkpoints with the secret key.
#[derive(Clone)]
pub struct CheckpointSigner {
    key: Vec<u8>,
}

impl CheckpointSigner {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    fn mac(&self, covered_range: (u64, u64), last_hash_in_range: &str) -> HmacSha256 {
        // The HMAC construction accepts keys of any length.
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(&covered_range.0.to_be_bytes());
        mac.update(&covered_range.1.to_be_bytes());
        mac.update(last_hash_in_range.as_bytes());
        mac
    }

    /// Produce the hex HMAC for a segment.
    pub fn sign(&self, covered_range: (u64, u64), last_hash_in_range: &str) -> String {
        hex::encode(self.mac(covered_range, last_hash_in_range).finalize().into_bytes())
    }

    /// Constant-time verification of a stored checkpoint HMAC.
    pub fn verify(
        &self,
        covered_range: (u64, u64),
        last_hash_in_range: &str,
        expected_hmac: &str,
    ) -> bool {
        let Ok(expected) = hex::decode(expected_hmac) else {
            return false;
        };
        self.mac(covered_range, last_hash_in_range)
            .verify_slice(&expected)
            .is_ok()
    }

    /// Build a checkpoint over a segment ending at `last_hash_in_range`.
    pub fn checkpoint(
        &self,
        covered_range: (u64, u64),
        last_hash_in_range: &str,
        created_at: DateTime<Utc>,
    ) -> Checkpoint {
        Checkpoint {
            hmac: self.sign(covered_range, last_hash_in_range),
            covered_range,
            created_at,
        }
    }
}
