//! Scan identifier computation.
//!
//! Identifiers hash the submission time together with the target and payload.
//! Collisions are negligible in practice but not cryptographically excluded,
//! since two identical submissions in the same nanosecond share an id.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Compute a scan id from submission time, target URL and payload.
pub fn compute(submitted_at: &DateTime<Utc>, target: &str, payload: &str) -> String {
    let nanos = submitted_at
        .timestamp_nanos_opt()
        .unwrap_or_else(|| submitted_at.timestamp_micros());
    hash(&format!("{nanos}:{target}:{payload}"))
}

/// SHA-256 hash a string and return hex-encoded digest.
fn hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
