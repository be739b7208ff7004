//! SHA-256 helpers for write records and reference de-duplication.

use sha2::{Digest, Sha256};

/// Prefix used for hashes stored in run manifests.
pub const HASH_PREFIX: &str = "sha256:";

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Digest in the `sha256:<hex>` form written to manifests.
pub fn content_hash(data: &[u8]) -> String {
    format!("{HASH_PREFIX}{}", sha256_hex(data))
}
