//! Deterministic content hashing.

use sha2::{Digest, Sha256};

/// Compute the checksum of some content.
///
/// The hash depends only on the content bytes, never on time or machine,
/// so it doubles as a change detector and as the seed for
/// content-addressed identifiers.
pub fn checksum(content: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_ref());
    hex::encode(hasher.finalize())
}
