use sha2::{Digest as _, Sha256};

/// SHA-256 hex digest identifying a block's content.
pub type Digest = String;

/// Predecessor digest carried by the genesis block.
pub const GENESIS_PREDECESSOR: &str = "";

/// Compute the digest of a `(payload, predecessor, height)` triple.
///
/// Text fields are length-prefixed and the height is fixed-width, so no
/// two distinct triples share a preimage.
pub fn compute_digest(payload: &str, predecessor: &str, height: u64) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update((predecessor.len() as u64).to_be_bytes());
    hasher.update(predecessor.as_bytes());
    hasher.update(height.to_be_bytes());
    hasher.update((payload.len() as u64).to_be_bytes());
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}
