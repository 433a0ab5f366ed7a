use crate::hash::{compute_digest, Digest, GENESIS_PREDECESSOR};
use serde::{Deserialize, Serialize};

/// A ledger entry chained to its predecessor by digest.
///
/// Fields are only set by the constructors, so a block never changes after
/// it is built. The digest covers the other three fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    payload: String,
    digest: Digest,
    predecessor_digest: Digest,
    height: u64,
}

impl Block {
    /// Create the first block of a chain (height 1, sentinel predecessor).
    pub fn genesis(payload: impl Into<String>) -> Self {
        Self::build(payload.into(), GENESIS_PREDECESSOR.to_string(), 1)
    }

    /// Create the block that follows `predecessor`.
    pub fn next(predecessor: &Block, payload: impl Into<String>) -> Self {
        Self::build(
            payload.into(),
            predecessor.digest.clone(),
            predecessor.height + 1,
        )
    }

    fn build(payload: String, predecessor_digest: Digest, height: u64) -> Self {
        let digest = compute_digest(&payload, &predecessor_digest, height);
        Self {
            payload,
            digest,
            predecessor_digest,
            height,
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn predecessor_digest(&self) -> &str {
        &self.predecessor_digest
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    /// True for the chain's first block.
    pub fn is_genesis(&self) -> bool {
        self.height == 1 && self.predecessor_digest == GENESIS_PREDECESSOR
    }

    /// Verify the block's integrity.
    pub fn verify(&self) -> bool {
        compute_digest(&self.payload, &self.predecessor_digest, self.height) == self.digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_shape() {
        let g = Block::genesis("Genesis Block");
        assert_eq!(g.height(), 1);
        assert_eq!(g.predecessor_digest(), GENESIS_PREDECESSOR);
        assert!(g.is_genesis());
        assert!(g.verify());
    }

    #[test]
    fn next_links_to_predecessor() {
        let g = Block::genesis("g");
        let b = Block::next(&g, "hello");
        assert_eq!(b.height(), 2);
        assert_eq!(b.predecessor_digest(), g.digest());
        assert_eq!(b.payload(), "hello");
        assert!(!b.is_genesis());
        assert!(b.verify());
    }

    #[test]
    fn identical_inputs_identical_blocks() {
        let g = Block::genesis("g");
        assert_eq!(Block::next(&g, "same"), Block::next(&g, "same"));
        assert_ne!(Block::next(&g, "same").digest(), Block::next(&g, "other").digest());
    }

    #[test]
    fn tampered_block_fails_verify() {
        let mut b = Block::next(&Block::genesis("g"), "original");
        b.payload = "tampered".into();
        assert!(!b.verify());
    }

    #[test]
    fn misplaced_height_is_not_genesis() {
        let mut g = Block::genesis("g");
        g.height = 2;
        assert!(!g.is_genesis());
    }

    #[test]
    fn json_field_names() {
        let g = Block::genesis("g");
        let value = serde_json::to_value(&g).unwrap();
        assert_eq!(value["payload"], "g");
        assert_eq!(value["height"], 1);
        assert_eq!(value["predecessor_digest"], "");
        let back: Block = serde_json::from_value(value).unwrap();
        assert_eq!(back, g);
    }
}
