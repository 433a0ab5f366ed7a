//! Tamper-evident, append-only ledger of text messages.
//!
//! Each [`Block`](block::Block) carries the SHA-256 digest of its payload,
//! its predecessor's digest and its height, so rewriting any historical
//! block breaks every link after it. A [`Chain`](chain::Chain) owns the
//! append protocol over a durable [`Store`](storage::Store) and resumes
//! from the store's checkpoint after a restart.

pub mod block;
pub mod chain;
pub mod error;
pub mod hash;
pub mod logging;
pub mod storage;

pub use block::Block;
pub use chain::{Chain, ChainPhase};
pub use error::{LedgerError, Result};
pub use storage::{Checkpoint, FileStore, MemoryStore, Store};
