//! The append-only chain: bootstrap/restore, serialized appends and
//! backward traversal from the head.
//!
//! The in-memory head is a cache of the store's checkpoint. A chain starts
//! `Uninitialized` and bootstraps on the first operation: it restores the
//! head from the checkpoint, or writes a genesis block when the store has
//! never been initialized.
//!
//! Appends hold the writer lock for the whole read-modify-write (load
//! predecessor, write block, write checkpoint, publish head). Reads snapshot
//! the head once and walk backwards from it; blocks are never rewritten, so
//! a snapshot stays resolvable while later appends land.

use crate::block::Block;
use crate::error::{LedgerError, Result};
use crate::hash::{Digest, GENESIS_PREDECESSOR};
use crate::storage::{Checkpoint, FileStore, Store};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use tracing::{debug, info, warn};

/// Payload of the genesis block unless configured otherwise.
pub const DEFAULT_GENESIS_PAYLOAD: &str = "Genesis Block";

/// Lifecycle of a [`Chain`]. `Ready` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPhase {
    Uninitialized,
    Bootstrapping,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Head {
    digest: Digest,
    height: u64,
}

#[derive(Debug)]
enum State {
    Uninitialized,
    Bootstrapping,
    Ready(Head),
}

/// Single-writer ledger over a [`Store`].
///
/// Share it between threads behind an `Arc`; all operations take `&self`.
pub struct Chain<S: Store> {
    store: S,
    genesis_payload: String,
    state: RwLock<State>,
    writer: Mutex<()>,
}

impl Chain<FileStore> {
    /// Open a chain backed by a [`FileStore`] at `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self::new(FileStore::open(dir)?))
    }
}

impl<S: Store> Chain<S> {
    /// Wrap a store. Nothing is read until the first operation.
    pub fn new(store: S) -> Self {
        Self {
            store,
            genesis_payload: DEFAULT_GENESIS_PAYLOAD.into(),
            state: RwLock::new(State::Uninitialized),
            writer: Mutex::new(()),
        }
    }

    /// Payload used if this chain has to create its genesis block.
    pub fn with_genesis_payload(mut self, payload: impl Into<String>) -> Self {
        self.genesis_payload = payload.into();
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn phase(&self) -> ChainPhase {
        match &*self.state.read() {
            State::Uninitialized => ChainPhase::Uninitialized,
            State::Bootstrapping => ChainPhase::Bootstrapping,
            State::Ready(_) => ChainPhase::Ready,
        }
    }

    // ── Public operations ─────────────────────────────────────

    /// Append a block carrying `payload` after the current head.
    ///
    /// On error nothing becomes visible: the in-memory head and the
    /// checkpoint still name the previous block.
    pub fn append(&self, payload: impl Into<String>) -> Result<Block> {
        let _writer = self.writer.lock();
        let head = self.ready_head_locked()?;
        let predecessor = self.load(&head.digest)?;
        if predecessor.height() == u64::MAX {
            return Err(LedgerError::ChainCorruption(format!(
                "head block {} has no successor height",
                head.digest
            )));
        }
        let block = Block::next(&predecessor, payload);

        let checkpoint = Checkpoint {
            head_digest: block.digest().into(),
            height: block.height(),
        };
        // Block first: the checkpoint must never name an unwritten block.
        let written = self
            .store
            .put_block(&block)
            .and_then(|()| self.store.set_checkpoint(&checkpoint));
        if let Err(e) = written {
            warn!(height = block.height(), error = %e, "append aborted");
            return Err(e);
        }

        *self.state.write() = State::Ready(Head {
            digest: checkpoint.head_digest,
            height: checkpoint.height,
        });
        info!(height = block.height(), digest = block.digest(), "appended block");
        Ok(block)
    }

    /// All blocks, newest first, ending at genesis.
    pub fn get_all_blocks(&self) -> Result<Vec<Block>> {
        let head = self.ready_head()?;
        let mut blocks = Vec::new();
        self.walk(&head, 1, |block| blocks.push(block))?;
        Ok(blocks)
    }

    /// The block at `height` (1-based).
    pub fn get_block(&self, height: u64) -> Result<Block> {
        let head = self.ready_head()?;
        if height == 0 || height > head.height {
            return Err(LedgerError::BlockNotFound {
                height,
                current: head.height,
            });
        }
        let mut found = None;
        self.walk(&head, height, |block| found = Some(block))?;
        found.ok_or(LedgerError::BlockNotFound {
            height,
            current: head.height,
        })
    }

    /// Number of blocks in the chain, genesis included.
    pub fn height(&self) -> Result<u64> {
        Ok(self.ready_head()?.height)
    }

    /// Digest of the newest block.
    pub fn head_digest(&self) -> Result<Digest> {
        Ok(self.ready_head()?.digest)
    }

    /// The newest block.
    pub fn head(&self) -> Result<Block> {
        let head = self.ready_head()?;
        self.load(&head.digest)
    }

    /// Walk the whole chain checking every link. Returns the blocks checked.
    pub fn verify(&self) -> Result<u64> {
        let head = self.ready_head()?;
        let mut checked = 0u64;
        self.walk(&head, 1, |_| checked += 1)?;
        Ok(checked)
    }

    // ── Bootstrap ─────────────────────────────────────────────

    /// Snapshot of the head, bootstrapping first if needed.
    fn ready_head(&self) -> Result<Head> {
        if let State::Ready(head) = &*self.state.read() {
            return Ok(head.clone());
        }
        let _writer = self.writer.lock();
        self.ready_head_locked()
    }

    /// Same as `ready_head`; caller holds the writer lock.
    fn ready_head_locked(&self) -> Result<Head> {
        if let State::Ready(head) = &*self.state.read() {
            return Ok(head.clone());
        }
        *self.state.write() = State::Bootstrapping;
        match self.bootstrap() {
            Ok(head) => {
                *self.state.write() = State::Ready(head.clone());
                Ok(head)
            }
            Err(e) => {
                *self.state.write() = State::Uninitialized;
                warn!(error = %e, "bootstrap failed");
                Err(e)
            }
        }
    }

    fn bootstrap(&self) -> Result<Head> {
        match self.store.get_checkpoint() {
            Ok(checkpoint) => self.restore(checkpoint),
            Err(LedgerError::MissingKey(_)) => self.create_genesis(),
            Err(e) => Err(e),
        }
    }

    fn restore(&self, checkpoint: Checkpoint) -> Result<Head> {
        let head = self.load(&checkpoint.head_digest)?;
        if head.height() != checkpoint.height {
            return Err(LedgerError::ChainCorruption(format!(
                "checkpoint height {} but head block {} has height {}",
                checkpoint.height,
                checkpoint.head_digest,
                head.height()
            )));
        }
        info!(
            height = checkpoint.height,
            head = %checkpoint.head_digest,
            "restored chain from checkpoint"
        );
        Ok(Head {
            digest: checkpoint.head_digest,
            height: checkpoint.height,
        })
    }

    fn create_genesis(&self) -> Result<Head> {
        let genesis = Block::genesis(self.genesis_payload.as_str());
        self.store.put_block(&genesis)?;
        let checkpoint = Checkpoint {
            head_digest: genesis.digest().into(),
            height: genesis.height(),
        };
        self.store.set_checkpoint(&checkpoint)?;
        info!(digest = genesis.digest(), "created genesis block");
        Ok(Head {
            digest: checkpoint.head_digest,
            height: checkpoint.height,
        })
    }

    // ── Traversal ─────────────────────────────────────────────

    /// Load a block that the chain links to; absence is a broken link.
    fn load(&self, digest: &str) -> Result<Block> {
        self.store.get_block(digest).map_err(|e| match e {
            LedgerError::MissingKey(_) => {
                LedgerError::ChainCorruption(format!("broken link: block {} is missing", digest))
            }
            LedgerError::InvalidKey(_) => {
                LedgerError::ChainCorruption(format!("broken link: malformed digest {:?}", digest))
            }
            other => other,
        })
    }

    /// Visit blocks from `head` down to `stop_at` (inclusive), newest first.
    fn walk<F: FnMut(Block)>(&self, head: &Head, stop_at: u64, mut visit: F) -> Result<()> {
        let mut digest = head.digest.clone();
        let mut expected_height = head.height;
        loop {
            let block = self.load(&digest)?;
            if block.height() != expected_height {
                return Err(LedgerError::ChainCorruption(format!(
                    "block {} has height {}, expected {}",
                    digest,
                    block.height(),
                    expected_height
                )));
            }
            let at_root = block.predecessor_digest() == GENESIS_PREDECESSOR;
            if at_root != (expected_height == 1) {
                return Err(LedgerError::ChainCorruption(format!(
                    "block {} at height {} has an invalid predecessor link",
                    digest, expected_height
                )));
            }
            let done = expected_height == stop_at;
            digest = block.predecessor_digest().to_string();
            visit(block);
            if done {
                break;
            }
            expected_height -= 1;
        }
        debug!(from = head.height, to = stop_at, "walked chain");
        Ok(())
    }
}
