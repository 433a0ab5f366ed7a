use crate::block::Block;
use crate::error::{LedgerError, Result};
use crate::hash::Digest;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Key of the single checkpoint slot.
pub const CHECKPOINT_KEY: &str = "checkpoint";

const BLOCK_NAMESPACE: &str = "block";
const BLOCKS_DIR: &str = "blocks";

/// Store key for the block with the given digest.
pub fn block_key(digest: &str) -> String {
    format!("{}:{}", BLOCK_NAMESPACE, digest)
}

/// Durable record of the chain head, used to resume after restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub head_digest: Digest,
    pub height: u64,
}

/// Durable key-value mapping from textual keys to serialized records.
///
/// Implementations only need `put` and `get`; the checkpoint slot and the
/// typed block accessors are layered on top. Absent keys must be reported
/// as [`LedgerError::MissingKey`], never as a read error.
pub trait Store: Send + Sync {
    /// Write or overwrite an entry.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Read an entry.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Read the checkpoint. `MissingKey` means the store was never initialized.
    fn get_checkpoint(&self) -> Result<Checkpoint> {
        let data = self.get(CHECKPOINT_KEY)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Advance the checkpoint. Callers write the head block first.
    fn set_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let data = serde_json::to_vec(checkpoint)?;
        self.put(CHECKPOINT_KEY, &data)
    }

    fn put_block(&self, block: &Block) -> Result<()> {
        let data = serde_json::to_vec(block)?;
        self.put(&block_key(block.digest()), &data)
    }

    /// Load a block and check it is the one `digest` names.
    fn get_block(&self, digest: &str) -> Result<Block> {
        let data = self.get(&block_key(digest))?;
        let block: Block = serde_json::from_slice(&data).map_err(|e| {
            LedgerError::ChainCorruption(format!("undecodable block {}: {}", digest, e))
        })?;
        if block.digest() != digest || !block.verify() {
            return Err(LedgerError::ChainCorruption(format!(
                "block integrity check failed: {}",
                digest
            )));
        }
        Ok(block)
    }
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).put(key, value)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        (**self).get(key)
    }
}

/// Split a key into its `:`-separated segments, rejecting anything that
/// could escape the store directory.
fn key_segments(key: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = key.split(':').collect();
    let valid = segments.iter().all(|s| {
        !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    });
    if !valid {
        return Err(LedgerError::InvalidKey(key.into()));
    }
    Ok(segments)
}

/// Flush a directory's entries (renames, new children) to disk.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// `create_dir_all` that also makes each new directory's entry durable.
fn create_dirs_synced(dir: &Path) -> std::io::Result<()> {
    let missing: Vec<&Path> = dir
        .ancestors()
        .take_while(|d| !d.as_os_str().is_empty() && !d.exists())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    for created in missing.iter().rev() {
        match created.parent() {
            Some(parent) if parent.as_os_str().is_empty() => sync_dir(Path::new("."))?,
            Some(parent) => sync_dir(parent)?,
            None => {}
        }
    }
    Ok(())
}

/// File-backed store: one file per entry under a root directory.
///
/// Blocks live at `blocks/<first 2 digest chars>/<digest>` (like git), the
/// checkpoint at `checkpoint`. Writes go through a synced temporary file
/// and a rename, then the directory is synced, so a crash never loses a
/// block whose checkpoint survived and readers never see a torn entry.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open or create a store at the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        create_dirs_synced(dir).map_err(|e| LedgerError::write(&dir.display().to_string(), e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        let segments = key_segments(key)?;
        let mut path = self.dir.clone();
        match segments.as_slice() {
            [BLOCK_NAMESPACE, digest] => {
                let prefix = &digest[..2.min(digest.len())];
                path.push(BLOCKS_DIR);
                path.push(prefix);
                path.push(digest);
            }
            _ => path.extend(segments.iter()),
        }
        Ok(path)
    }
}

impl Store for FileStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.entry_path(key)?;
        let parent = path.parent().unwrap_or(&self.dir);
        create_dirs_synced(parent).map_err(|e| LedgerError::write(key, e))?;
        let tmp = path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(value)?;
            f.sync_all()?;
            fs::rename(&tmp, &path)?;
            sync_dir(parent)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(LedgerError::write(key, e));
        }
        debug!(key, bytes = value.len(), "stored entry");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.entry_path(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(LedgerError::MissingKey(key.into())),
            Err(e) => Err(LedgerError::read(key, e)),
        }
    }
}

/// In-memory store for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Store for MemoryStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        key_segments(key)?;
        self.entries.write().insert(key.into(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        key_segments(key)?;
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| LedgerError::MissingKey(key.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filestore_put_get() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();

        let block = Block::genesis("test data");
        store.put_block(&block).unwrap();

        let retrieved = store.get_block(block.digest()).unwrap();
        assert_eq!(retrieved, block);
    }

    #[test]
    fn filestore_shards_blocks_by_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        let block = Block::genesis("g");
        store.put_block(&block).unwrap();

        let digest = block.digest();
        let expected = tmp.path().join("blocks").join(&digest[..2]).join(digest);
        assert!(expected.is_file());
    }

    #[test]
    fn missing_key_is_distinct_from_read_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        assert!(matches!(
            store.get("block:abcdef"),
            Err(LedgerError::MissingKey(_))
        ));
        assert!(matches!(
            store.get_checkpoint(),
            Err(LedgerError::MissingKey(_))
        ));
    }

    #[test]
    fn checkpoint_roundtrip_and_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        let first = Checkpoint {
            head_digest: "aa".into(),
            height: 1,
        };
        let second = Checkpoint {
            head_digest: "bb".into(),
            height: 2,
        };
        store.set_checkpoint(&first).unwrap();
        store.set_checkpoint(&second).unwrap();
        assert_eq!(store.get_checkpoint().unwrap(), second);
        assert!(!tmp.path().join("checkpoint.tmp").exists());
    }

    #[test]
    fn filestore_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let block = Block::genesis("persisted");
        {
            let store = FileStore::open(tmp.path()).unwrap();
            store.put_block(&block).unwrap();
        }
        let store = FileStore::open(tmp.path()).unwrap();
        assert_eq!(store.get_block(block.digest()).unwrap(), block);
    }

    #[test]
    fn rejects_path_escaping_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        for key in ["../etc", "block:../x", "", "block:", "a/b"] {
            assert!(
                matches!(store.put(key, b"x"), Err(LedgerError::InvalidKey(_))),
                "{key:?} accepted"
            );
        }
    }

    #[test]
    fn get_block_detects_tampering() {
        let store = MemoryStore::new();
        let block = Block::genesis("original");
        let mut json = serde_json::to_value(&block).unwrap();
        json["payload"] = "tampered".into();
        store
            .put(&block_key(block.digest()), &serde_json::to_vec(&json).unwrap())
            .unwrap();
        assert!(matches!(
            store.get_block(block.digest()),
            Err(LedgerError::ChainCorruption(_))
        ));
    }

    #[test]
    fn get_block_detects_misfiled_block() {
        let store = MemoryStore::new();
        let a = Block::genesis("a");
        let b = Block::genesis("b");
        store
            .put(&block_key(a.digest()), &serde_json::to_vec(&b).unwrap())
            .unwrap();
        assert!(matches!(
            store.get_block(a.digest()),
            Err(LedgerError::ChainCorruption(_))
        ));
    }

    #[test]
    fn memory_store_basics() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        let b = Block::genesis("mem");
        store.put_block(&b).unwrap();
        assert!(store.contains(&block_key(b.digest())));
        assert_eq!(store.len(), 1);
        assert!(matches!(
            store.get("checkpoint"),
            Err(LedgerError::MissingKey(_))
        ));
    }

    #[test]
    fn create_dirs_synced_builds_nested_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b").join("c");
        create_dirs_synced(&nested).unwrap();
        assert!(nested.is_dir());
        // Existing tree is a no-op.
        create_dirs_synced(&nested).unwrap();
    }

    #[test]
    fn put_into_blocked_directory_is_write_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        // A plain file where the shard directory has to go.
        fs::write(tmp.path().join("blocks"), b"x").unwrap();
        let block = Block::genesis("g");
        assert!(matches!(
            store.put_block(&block),
            Err(LedgerError::StorageWrite { .. })
        ));
    }

    #[test]
    fn filestore_open_creates_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("fresh").join("ledger");
        let store = FileStore::open(&root).unwrap();
        store.put(CHECKPOINT_KEY, b"{}").unwrap();
        assert!(root.join("checkpoint").is_file());
        assert!(!root.join("checkpoint.tmp").exists());
    }
}
