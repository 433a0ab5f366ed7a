use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("storage write failed for {key}: {source}")]
    StorageWrite {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage read failed for {key}: {source}")]
    StorageRead {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Key not found: {0}")]
    MissingKey(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Chain corruption: {0}")]
    ChainCorruption(String),

    #[error("Block not found at height {height} (chain height is {current})")]
    BlockNotFound { height: u64, current: u64 },
}

impl LedgerError {
    pub(crate) fn write(key: &str, source: std::io::Error) -> Self {
        Self::StorageWrite {
            key: key.into(),
            source,
        }
    }

    pub(crate) fn read(key: &str, source: std::io::Error) -> Self {
        Self::StorageRead {
            key: key.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
