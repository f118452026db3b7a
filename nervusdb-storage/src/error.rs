use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file magic")]
    InvalidMagic,

    #[error("storage format epoch mismatch: expected {expected}, found {found}")]
    StorageFormatMismatch { expected: u32, found: u32 },

    #[error("storage corrupted: {0}")]
    Corrupted(&'static str),

    #[error("wal record too large: {0}")]
    WalRecordTooLarge(u32),

    #[error("wal protocol error: {0}")]
    WalProtocol(&'static str),

    #[error("writer lock held: {0}")]
    LockHeld(PathBuf),

    #[error("lockless read refused: wal contains uncommitted durable work")]
    WalNotEmpty,

    #[error("page checksum mismatch: {order} primary {primary}")]
    PageChecksumMismatch { order: &'static str, primary: u32 },

    #[error("property value decode error: {0}")]
    PropertyDecode(&'static str),

    #[error("no batch is active")]
    NoActiveBatch,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
