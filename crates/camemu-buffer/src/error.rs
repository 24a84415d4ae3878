use std::path::PathBuf;
use std::time::Duration;

use crate::pool::SlotOwner;

/// Errors raised by the buffer pool, region and header codec.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// No slot became free within the wait.
    #[error("buffer pool exhausted after waiting {waited:?}")]
    PoolExhausted { waited: Duration },

    /// The slot was already in the free queue.
    #[error("buffer {slot} released twice")]
    DoubleRelease { slot: usize },

    /// Slot index outside the pool.
    #[error("unknown buffer {slot} (pool has {capacity})")]
    UnknownSlot { slot: usize, capacity: usize },

    /// The slot is not held by the side attempting the operation.
    #[error("buffer {slot} is not held for this operation (owner: {owner})")]
    NotHeld { slot: usize, owner: SlotOwner },

    /// Payload does not fit in a buffer.
    #[error("payload of {size} bytes exceeds buffer capacity of {capacity} bytes")]
    PayloadTooLarge { size: usize, capacity: usize },

    /// Fewer bytes than a frame header.
    #[error("frame header needs {needed} bytes, got {len}")]
    HeaderTooShort { len: usize, needed: usize },

    /// Region name is empty or contains a path separator.
    #[error("invalid shared buffer name '{0}'")]
    InvalidName(String),

    /// Region header or sizes do not describe a usable layout.
    #[error("invalid shared buffer layout: {0}")]
    InvalidLayout(String),

    /// File or mapping failure.
    #[error("shared buffer I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BufferError>;
