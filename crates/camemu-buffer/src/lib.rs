//! Fixed pool of frame buffers in a named shared-memory region.
//!
//! The region is laid out as a small region header followed by `count`
//! equally sized buffers; each buffer holds a [`FrameHeader`] and the frame
//! payload. [`BufferPool`] tracks which side owns each slot so a buffer is
//! never written while the consumer still holds it.

pub mod error;
pub mod header;
pub mod pool;
pub mod region;

pub use error::{BufferError, Result};
pub use header::{DataType, FrameHeader, FRAME_HEADER_LEN};
pub use pool::{BufferPool, BufferSlot, PoolStats, SlotOwner};
pub use region::{RegionLayout, SharedRegion, REGION_HEADER_LEN};

/// Shared buffer name used when none is configured.
pub const DEFAULT_SHARED_BUFFER_NAME: &str = "frame_producer";
/// Total shared memory budget used when none is configured.
pub const DEFAULT_SHARED_MEMORY_SIZE: usize = 16_000_000;
/// Size of a single buffer used when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 4_000_000;
