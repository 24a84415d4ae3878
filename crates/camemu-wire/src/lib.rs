//! Length-prefixed message framing.
//!
//! Every control or notification envelope travels as a single frame:
//! - a 2-byte magic number ("CE") for stream synchronization
//! - a 4-byte little-endian payload length
//! - the payload itself
//!
//! Readers always hand back whole payloads; partial reads stay internal.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, WireConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC};
pub use error::{Result, WireError};
pub use reader::FrameReader;
pub use writer::FrameWriter;
