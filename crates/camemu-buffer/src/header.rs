use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BufferError, Result};

/// Encoded size of a [`FrameHeader`].
pub const FRAME_HEADER_LEN: usize = 20;

/// Pixel data type, carried in the header as a numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum DataType {
    Uint8 = 1,
    Uint16 = 2,
    Uint32 = 3,
    Uint64 = 4,
    Float = 5,
    #[default]
    #[serde(other)]
    Unknown = 0,
}

impl DataType {
    pub const ALL: [DataType; 6] = [
        DataType::Unknown,
        DataType::Uint8,
        DataType::Uint16,
        DataType::Uint32,
        DataType::Uint64,
        DataType::Float,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    /// Codes outside the table decode as `Unknown`.
    pub fn from_code(code: u32) -> Self {
        Self::ALL
            .into_iter()
            .find(|dtype| dtype.code() == code)
            .unwrap_or(DataType::Unknown)
    }

    /// Unrecognized names map to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|dtype| dtype.name() == name)
            .unwrap_or(DataType::Unknown)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Unknown => "unknown",
            DataType::Uint8 => "uint8",
            DataType::Uint16 => "uint16",
            DataType::Uint32 => "uint32",
            DataType::Uint64 => "uint64",
            DataType::Float => "float",
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            DataType::Unknown | DataType::Uint8 => 1,
            DataType::Uint16 => 2,
            DataType::Uint32 | DataType::Float => 4,
            DataType::Uint64 => 8,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-size prefix written at the start of every filled buffer.
///
/// Encoded as five little-endian `u32`s: frame number, width, height,
/// dtype code, payload size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_number: u32,
    pub width: u32,
    pub height: u32,
    pub data_type: DataType,
    pub payload_size: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        let fields = [
            self.frame_number,
            self.width,
            self.height,
            self.data_type.code(),
            self.payload_size,
        ];
        for (chunk, field) in out.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        out
    }

    /// Decode from the first [`FRAME_HEADER_LEN`] bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(BufferError::HeaderTooShort {
                len: bytes.len(),
                needed: FRAME_HEADER_LEN,
            });
        }
        let field = |index: usize| {
            let start = index * 4;
            u32::from_le_bytes([
                bytes[start],
                bytes[start + 1],
                bytes[start + 2],
                bytes[start + 3],
            ])
        };
        Ok(Self {
            frame_number: field(0),
            width: field(1),
            height: field(2),
            data_type: DataType::from_code(field(3)),
            payload_size: field(4),
        })
    }
}
