//! Where frame payloads come from.

use std::fs;
use std::path::{Path, PathBuf};

use camemu_buffer::{BufferError, DataType};
use tracing::debug;

use crate::config::CameraConfig;
use crate::error::{CameraError, Result};

/// One frame ready to be written into a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data_type: DataType,
    pub payload: Vec<u8>,
}

/// Produces the payload for each frame number of a run.
///
/// A frame larger than `max_payload` is refused with
/// [`BufferError::PayloadTooLarge`] before any of it is built or read.
pub trait FrameSource: Send {
    fn next_frame(&mut self, frame_number: u32, max_payload: usize) -> Result<Frame>;
}

fn too_large(size: usize, capacity: usize) -> CameraError {
    CameraError::Buffer(BufferError::PayloadTooLarge { size, capacity })
}

/// Pick the source described by `config`.
pub fn from_config(config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    if config.images_path.is_empty() {
        Ok(Box::new(PatternSource::new(config)))
    } else {
        Ok(Box::new(DirectorySource::open(&config.images_path, config)?))
    }
}

/// Synthetic diagonal gradient that shifts by one step per frame.
#[derive(Debug, Clone)]
pub struct PatternSource {
    width: u32,
    height: u32,
    data_type: DataType,
}

impl PatternSource {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            width: config.frame_width,
            height: config.frame_height,
            data_type: config.data_type,
        }
    }
}

impl FrameSource for PatternSource {
    fn next_frame(&mut self, frame_number: u32, max_payload: usize) -> Result<Frame> {
        let bpp = self.data_type.bytes_per_pixel();
        let len = frame_len(self.width, self.height, self.data_type).unwrap_or(usize::MAX);
        if len > max_payload {
            return Err(too_large(len, max_payload));
        }
        let mut payload = Vec::with_capacity(len);
        for y in 0..self.height {
            for x in 0..self.width {
                let level = x.wrapping_add(y).wrapping_add(frame_number);
                let bytes = level.to_le_bytes();
                // Low bytes first; wider types are zero-extended.
                for i in 0..bpp {
                    payload.push(bytes.get(i).copied().unwrap_or(0));
                }
            }
        }
        Ok(Frame {
            width: self.width,
            height: self.height,
            data_type: self.data_type,
            payload,
        })
    }
}

/// Payload bytes of a `width` x `height` frame, `None` if it overflows.
pub fn frame_len(width: u32, height: u32, data_type: DataType) -> Option<usize> {
    usize::try_from(width)
        .ok()?
        .checked_mul(usize::try_from(height).ok()?)?
        .checked_mul(data_type.bytes_per_pixel())
}

/// Cycles through the regular files of a directory in name order.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    files: Vec<PathBuf>,
    width: u32,
    height: u32,
    data_type: DataType,
}

impl DirectorySource {
    pub fn open(dir: impl AsRef<Path>, config: &CameraConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|source| CameraError::Source {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CameraError::Source {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(CameraError::EmptySource(dir.to_path_buf()));
        }
        files.sort();
        debug!(dir = %dir.display(), files = files.len(), "frame directory opened");

        Ok(Self {
            files,
            width: config.frame_width,
            height: config.frame_height,
            data_type: config.data_type,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self, frame_number: u32, max_payload: usize) -> Result<Frame> {
        let path = &self.files[frame_number as usize % self.files.len()];
        let source_error = |source| CameraError::Source {
            path: path.clone(),
            source,
        };
        let size = fs::metadata(path).map_err(source_error)?.len();
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        if size > max_payload {
            return Err(too_large(size, max_payload));
        }
        let payload = fs::read(path).map_err(source_error)?;
        Ok(Frame {
            width: self.width,
            height: self.height,
            data_type: self.data_type,
            payload,
        })
    }
}
