//! Named, file-backed memory map holding the frame buffers.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, info, warn};

use crate::error::{BufferError, Result};

/// Bytes reserved at the start of the region for its own header.
pub const REGION_HEADER_LEN: usize = 32;

const REGION_MAGIC: u64 = u64::from_le_bytes(*b"CAMEMUSB");

/// Buffer count and per-buffer size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    pub buffer_count: usize,
    pub buffer_size: usize,
}

impl RegionLayout {
    pub fn new(buffer_count: usize, buffer_size: usize) -> Result<Self> {
        if buffer_count == 0 {
            return Err(BufferError::InvalidLayout("buffer count is zero".into()));
        }
        if buffer_size == 0 {
            return Err(BufferError::InvalidLayout("buffer size is zero".into()));
        }
        if buffer_count.checked_mul(buffer_size).is_none() {
            return Err(BufferError::InvalidLayout(format!(
                "{buffer_count} buffers of {buffer_size} bytes overflow"
            )));
        }
        Ok(Self {
            buffer_count,
            buffer_size,
        })
    }

    /// As many `buffer_size` buffers as fit in `memory_size` bytes.
    pub fn from_memory_size(memory_size: usize, buffer_size: usize) -> Result<Self> {
        if buffer_size == 0 {
            return Err(BufferError::InvalidLayout("buffer size is zero".into()));
        }
        Self::new(memory_size / buffer_size, buffer_size)
    }

    pub fn region_len(&self) -> usize {
        REGION_HEADER_LEN + self.buffer_count * self.buffer_size
    }

    fn buffer_range(&self, index: usize) -> std::ops::Range<usize> {
        let start = REGION_HEADER_LEN + index * self.buffer_size;
        start..start + self.buffer_size
    }
}

/// Memory map shared between the producer and its consumers.
///
/// The creating side owns the backing file and removes it on drop.
pub struct SharedRegion {
    name: Option<String>,
    path: Option<PathBuf>,
    mmap: MmapMut,
    layout: RegionLayout,
    manager_id: u64,
    owner: bool,
}

impl SharedRegion {
    /// Create `name` under the platform shared-memory directory.
    pub fn create(name: &str, layout: RegionLayout) -> Result<Self> {
        Self::create_in(shm_dir(), name, layout)
    }

    /// Create `name` under an explicit directory.
    pub fn create_in(dir: impl AsRef<Path>, name: &str, layout: RegionLayout) -> Result<Self> {
        validate_name(name)?;
        let path = dir.as_ref().join(name);

        let mut options = OpenOptions::new();
        options.create(true).truncate(true).read(true).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(&path).map_err(|source| io_error(&path, source))?;
        file.set_len(layout.region_len() as u64)
            .map_err(|source| io_error(&path, source))?;

        // SAFETY: the file was just created with the mapped length and is
        // only resized by this handle.
        let mmap = unsafe { MmapOptions::new().map_mut(&file) }
            .map_err(|source| io_error(&path, source))?;

        info!(
            name,
            path = %path.display(),
            buffers = layout.buffer_count,
            buffer_size = layout.buffer_size,
            "shared buffer region created"
        );
        let mut region = Self {
            name: Some(name.to_string()),
            path: Some(path),
            mmap,
            layout,
            manager_id: new_manager_id(),
            owner: true,
        };
        region.write_region_header();
        Ok(region)
    }

    /// Anonymous, process-private region with the same layout rules.
    pub fn anonymous(layout: RegionLayout) -> Result<Self> {
        let mmap = MmapMut::map_anon(layout.region_len()).map_err(|source| BufferError::Io {
            path: PathBuf::from("<anonymous>"),
            source,
        })?;
        let mut region = Self {
            name: None,
            path: None,
            mmap,
            layout,
            manager_id: new_manager_id(),
            owner: true,
        };
        region.write_region_header();
        Ok(region)
    }

    /// Attach to an existing region by name.
    pub fn open(name: &str) -> Result<Self> {
        Self::open_in(shm_dir(), name)
    }

    /// Attach to an existing region under an explicit directory.
    pub fn open_in(dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        validate_name(name)?;
        let path = dir.as_ref().join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| io_error(&path, source))?;
        let len = file_len(&file, &path)?;
        if len < REGION_HEADER_LEN {
            return Err(BufferError::InvalidLayout(format!(
                "region is {len} bytes, smaller than its header"
            )));
        }

        // SAFETY: the length was checked above; the creator never shrinks the file.
        let mmap = unsafe { MmapOptions::new().map_mut(&file) }
            .map_err(|source| io_error(&path, source))?;

        let magic = read_u64(&mmap, 0);
        if magic != REGION_MAGIC {
            return Err(BufferError::InvalidLayout(format!(
                "bad region magic {magic:#018x}"
            )));
        }
        let manager_id = read_u64(&mmap, 8);
        let layout = RegionLayout::new(
            usize_field(read_u64(&mmap, 16))?,
            usize_field(read_u64(&mmap, 24))?,
        )?;
        if layout.region_len() != len {
            return Err(BufferError::InvalidLayout(format!(
                "header describes {} bytes but region is {len}",
                layout.region_len()
            )));
        }

        debug!(name, manager_id, "attached to shared buffer region");
        Ok(Self {
            name: Some(name.to_string()),
            path: Some(path),
            mmap,
            layout,
            manager_id,
            owner: false,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn layout(&self) -> RegionLayout {
        self.layout
    }

    /// Identifier of the process instance that created the region.
    pub fn manager_id(&self) -> u64 {
        self.manager_id
    }

    pub fn buffer(&self, index: usize) -> Result<&[u8]> {
        self.check_index(index)?;
        Ok(&self.mmap[self.layout.buffer_range(index)])
    }

    pub fn buffer_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        self.check_index(index)?;
        let range = self.layout.buffer_range(index);
        Ok(&mut self.mmap[range])
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.layout.buffer_count {
            return Err(BufferError::UnknownSlot {
                slot: index,
                capacity: self.layout.buffer_count,
            });
        }
        Ok(())
    }

    fn write_region_header(&mut self) {
        let fields = [
            REGION_MAGIC,
            self.manager_id,
            self.layout.buffer_count as u64,
            self.layout.buffer_size as u64,
        ];
        for (chunk, field) in self.mmap[..REGION_HEADER_LEN]
            .chunks_exact_mut(8)
            .zip(fields)
        {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        if let Some(path) = &self.path {
            if let Err(err) = std::fs::remove_file(path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %err, "failed to remove shared buffer region");
                }
            }
        }
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("name", &self.name)
            .field("layout", &self.layout)
            .field("manager_id", &self.manager_id)
            .field("owner", &self.owner)
            .finish()
    }
}

/// `/dev/shm` when present, otherwise the temp directory.
pub fn shm_dir() -> PathBuf {
    let dev_shm = Path::new("/dev/shm");
    if dev_shm.is_dir() {
        dev_shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(BufferError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn new_manager_id() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (u64::from(std::process::id()) << 32) | u64::from(nanos)
}

fn io_error(path: &Path, source: std::io::Error) -> BufferError {
    BufferError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn file_len(file: &File, path: &Path) -> Result<usize> {
    let len = file
        .metadata()
        .map_err(|source| io_error(path, source))?
        .len();
    usize_field(len)
}

fn usize_field(value: u64) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| BufferError::InvalidLayout(format!("{value} does not fit in usize")))
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}
