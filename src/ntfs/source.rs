//! Byte sources
//!
//! Abstraction over the raw bytes an NTFS volume is read from: an image file,
//! a device, an in-memory buffer, a window into a partitioned disk, or a data
//! stream of a file inside another NTFS volume. All reads are positioned and
//! read-only; the length is stable for the whole session.

use crate::error::{NtfsError, Result};
use memmap2::Mmap;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

// ============================================================================
// ByteSource - positioned, read-only access
// ============================================================================

/// A readable, seekable byte source
pub trait ByteSource: Send + Sync {
    /// Read up to `buffer.len()` bytes at `offset`.
    /// Returns the number of bytes read; 0 at or beyond the end.
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> io::Result<usize>;

    /// Total length in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ByteSource + ?Sized> ByteSource for Arc<T> {
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buffer)
    }

    fn len(&self) -> u64 {
        (**self).len()
    }
}

/// Fill `buffer` completely from `offset`, failing on a short read
pub fn read_exact_at(source: &dyn ByteSource, offset: u64, buffer: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = source.read_at(offset + filled as u64, &mut buffer[filled..])?;
        if n == 0 {
            return Err(NtfsError::ShortRead {
                offset,
                wanted: buffer.len(),
                got: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

/// Clamp a read of `wanted` bytes at `offset` to a source of `len` bytes
fn clamp(offset: u64, wanted: usize, len: u64) -> usize {
    if offset >= len {
        0
    } else {
        wanted.min((len - offset).min(usize::MAX as u64) as usize)
    }
}

// ============================================================================
// MemorySource
// ============================================================================

/// Owned in-memory bytes
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ByteSource for MemorySource {
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> io::Result<usize> {
        let n = clamp(offset, buffer.len(), self.data.len() as u64);
        if n > 0 {
            let start = offset as usize;
            buffer[..n].copy_from_slice(&self.data[start..start + n]);
        }
        Ok(n)
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

// ============================================================================
// FileSource - single-cursor file handle
// ============================================================================

/// An image file or device opened through an ordinary file handle.
/// The handle has a single cursor, so the seek+read pair runs behind a lock.
pub struct FileSource {
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_file(file)
    }

    pub fn from_file(mut file: File) -> Result<Self> {
        // Devices report 0 in metadata, so ask the handle itself
        let len = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl ByteSource for FileSource {
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> io::Result<usize> {
        let n = clamp(offset, buffer.len(), self.len);
        if n == 0 {
            return Ok(0);
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < n {
            match file.read(&mut buffer[filled..n]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn len(&self) -> u64 {
        self.len
    }
}

// ============================================================================
// MmapSource - concurrent positioned reads over a mapping
// ============================================================================

/// A read-only memory map of an image file
pub struct MmapSource {
    map: Mmap,
}

impl MmapSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        // SAFETY: the mapping is read-only and the image is treated as static
        // evidence for the session; nothing in this process writes to it.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self { map })
    }
}

impl ByteSource for MmapSource {
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> io::Result<usize> {
        let n = clamp(offset, buffer.len(), self.map.len() as u64);
        if n > 0 {
            let start = offset as usize;
            buffer[..n].copy_from_slice(&self.map[start..start + n]);
        }
        Ok(n)
    }

    fn len(&self) -> u64 {
        self.map.len() as u64
    }
}

// ============================================================================
// OffsetSource - a volume inside a larger disk image
// ============================================================================

/// A window of `len` bytes starting at `offset` inside another source.
/// Reads are volume-relative; the partition offset is added automatically.
pub struct OffsetSource {
    inner: Arc<dyn ByteSource>,
    offset: u64,
    len: u64,
}

impl OffsetSource {
    pub fn new(inner: Arc<dyn ByteSource>, offset: u64, len: Option<u64>) -> Result<Self> {
        let available = inner.len().saturating_sub(offset);
        let len = len.unwrap_or(available);
        if offset > inner.len() || len > available {
            return Err(NtfsError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "window {}+{} exceeds source of {} bytes",
                    offset,
                    len,
                    inner.len()
                ),
            )));
        }
        Ok(Self { inner, offset, len })
    }
}

impl ByteSource for OffsetSource {
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> io::Result<usize> {
        let n = clamp(offset, buffer.len(), self.len);
        if n == 0 {
            return Ok(0);
        }
        self.inner.read_at(self.offset + offset, &mut buffer[..n])
    }

    fn len(&self) -> u64 {
        self.len
    }
}
