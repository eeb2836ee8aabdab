//! Handle registry over nested path specifications
//!
//! `Vfs::open` walks a path specification from its outermost layer inwards:
//! the OS layer supplies the bytes of an image, every NTFS layer interprets
//! the bytes produced by the layer before it. Volumes are opened once per
//! outer specification and shared by every handle opened through them.

pub mod ntfs_file;
pub mod os_file;
pub mod pathspec;
pub mod stat;

pub use ntfs_file::{ListFiles, NtfsFile};
pub use os_file::OsFile;
pub use pathspec::{CaseMode, PathSpec, PathType};
pub use stat::{StatEntry, S_IFDIR, S_IFREG};

use crate::config::VfsConfig;
use crate::error::{NtfsError, Result};
use crate::ntfs::source::ByteSource;
use crate::ntfs::volume::NtfsVolume;
use dashmap::DashMap;
use log::{debug, info};
use std::sync::Arc;

// ============================================================================
// VfsHandle
// ============================================================================

/// An open handle of any supported layer type
pub enum VfsHandle {
    Os(OsFile),
    Ntfs(NtfsFile),
}

/// Directory listing of any handle type
pub enum FileListing {
    Os(std::vec::IntoIter<Result<StatEntry>>),
    Ntfs(ListFiles),
}

impl Iterator for FileListing {
    type Item = Result<StatEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            FileListing::Os(entries) => entries.next(),
            FileListing::Ntfs(entries) => entries.next(),
        }
    }
}

impl VfsHandle {
    /// Read up to `max` bytes at the cursor and advance it
    pub fn read(&mut self, max: usize) -> Result<Vec<u8>> {
        match self {
            VfsHandle::Os(file) => file.read(max),
            VfsHandle::Ntfs(file) => file.read(max),
        }
    }

    pub fn stat(&self) -> StatEntry {
        match self {
            VfsHandle::Os(file) => file.stat(),
            VfsHandle::Ntfs(file) => file.stat(),
        }
    }

    pub fn list_names(&self) -> Result<Vec<String>> {
        match self {
            VfsHandle::Os(file) => file.list_names(),
            VfsHandle::Ntfs(file) => file.list_names(),
        }
    }

    pub fn list_files(&self) -> Result<FileListing> {
        match self {
            VfsHandle::Os(file) => Ok(FileListing::Os(file.list_files()?.into_iter())),
            VfsHandle::Ntfs(file) => Ok(FileListing::Ntfs(file.list_files()?)),
        }
    }

    pub fn pathspec(&self) -> &PathSpec {
        match self {
            VfsHandle::Os(file) => file.pathspec(),
            VfsHandle::Ntfs(file) => file.pathspec(),
        }
    }

    /// Handle contents as a byte source, for the next nested layer
    pub fn byte_source(&self) -> Result<Arc<dyn ByteSource>> {
        match self {
            VfsHandle::Os(file) => file.byte_source(),
            VfsHandle::Ntfs(file) => Ok(Arc::new(file.stream_source()?)),
        }
    }
}

// ============================================================================
// Vfs
// ============================================================================

/// Opens handles and shares opened volumes between them
pub struct Vfs {
    config: VfsConfig,
    /// Opened volumes keyed by the specification of their byte source
    volumes: DashMap<PathSpec, Arc<NtfsVolume>>,
}

impl Vfs {
    pub fn new(config: VfsConfig) -> Self {
        Self {
            config,
            volumes: DashMap::new(),
        }
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    /// Open the innermost layer of `spec`
    pub fn open(&self, spec: &PathSpec) -> Result<VfsHandle> {
        if spec.pathtype != PathType::Os {
            return Err(NtfsError::InvalidPathSpec(format!(
                "outermost layer must be OS, got {:?}",
                spec.pathtype
            )));
        }

        let mut handle = VfsHandle::Os(OsFile::open(spec, &self.config)?);

        for (depth, layer) in spec.layers().into_iter().enumerate().skip(1) {
            match layer.pathtype {
                PathType::Ntfs => {
                    let outer = spec.truncated(depth);
                    let volume = self.volume(&outer, &handle)?;
                    handle = VfsHandle::Ntfs(NtfsFile::open(volume, outer, layer)?);
                }
                PathType::Os => {
                    return Err(NtfsError::UnsupportedPathType(format!(
                        "OS layer nested at depth {}",
                        depth
                    )));
                }
            }
        }

        Ok(handle)
    }

    /// The volume stored in the bytes of `container`, opened on first use
    fn volume(&self, outer: &PathSpec, container: &VfsHandle) -> Result<Arc<NtfsVolume>> {
        if let Some(volume) = self.volumes.get(outer).map(|v| Arc::clone(v.value())) {
            debug!(target: "vfs", "reusing volume at depth {}", outer.depth());
            return Ok(volume);
        }

        let volume = NtfsVolume::open(container.byte_source()?, &self.config)?;
        info!(target: "vfs", "opened NTFS volume at depth {}", outer.depth());
        Ok(self
            .volumes
            .entry(outer.clone())
            .or_insert(volume)
            .value()
            .clone())
    }

    /// Number of volumes currently held open
    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    /// Drop every shared volume; open handles keep theirs alive
    pub fn clear(&self) {
        self.volumes.clear();
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new(VfsConfig::default())
    }
}
