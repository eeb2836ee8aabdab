//! Host filesystem handle, the outermost layer of a path specification

use crate::config::VfsConfig;
use crate::error::{NtfsError, Result};
use crate::ntfs::source::{ByteSource, FileSource, MmapSource};
use crate::vfs::pathspec::PathSpec;
use crate::vfs::stat::StatEntry;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An image file, device or directory on the host
pub struct OsFile {
    pathspec: PathSpec,
    path: PathBuf,
    metadata: fs::Metadata,
    source: Option<Arc<dyn ByteSource>>,
    offset: u64,
}

fn map_io(path: &Path, err: io::Error) -> NtfsError {
    if err.kind() == io::ErrorKind::NotFound {
        let path = path.display().to_string();
        NtfsError::not_found(&path, &path)
    } else {
        NtfsError::Io(err)
    }
}

impl OsFile {
    /// Open the outermost layer of `spec`; nested layers are ignored
    pub fn open(spec: &PathSpec, config: &VfsConfig) -> Result<Self> {
        let path = spec
            .path
            .as_deref()
            .map(PathBuf::from)
            .ok_or_else(|| NtfsError::InvalidPathSpec("OS layer without a path".to_string()))?;
        let metadata = fs::metadata(&path).map_err(|e| map_io(&path, e))?;

        let source: Option<Arc<dyn ByteSource>> = if metadata.is_dir() {
            None
        } else if config.use_mmap {
            Some(Arc::new(MmapSource::open(&path)?))
        } else {
            Some(Arc::new(FileSource::open(&path)?))
        };

        Ok(Self {
            pathspec: spec.truncated(1),
            path,
            metadata,
            source,
            offset: 0,
        })
    }

    pub fn pathspec(&self) -> &PathSpec {
        &self.pathspec
    }

    /// The file's contents as a byte source
    pub fn byte_source(&self) -> Result<Arc<dyn ByteSource>> {
        self.source
            .clone()
            .ok_or_else(|| NtfsError::IsADirectory(self.path.display().to_string()))
    }

    pub fn read(&mut self, max: usize) -> Result<Vec<u8>> {
        let source = self.byte_source()?;
        let mut buffer = vec![0u8; max];
        let n = source.read_at(self.offset, &mut buffer)?;
        buffer.truncate(n);
        self.offset += n as u64;
        Ok(buffer)
    }

    pub fn stat(&self) -> StatEntry {
        StatEntry::from_metadata(&self.metadata, self.pathspec.clone())
    }

    fn children(&self) -> Result<Vec<(String, PathBuf)>> {
        if !self.metadata.is_dir() {
            return Err(NtfsError::NotADirectory(self.path.display().to_string()));
        }
        let mut children = Vec::new();
        for entry in fs::read_dir(&self.path).map_err(|e| map_io(&self.path, e))? {
            let entry = entry?;
            children.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
        Ok(children)
    }

    pub fn list_names(&self) -> Result<Vec<String>> {
        Ok(self.children()?.into_iter().map(|(name, _)| name).collect())
    }

    pub fn list_files(&self) -> Result<Vec<Result<StatEntry>>> {
        Ok(self
            .children()?
            .into_iter()
            .map(|(_, path)| {
                let metadata = fs::metadata(&path).map_err(|e| map_io(&path, e))?;
                let mut spec = self.pathspec.clone();
                spec.path = Some(path.display().to_string());
                Ok(StatEntry::from_metadata(&metadata, spec))
            })
            .collect())
    }
}
