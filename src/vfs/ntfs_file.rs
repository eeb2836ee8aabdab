//! File handle on an NTFS volume

use crate::error::{NtfsError, Result};
use crate::ntfs::attribute::{Attribute, FileRecord};
use crate::ntfs::collation::CaseMode;
use crate::ntfs::index::{is_hidden_short_name, DirectoryIndex, IndexEntries};
use crate::ntfs::resolver::resolve;
use crate::ntfs::stream::{read_attribute, select_stream, NtfsStreamSource};
use crate::ntfs::structs::FileReference;
use crate::ntfs::volume::NtfsVolume;
use crate::vfs::pathspec::{PathSpec, PathType};
use crate::vfs::stat::StatEntry;
use log::{debug, warn};
use std::collections::{HashSet, VecDeque};
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

/// The NTFS layer of an outgoing path specification: canonical path, the
/// file's reference as inode, literal matching, canonical stream name
fn ntfs_pathspec(outer: &PathSpec, path: &str, reference: FileReference, stream: Option<&str>) -> PathSpec {
    let mut layer = PathSpec::new(PathType::Ntfs, path)
        .with_inode(reference.raw())
        .with_path_options(CaseMode::Literal);
    layer.stream_name = stream.map(str::to_string);
    outer.clone().with_nested(layer)
}

fn child_path(directory: &str, name: &str) -> String {
    if directory.ends_with('/') {
        format!("{}{}", directory, name)
    } else {
        format!("{}/{}", directory, name)
    }
}

// ============================================================================
// NtfsFile
// ============================================================================

/// An open file, directory or alternate data stream with a read cursor
pub struct NtfsFile {
    volume: Arc<NtfsVolume>,
    /// Layers addressing the volume itself
    outer: PathSpec,
    file: FileRecord,
    path: String,
    /// Selected $DATA attribute; `None` for a directory opened without a stream
    stream: Option<Attribute>,
    pathspec: PathSpec,
    offset: u64,
}

impl NtfsFile {
    /// Open the location named by `layer` inside `volume`. `outer` is the
    /// specification of the volume's byte source.
    pub fn open(volume: Arc<NtfsVolume>, outer: PathSpec, layer: &PathSpec) -> Result<Self> {
        if layer.pathtype != PathType::Ntfs {
            return Err(NtfsError::UnsupportedPathType(format!("{:?}", layer.pathtype)));
        }
        let mode = layer
            .path_options
            .unwrap_or(volume.config().default_case_mode);

        let resolved = resolve(&volume, layer.path.as_deref(), layer.inode, mode)?;
        let file = resolved.file;

        let requested = layer.stream_name.as_deref().filter(|name| !name.is_empty());
        let stream = match requested {
            Some(name) => Some(select_stream(&file, name, mode)?.clone()),
            None if file.is_directory() => None,
            None => select_stream(&file, "", mode).ok().cloned(),
        };

        // Only a requested stream appears in the outgoing specification
        let stream_name = requested.and(stream.as_ref().map(|s| s.name.as_str()));
        let pathspec = ntfs_pathspec(&outer, &resolved.path, file.reference(), stream_name);

        debug!(
            target: "vfs",
            "opened {} as record {} ({})",
            resolved.path,
            file.reference(),
            if file.is_directory() { "directory" } else { "file" }
        );

        Ok(Self {
            volume,
            outer,
            file,
            path: resolved.path,
            stream,
            pathspec,
            offset: 0,
        })
    }

    /// Normalized specification of this handle
    pub fn pathspec(&self) -> &PathSpec {
        &self.pathspec
    }

    pub fn file_record(&self) -> &FileRecord {
        &self.file
    }

    pub fn volume(&self) -> &Arc<NtfsVolume> {
        &self.volume
    }

    pub fn is_directory(&self) -> bool {
        self.file.is_directory()
    }

    /// Size of the selected stream
    pub fn size(&self) -> u64 {
        self.stream.as_ref().map(Attribute::data_size).unwrap_or(0)
    }

    pub fn tell(&self) -> u64 {
        self.offset
    }

    pub fn seek_to(&mut self, offset: u64) {
        self.offset = offset;
    }

    fn selected(&self) -> Result<&Attribute> {
        self.stream
            .as_ref()
            .ok_or_else(|| NtfsError::IsADirectory(self.path.clone()))
    }

    /// Read up to `max` bytes at the cursor and advance it
    pub fn read(&mut self, max: usize) -> Result<Vec<u8>> {
        let stream = self.selected()?;
        let wanted = (max as u64).min(stream.data_size().saturating_sub(self.offset)) as usize;
        let mut buffer = vec![0u8; wanted];
        let n = read_attribute(&self.volume, stream, self.offset, &mut buffer)?;
        buffer.truncate(n);
        self.offset += n as u64;
        Ok(buffer)
    }

    pub fn stat(&self) -> StatEntry {
        StatEntry::from_record(&self.file, self.stream.as_ref(), self.pathspec.clone())
    }

    /// The selected stream as a byte source, for opening a nested volume
    pub fn stream_source(&self) -> Result<NtfsStreamSource> {
        NtfsStreamSource::new(self.volume.clone(), self.selected()?.clone())
    }

    fn index(&self) -> Result<DirectoryIndex> {
        if !self.file.is_directory() {
            return Err(NtfsError::NotADirectory(self.path.clone()));
        }
        DirectoryIndex::open(self.volume.clone(), &self.file)
    }

    /// Names of the directory's children, each once. A DOS short name is only
    /// listed for a child that has no long name in this directory.
    pub fn list_names(&self) -> Result<Vec<String>> {
        let own = self.file.record_number();
        let mut seen = HashSet::new();
        let mut names = Vec::new();

        for entry in self.index()?.entries() {
            let entry = entry?;
            if entry.file_reference.record_number() == own {
                continue;
            }
            match is_hidden_short_name(&self.volume, own, &entry) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) if e.is_not_found() => {
                    debug!(target: "vfs", "skipping stale entry {:?}: {}", entry.name(), e);
                    continue;
                }
                Err(e) => return Err(e),
            }
            let Some(key) = entry.file_name else { continue };
            if seen.insert(key.name.clone()) {
                names.push(key.name);
            }
        }

        Ok(names)
    }

    /// Lazily stat every child: one entry per file plus one per alternate
    /// data stream. Each call starts a fresh traversal.
    pub fn list_files(&self) -> Result<ListFiles> {
        Ok(ListFiles {
            volume: self.volume.clone(),
            outer: self.outer.clone(),
            directory: self.path.clone(),
            directory_record: self.file.record_number(),
            entries: self.index()?.entries(),
            seen: HashSet::new(),
            pending: VecDeque::new(),
        })
    }
}

impl Read for NtfsFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let stream = self.selected()?;
        let n = read_attribute(&self.volume, stream, self.offset, buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

impl Seek for NtfsFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before the start of the stream")
        })?;
        self.offset = target;
        Ok(target)
    }
}

// ============================================================================
// ListFiles
// ============================================================================

/// Lazy directory listing yielding one stat entry at a time
pub struct ListFiles {
    volume: Arc<NtfsVolume>,
    outer: PathSpec,
    directory: String,
    directory_record: u64,
    entries: IndexEntries,
    /// (record number, name) pairs already produced
    seen: HashSet<(u64, String)>,
    /// Stream entries of the last child, produced after its base entry
    pending: VecDeque<StatEntry>,
}

impl ListFiles {
    fn expand(&mut self, reference: FileReference, name: &str) -> Result<StatEntry> {
        let child = self.volume.file_record(reference)?;
        let path = child_path(&self.directory, name);

        let unnamed = child.data_streams().find(|s| s.name.is_empty());
        let base_stream = if child.is_directory() { None } else { unnamed };
        let base = StatEntry::from_record(
            &child,
            base_stream,
            ntfs_pathspec(&self.outer, &path, child.reference(), None),
        );

        for stream in child.data_streams().filter(|s| !s.name.is_empty()) {
            self.pending.push_back(StatEntry::from_record(
                &child,
                Some(stream),
                ntfs_pathspec(&self.outer, &path, child.reference(), Some(&stream.name)),
            ));
        }
        Ok(base)
    }
}

impl Iterator for ListFiles {
    type Item = Result<StatEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(entry) = self.pending.pop_front() {
            return Some(Ok(entry));
        }

        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            let Some(ref key) = entry.file_name else { continue };
            let record = entry.file_reference.record_number();
            if record == self.directory_record {
                continue;
            }

            match is_hidden_short_name(&self.volume, self.directory_record, &entry) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) if e.is_not_found() => {
                    warn!(target: "vfs", "skipping stale entry '{}': {}", key.name, e);
                    continue;
                }
                Err(e) => return Some(Err(e)),
            }

            if !self.seen.insert((record, key.name.clone())) {
                continue;
            }

            match self.expand(entry.file_reference, &key.name) {
                Ok(stat) => return Some(Ok(stat)),
                Err(e) if e.is_not_found() => {
                    warn!(target: "vfs", "skipping stale entry '{}': {}", key.name, e);
                    continue;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
