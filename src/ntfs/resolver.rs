//! Path resolution
//!
//! Turns a path or an explicit inode into a file record and its canonical
//! path built from on-disk names.

use crate::error::{NtfsError, Result};
use crate::ntfs::attribute::FileRecord;
use crate::ntfs::collation::CaseMode;
use crate::ntfs::index::DirectoryIndex;
use crate::ntfs::structs::{FileReference, MFT_RECORD_ROOT};
use crate::ntfs::volume::NtfsVolume;
use log::debug;
use std::sync::Arc;

/// A resolved file and its canonical path
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub file: FileRecord,
    /// Absolute path with the on-disk casing of every component
    pub path: String,
}

impl ResolvedPath {
    pub fn reference(&self) -> FileReference {
        self.file.reference()
    }
}

/// Split a path into its components, dropping empty ones
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Join components into an absolute path ("/" for none)
pub fn join_path<S: AsRef<str>>(parts: &[S]) -> String {
    if parts.is_empty() {
        return "/".to_string();
    }
    parts.iter().fold(String::new(), |mut path, part| {
        path.push('/');
        path.push_str(part.as_ref());
        path
    })
}

/// Resolve by inode when one is given (the path is then only a fallback
/// name), otherwise walk the path from the root directory.
pub fn resolve(
    volume: &Arc<NtfsVolume>,
    path: Option<&str>,
    inode: Option<u64>,
    mode: CaseMode,
) -> Result<ResolvedPath> {
    match inode {
        Some(inode) => {
            let file = volume.file_record(FileReference::from_raw(inode))?;
            let path = canonical_path(volume, &file).unwrap_or_else(|| {
                let parts: Vec<&str> = components(path.unwrap_or("/")).collect();
                join_path(&parts)
            });
            Ok(ResolvedPath { file, path })
        }
        None => walk(volume, path.unwrap_or("/"), mode),
    }
}

fn walk(volume: &Arc<NtfsVolume>, path: &str, mode: CaseMode) -> Result<ResolvedPath> {
    let mut current = volume.root()?;
    let mut parents: Vec<FileRecord> = Vec::new();
    let mut names: Vec<String> = Vec::new();

    for component in components(path) {
        match component {
            "." => continue,
            ".." => {
                if let Some(parent) = parents.pop() {
                    current = parent;
                    names.pop();
                }
                continue;
            }
            _ => {}
        }

        if !current.is_directory() {
            debug!(target: "ntfs::volume", "'{}' of '{}' is below a non-directory", component, path);
            return Err(NtfsError::not_found(path, component));
        }

        let index = DirectoryIndex::open(volume.clone(), &current)?;
        let entry = index.lookup(component, mode)?.ok_or_else(|| {
            debug!(target: "ntfs::volume", "'{}' of '{}' not found ({:?})", component, path, mode);
            NtfsError::not_found(path, component)
        })?;

        let child = volume.file_record(entry.file_reference)?;
        names.push(entry.name().unwrap_or(component).to_string());
        parents.push(std::mem::replace(&mut current, child));
    }

    Ok(ResolvedPath {
        file: current,
        path: join_path(&names),
    })
}

/// Rebuild a file's path from its $FILE_NAME parent chain. Returns `None`
/// when the chain is broken, loops, or is deeper than the configured bound.
pub fn canonical_path(volume: &NtfsVolume, file: &FileRecord) -> Option<String> {
    if file.record_number() == MFT_RECORD_ROOT {
        return Some("/".to_string());
    }

    let mut names = Vec::new();
    let mut current = file.clone();

    for _ in 0..volume.config().max_path_depth {
        let name = current.best_file_name()?;
        names.push(name.name);
        let parent = name.parent_reference;

        if parent.record_number() == MFT_RECORD_ROOT {
            names.reverse();
            return Some(join_path(&names));
        }
        if parent.record_number() == current.record_number() {
            return None;
        }
        current = volume.file_record(parent).ok()?;
    }

    debug!(
        target: "ntfs::volume",
        "parent chain of record {} exceeds {} levels",
        file.record_number(),
        volume.config().max_path_depth
    );
    None
}
