//! Stat entries

use crate::ntfs::attribute::{Attribute, FileRecord};
use crate::ntfs::structs::filetime_to_unix;
use crate::vfs::pathspec::PathSpec;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// File type bits of st_mode
pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;

/// Metadata snapshot of a file, directory or data stream.
/// Timestamps are whole seconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatEntry {
    /// Normalized path specification addressing exactly this object
    pub pathspec: PathSpec,
    pub st_mode: u32,
    /// Size of the selected stream; absent for directories
    pub st_size: Option<u64>,
    pub st_atime: i64,
    pub st_mtime: i64,
    pub st_crtime: i64,
}

impl StatEntry {
    /// Stat of an NTFS file. Timestamps come from $STANDARD_INFORMATION,
    /// falling back to the display $FILE_NAME.
    pub fn from_record(file: &FileRecord, stream: Option<&Attribute>, pathspec: PathSpec) -> Self {
        let (created, modified, accessed) = match file.standard_information() {
            Some(si) => (si.creation_time, si.modification_time, si.access_time),
            None => file
                .best_file_name()
                .map(|n| (n.creation_time, n.modification_time, n.access_time))
                .unwrap_or_default(),
        };

        let is_directory = file.is_directory();
        let st_size = match stream {
            Some(stream) => Some(stream.data_size()),
            None if is_directory => None,
            None => Some(0),
        };

        Self {
            pathspec,
            st_mode: if is_directory { S_IFDIR } else { S_IFREG },
            st_size,
            st_atime: filetime_to_unix(accessed),
            st_mtime: filetime_to_unix(modified),
            st_crtime: filetime_to_unix(created),
        }
    }

    /// Stat of an OS file from its metadata
    pub fn from_metadata(metadata: &std::fs::Metadata, pathspec: PathSpec) -> Self {
        fn seconds(time: std::io::Result<SystemTime>) -> i64 {
            time.ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0)
        }

        let is_directory = metadata.is_dir();
        Self {
            pathspec,
            st_mode: if is_directory { S_IFDIR } else { S_IFREG },
            st_size: if is_directory { None } else { Some(metadata.len()) },
            st_atime: seconds(metadata.accessed()),
            st_mtime: seconds(metadata.modified()),
            st_crtime: seconds(metadata.created()),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.st_mode & S_IFMT == S_IFDIR
    }
}
