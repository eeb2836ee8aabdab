//! ntfs-vfs - Read-only NTFS volume parser and virtual filesystem handler
//!
//! Interprets a raw byte source (an image file, a device, or a data stream
//! inside another NTFS volume) as an NTFS volume without the host's
//! filesystem driver, and exposes path- and inode-addressed open, read, stat
//! and directory listing.
//!
//! # Features
//!
//! - **Direct MFT reading**: fixup verification, sequence-number checks, fragmented $MFT
//! - **Attribute lists**: attributes spread over extension records are merged
//! - **Alternate data streams**: named streams open, stat and list like files
//! - **Nested volumes**: an image stored inside a volume opens as a volume
//! - **Shared record cache**: bounded LRU cache per opened volume
//!
//! # Example
//!
//! ```no_run
//! use ntfs_vfs::{CaseMode, PathSpec, Vfs, VfsConfig};
//!
//! fn main() -> ntfs_vfs::Result<()> {
//!     let vfs = Vfs::new(VfsConfig::default());
//!     let spec = PathSpec::os("/evidence/ntfs.img")
//!         .with_nested(PathSpec::ntfs("/ads/ads.txt").with_stream_name("one"));
//!
//!     let mut handle = vfs.open(&spec)?;
//!     println!("{:?}", handle.read(100)?);
//!
//!     let stat = handle.stat();
//!     assert_eq!(stat.pathspec.last().path_options, Some(CaseMode::Literal));
//!     println!("inode {:?}, {:?} bytes", stat.pathspec.last().inode, stat.st_size);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod ntfs;
pub mod vfs;

// Re-export main types
pub use config::VfsConfig;
pub use error::{NtfsError, Result};
pub use ntfs::{ByteSource, CaseMode, FileReference, NtfsVolume};
pub use vfs::{FileListing, NtfsFile, PathSpec, PathType, StatEntry, Vfs, VfsHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Format Unix seconds as a human-readable UTC date string
pub fn format_unix_time(seconds: i64) -> String {
    chrono::DateTime::from_timestamp(seconds, 0)
        .unwrap_or_default()
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Format a Windows FILETIME as a human-readable date string
pub fn format_filetime(filetime: u64) -> String {
    use ntfs::structs::filetime_to_datetime;
    filetime_to_datetime(filetime).format("%Y-%m-%d %H:%M:%S").to_string()
}
