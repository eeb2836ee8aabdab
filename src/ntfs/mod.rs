//! NTFS volume parsing
//!
//! This module reads an NTFS volume from any byte source:
//! - Boot sector geometry and $MFT location (including a fragmented $MFT)
//! - MFT record reading with fixup verification and sequence checks
//! - Attribute decoding, run lists and $ATTRIBUTE_LIST extension records
//! - $I30 directory index lookup and traversal
//! - Data stream selection and reading, alternate data streams included

pub mod attribute;
pub mod cache;
pub mod collation;
pub mod geometry;
pub mod index;
pub mod mft;
pub mod resolver;
pub mod source;
pub mod stream;
pub mod structs;
pub mod volume;

// Re-export commonly used types
pub use attribute::{Attribute, AttributeData, FileRecord, NonResidentData};
pub use cache::{CacheStats, RecordCache};
pub use collation::CaseMode;
pub use geometry::VolumeGeometry;
pub use index::{DirectoryIndex, IndexEntries, IndexEntry};
pub use mft::{MftReader, MftRecord};
pub use resolver::{resolve, ResolvedPath};
pub use source::{ByteSource, FileSource, MemorySource, MmapSource, OffsetSource};
pub use stream::{select_stream, NtfsStreamSource};
pub use structs::{
    AttributeType, DataRun, FileNameAttribute, FileReference, FilenameNamespace, MftRecordHeader,
    StandardInformation,
};
pub use volume::NtfsVolume;
