//! Handler configuration
//!
//! Built explicitly by the caller and handed to `Vfs::new` / `NtfsVolume::open`.

use crate::error::{NtfsError, Result};
use crate::ntfs::collation::CaseMode;
use serde::{Deserialize, Serialize};

/// Configuration of the NTFS handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Parsed MFT records kept per volume (0 disables the cache)
    pub record_cache_capacity: usize,
    /// Matching mode used when a path specification does not name one
    pub default_case_mode: CaseMode,
    /// Map OS image files into memory instead of reading through a file handle
    pub use_mmap: bool,
    /// Longest parent chain followed when rebuilding a path from an inode
    pub max_path_depth: usize,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            record_cache_capacity: 1024,
            default_case_mode: CaseMode::Fold,
            use_mmap: false,
            max_path_depth: 256,
        }
    }
}

impl VfsConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| NtfsError::InvalidConfig(e.to_string()))
    }
}
