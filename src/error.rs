//! Error types for the NTFS handler
//!
//! Every failure is classified as either "the addressed object does not exist"
//! or "the volume/record is corrupt", since forensic callers report these
//! two situations differently.

use std::io;
use thiserror::Error;

/// Main error type for NTFS volume and handle operations
#[derive(Error, Debug)]
pub enum NtfsError {
    #[error("Volume is not a valid NTFS filesystem: {0}")]
    InvalidVolume(String),

    #[error("MFT record {record} is corrupt: {reason}")]
    CorruptRecord { record: u64, reason: String },

    #[error("Malformed attribute in MFT record {record}: {reason}")]
    MalformedAttribute { record: u64, reason: String },

    #[error("MFT record {0} is not in use")]
    RecordNotInUse(u64),

    #[error("Stale file reference 0x{reference:016X}: record {record} now has sequence {current}")]
    StaleReference {
        reference: u64,
        record: u64,
        current: u16,
    },

    #[error("Path component '{component}' of '{path}' not found")]
    NotFound { path: String, component: String },

    #[error("Data stream '{0}' not found")]
    StreamNotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Unsupported data stream '{name}': {reason}")]
    UnsupportedStream { name: String, reason: String },

    #[error("Unsupported path type: {0}")]
    UnsupportedPathType(String),

    #[error("Invalid path specification: {0}")]
    InvalidPathSpec(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Short read at offset {offset}: wanted {wanted} bytes, got {got}")]
    ShortRead { offset: u64, wanted: usize, got: usize },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for NTFS operations
pub type Result<T> = std::result::Result<T, NtfsError>;

impl NtfsError {
    pub(crate) fn corrupt(record: u64, reason: impl Into<String>) -> Self {
        NtfsError::CorruptRecord {
            record,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(record: u64, reason: impl Into<String>) -> Self {
        NtfsError::MalformedAttribute {
            record,
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(path: &str, component: &str) -> Self {
        NtfsError::NotFound {
            path: path.to_string(),
            component: component.to_string(),
        }
    }

    /// Check if this error means "the addressed path, inode or stream does not exist"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            NtfsError::NotFound { .. }
                | NtfsError::StreamNotFound(_)
                | NtfsError::RecordNotInUse(_)
                | NtfsError::StaleReference { .. }
        )
    }

    /// Check if this error means "the volume or a record on it is damaged"
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            NtfsError::InvalidVolume(_)
                | NtfsError::CorruptRecord { .. }
                | NtfsError::MalformedAttribute { .. }
                | NtfsError::ShortRead { .. }
        )
    }
}

impl From<NtfsError> for io::Error {
    fn from(err: NtfsError) -> Self {
        let kind = if err.is_not_found() {
            io::ErrorKind::NotFound
        } else if err.is_corruption() {
            io::ErrorKind::InvalidData
        } else {
            match &err {
                NtfsError::Io(inner) => inner.kind(),
                NtfsError::UnsupportedStream { .. } | NtfsError::UnsupportedPathType(_) => {
                    io::ErrorKind::Unsupported
                }
                _ => io::ErrorKind::InvalidInput,
            }
        };
        io::Error::new(kind, err)
    }
}
