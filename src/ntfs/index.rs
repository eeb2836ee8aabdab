//! Directory index ($I30) walker
//!
//! A directory's filename index is a B-tree: the root node lives in the
//! resident $INDEX_ROOT attribute, deeper nodes in fixed-size INDX blocks of
//! the $INDEX_ALLOCATION attribute. Entries are ordered by upcased name, and
//! an entry flagged as a node points to the subtree of keys ordered before it.

use crate::error::{NtfsError, Result};
use crate::ntfs::attribute::{Attribute, FileRecord};
use crate::ntfs::collation::{collate, collation_is_reliable, names_match, CaseMode};
use crate::ntfs::mft::apply_fixup;
use crate::ntfs::stream::read_attribute;
use crate::ntfs::structs::*;
use crate::ntfs::volume::NtfsVolume;
use log::{debug, trace};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

/// Offset of the node header inside an INDX block
const INDX_NODE_HEADER_OFFSET: usize = 0x18;

// ============================================================================
// Index entries
// ============================================================================

/// One entry of an index node
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub file_reference: FileReference,
    /// Key of the entry; `None` for the terminating entry of a node
    pub file_name: Option<FileNameAttribute>,
    /// VCN of the child node holding the keys ordered before this one
    pub subnode_vcn: Option<u64>,
    pub is_last: bool,
}

impl IndexEntry {
    pub fn name(&self) -> Option<&str> {
        self.file_name.as_ref().map(|f| f.name.as_str())
    }

    pub fn namespace(&self) -> Option<FilenameNamespace> {
        self.file_name.as_ref().map(|f| f.namespace)
    }
}

/// Parse the entries of one node. `node` starts at the node header.
pub fn parse_node(record_number: u64, node: &[u8]) -> Result<Vec<IndexEntry>> {
    let header = IndexNodeHeader::from_bytes(node)
        .ok_or_else(|| NtfsError::malformed(record_number, "index node header truncated"))?;

    let end = header.total_size as usize;
    if end > node.len() {
        return Err(NtfsError::malformed(
            record_number,
            format!("index node claims {} bytes, {} available", end, node.len()),
        ));
    }

    let mut entries = Vec::new();
    let mut offset = header.entries_offset as usize;

    loop {
        if offset >= end {
            return Err(NtfsError::malformed(
                record_number,
                "index node ends without a terminating entry",
            ));
        }

        let entry_header = IndexEntryHeader::from_bytes(&node[offset..end]).ok_or_else(|| {
            NtfsError::malformed(record_number, format!("index entry at 0x{:X} truncated", offset))
        })?;
        let length = entry_header.entry_length as usize;
        if length < IndexEntryHeader::SIZE || offset + length > end {
            return Err(NtfsError::malformed(
                record_number,
                format!("index entry at 0x{:X} has length {}", offset, length),
            ));
        }
        let bytes = &node[offset..offset + length];

        let file_name = if entry_header.is_last() || entry_header.key_length == 0 {
            None
        } else {
            let key_end = IndexEntryHeader::SIZE + entry_header.key_length as usize;
            let key = bytes
                .get(IndexEntryHeader::SIZE..key_end)
                .and_then(FileNameAttribute::from_bytes)
                .ok_or_else(|| {
                    NtfsError::malformed(
                        record_number,
                        format!("filename key of index entry at 0x{:X} is invalid", offset),
                    )
                })?;
            Some(key)
        };

        let subnode_vcn = if entry_header.has_subnode() {
            if length < IndexEntryHeader::SIZE + 8 {
                return Err(NtfsError::malformed(
                    record_number,
                    format!("index entry at 0x{:X} too short for a subnode VCN", offset),
                ));
            }
            let mut vcn = [0u8; 8];
            vcn.copy_from_slice(&bytes[length - 8..]);
            Some(u64::from_le_bytes(vcn))
        } else {
            None
        };

        let is_last = entry_header.is_last();
        entries.push(IndexEntry {
            file_reference: entry_header.file_reference,
            file_name,
            subnode_vcn,
            is_last,
        });

        if is_last {
            return Ok(entries);
        }
        offset += length;
    }
}

/// A DOS-namespace entry stands in for a file only when that file has no
/// long name in the same directory
pub fn is_hidden_short_name(volume: &NtfsVolume, directory: u64, entry: &IndexEntry) -> Result<bool> {
    match &entry.file_name {
        Some(key) if key.namespace == FilenameNamespace::Dos => {
            let child = volume.file_record(entry.file_reference)?;
            Ok(child.has_long_name_in(directory))
        }
        _ => Ok(false),
    }
}

// ============================================================================
// DirectoryIndex
// ============================================================================

/// Byte offset of the INDX block at `vcn` within the index allocation
fn block_offset(record_number: u64, vcn: u64, vcn_size: u64) -> Result<u64> {
    vcn.checked_mul(vcn_size).ok_or_else(|| {
        NtfsError::malformed(record_number, format!("index subnode VCN {} out of range", vcn))
    })
}

/// The $I30 index of one directory
#[derive(Clone)]
pub struct DirectoryIndex {
    volume: Arc<NtfsVolume>,
    record_number: u64,
    root_entries: Vec<IndexEntry>,
    allocation: Option<Attribute>,
    block_size: usize,
}

impl DirectoryIndex {
    /// Open the filename index of `directory`
    pub fn open(volume: Arc<NtfsVolume>, directory: &FileRecord) -> Result<Self> {
        let record_number = directory.record_number();
        let root = directory
            .find(AttributeType::IndexRoot, FILE_NAME_INDEX)
            .ok_or_else(|| NtfsError::NotADirectory(format!("MFT record {}", record_number)))?;
        let value = root
            .resident_value()
            .ok_or_else(|| NtfsError::malformed(record_number, "index root is not resident"))?;
        let root_header = IndexRootHeader::from_bytes(value)
            .ok_or_else(|| NtfsError::malformed(record_number, "index root header truncated"))?;

        let block_size = match root_header.index_block_size {
            0 => volume.geometry().bytes_per_index_record as usize,
            size => size as usize,
        };
        if block_size % FIXUP_STRIDE != 0 {
            return Err(NtfsError::malformed(
                record_number,
                format!("index block size {} is not a multiple of {}", block_size, FIXUP_STRIDE),
            ));
        }

        let root_entries = parse_node(record_number, &value[IndexRootHeader::SIZE..])?;
        let allocation = directory
            .find(AttributeType::IndexAllocation, FILE_NAME_INDEX)
            .cloned();

        Ok(Self {
            volume,
            record_number,
            root_entries,
            allocation,
            block_size,
        })
    }

    pub fn record_number(&self) -> u64 {
        self.record_number
    }

    /// Byte size of the unit INDX block VCNs count in
    fn vcn_size(&self) -> u64 {
        let cluster = self.volume.geometry().bytes_per_cluster as usize;
        if self.block_size >= cluster {
            cluster as u64
        } else {
            FIXUP_STRIDE as u64
        }
    }

    /// Read and parse the INDX block at `vcn`
    pub fn read_node(&self, vcn: u64) -> Result<Vec<IndexEntry>> {
        let allocation = self.allocation.as_ref().ok_or_else(|| {
            NtfsError::malformed(self.record_number, "index subnode without an index allocation")
        })?;

        let offset = block_offset(self.record_number, vcn, self.vcn_size())?;
        let mut block = vec![0u8; self.block_size];
        let n = read_attribute(&self.volume, allocation, offset, &mut block)?;
        if n < self.block_size {
            return Err(NtfsError::malformed(
                self.record_number,
                format!("INDX block at VCN {} truncated ({} bytes)", vcn, n),
            ));
        }

        let magic = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        if magic != INDEX_RECORD_SIGNATURE {
            return Err(NtfsError::malformed(
                self.record_number,
                format!("INDX block at VCN {} has signature 0x{:08X}", vcn, magic),
            ));
        }

        let usa_offset = u16::from_le_bytes([block[4], block[5]]);
        let usa_count = u16::from_le_bytes([block[6], block[7]]);
        apply_fixup(self.record_number, &mut block, usa_offset, usa_count)
            .inspect_err(|e| debug!(target: "ntfs::index", "INDX block at VCN {}: {}", vcn, e))?;

        trace!(target: "ntfs::index", "read INDX block VCN {} of record {}", vcn, self.record_number);
        parse_node(self.record_number, &block[INDX_NODE_HEADER_OFFSET..])
    }

    /// Find the entry naming `name` under `mode`.
    ///
    /// ASCII names are located by B-tree descent. Names outside ASCII are
    /// located by a full scan, since the volume's upcase table may order them
    /// differently from the comparison used here. DOS-namespace entries only
    /// match when the file has no long name. An exact match is preferred over
    /// a case-folded one.
    pub fn lookup(&self, name: &str, mode: CaseMode) -> Result<Option<IndexEntry>> {
        let mut search = Search {
            index: self,
            target: name,
            mode,
            visited: HashSet::new(),
            found: None,
        };
        search.node(&self.root_entries)?;
        if search.found.is_none() {
            debug!(target: "ntfs::index", "'{}' not in index of record {}", name, self.record_number);
        }
        Ok(search.found)
    }

    /// Every entry of the index in collation order, terminators excluded.
    /// DOS-namespace entries are included.
    pub fn entries(&self) -> IndexEntries {
        IndexEntries {
            index: self.clone(),
            stack: vec![Frame::new(self.root_entries.clone())],
            visited: HashSet::new(),
            failed: false,
        }
    }
}

struct Search<'a> {
    index: &'a DirectoryIndex,
    target: &'a str,
    mode: CaseMode,
    visited: HashSet<u64>,
    found: Option<IndexEntry>,
}

impl Search<'_> {
    /// Returns true once an exact match has been found
    fn node(&mut self, entries: &[IndexEntry]) -> Result<bool> {
        for entry in entries {
            let order = match &entry.file_name {
                None => Ordering::Less,
                Some(key) if !collation_is_reliable(self.target, &key.name) => Ordering::Equal,
                Some(key) => collate(self.target, &key.name),
            };

            if order == Ordering::Greater {
                continue;
            }

            if let Some(vcn) = entry.subnode_vcn {
                if self.descend(vcn)? {
                    return Ok(true);
                }
            }

            if order == Ordering::Less {
                return Ok(false);
            }
            if self.consider(entry)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn descend(&mut self, vcn: u64) -> Result<bool> {
        if !self.visited.insert(vcn) {
            return Err(NtfsError::malformed(
                self.index.record_number,
                format!("index subnode VCN {} referenced twice", vcn),
            ));
        }
        let entries = self.index.read_node(vcn)?;
        self.node(&entries)
    }

    fn consider(&mut self, entry: &IndexEntry) -> Result<bool> {
        let Some(key) = &entry.file_name else {
            return Ok(false);
        };
        if !names_match(&key.name, self.target, self.mode) {
            return Ok(false);
        }

        if is_hidden_short_name(&self.index.volume, self.index.record_number, entry)? {
            return Ok(false);
        }

        if key.name == self.target {
            self.found = Some(entry.clone());
            return Ok(true);
        }
        if self.found.is_none() {
            self.found = Some(entry.clone());
        }
        Ok(false)
    }
}

// ============================================================================
// IndexEntries: lazy in-order traversal
// ============================================================================

struct Frame {
    entries: Vec<IndexEntry>,
    pos: usize,
    descended: bool,
}

impl Frame {
    fn new(entries: Vec<IndexEntry>) -> Self {
        Self {
            entries,
            pos: 0,
            descended: false,
        }
    }
}

/// In-order iterator over a directory index. INDX blocks are read as the
/// traversal reaches them; iteration ends after the first error.
pub struct IndexEntries {
    index: DirectoryIndex,
    stack: Vec<Frame>,
    visited: HashSet<u64>,
    failed: bool,
}

impl Iterator for IndexEntries {
    type Item = Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            let frame = self.stack.last_mut()?;
            if frame.pos >= frame.entries.len() {
                self.stack.pop();
                continue;
            }

            // Keys in the subtree come before the entry itself
            let subnode = if frame.descended {
                None
            } else {
                frame.descended = true;
                frame.entries[frame.pos].subnode_vcn
            };

            if let Some(vcn) = subnode {
                if !self.visited.insert(vcn) {
                    self.failed = true;
                    return Some(Err(NtfsError::malformed(
                        self.index.record_number,
                        format!("index subnode VCN {} referenced twice", vcn),
                    )));
                }
                match self.index.read_node(vcn) {
                    Ok(entries) => self.stack.push(Frame::new(entries)),
                    Err(e) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                }
                continue;
            }

            let entry = frame.entries[frame.pos].clone();
            frame.pos += 1;
            frame.descended = false;
            if entry.file_name.is_some() {
                return Some(Ok(entry));
            }
        }
    }
}
