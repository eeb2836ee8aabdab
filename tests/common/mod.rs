//! In-memory NTFS image builder shared by the integration tests
//!
//! Lays out a boot sector, a (possibly fragmented) $MFT, records with
//! update sequence arrays, resident and non-resident attributes, attribute
//! lists and multi-level $I30 B-trees in INDX blocks.

#![allow(dead_code)]

use ntfs_vfs::{CaseMode, PathSpec};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

pub const SECTOR: usize = 512;
pub const CLUSTER: usize = 4096;
pub const RECORD: usize = 1024;

const RECORDS_PER_CLUSTER: u64 = (CLUSTER / RECORD) as u64;
const FILETIME_EPOCH_OFFSET: i64 = 11_644_473_600;

// Filename namespaces
pub const POSIX: u8 = 0;
pub const WIN32: u8 = 1;
pub const DOS: u8 = 2;
pub const WIN32_AND_DOS: u8 = 3;

// Attribute types
const STANDARD_INFORMATION: u32 = 0x10;
const ATTRIBUTE_LIST: u32 = 0x20;
const FILE_NAME: u32 = 0x30;
const DATA: u32 = 0x80;
const INDEX_ROOT: u32 = 0x90;
const INDEX_ALLOCATION: u32 = 0xA0;

pub const FLAG_COMPRESSED: u16 = 0x0001;
pub const FLAG_ENCRYPTED: u16 = 0x4000;
pub const FLAG_SPARSE: u16 = 0x8000;

pub const fn reference(record: u64, sequence: u16) -> u64 {
    record | ((sequence as u64) << 48)
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Unix seconds of a "YYYY-MM-DD HH:MM:SS" UTC timestamp
pub fn timestamp(text: &str) -> i64 {
    chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .unwrap()
        .and_utc()
        .timestamp()
}

fn filetime(unix: i64) -> u64 {
    ((unix + FILETIME_EPOCH_OFFSET) * 10_000_000) as u64
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Times {
    pub created: i64,
    pub modified: i64,
    pub accessed: i64,
}

impl Times {
    pub fn new(created: &str, modified: &str, accessed: &str) -> Self {
        Self {
            created: timestamp(created),
            modified: timestamp(modified),
            accessed: timestamp(accessed),
        }
    }
}

fn utf16(name: &str) -> Vec<u8> {
    name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn put(buffer: &mut [u8], at: usize, bytes: &[u8]) {
    buffer[at..at + bytes.len()].copy_from_slice(bytes);
}

/// Write the update sequence array the way NTFS does before a write
pub fn protect(data: &mut [u8], usa_offset: usize, usn: u16) {
    let strides = data.len() / SECTOR;
    put(data, usa_offset, &usn.to_le_bytes());
    for i in 1..=strides {
        let end = i * SECTOR - 2;
        let saved = usa_offset + i * 2;
        data[saved] = data[end];
        data[saved + 1] = data[end + 1];
        put(data, end, &usn.to_le_bytes());
    }
}

// ============================================================================
// Run lists
// ============================================================================

/// (cluster count, LCN); `None` is a sparse run
pub type Run = (u64, Option<u64>);

fn unsigned_width(value: u64) -> usize {
    let mut width = 1;
    while width < 8 && value >> (8 * width) != 0 {
        width += 1;
    }
    width
}

fn signed_width(value: i64) -> usize {
    let mut width = 1;
    while width < 8 {
        let shift = 64 - 8 * width;
        if (value << shift) >> shift == value {
            break;
        }
        width += 1;
    }
    width
}

pub fn encode_runs(runs: &[Run]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut previous = 0i64;
    for &(count, lcn) in runs {
        let count_width = unsigned_width(count);
        match lcn {
            Some(lcn) => {
                let delta = lcn as i64 - previous;
                previous = lcn as i64;
                let delta_width = signed_width(delta);
                out.push(((delta_width << 4) | count_width) as u8);
                out.extend_from_slice(&count.to_le_bytes()[..count_width]);
                out.extend_from_slice(&delta.to_le_bytes()[..delta_width]);
            }
            None => {
                out.push(count_width as u8);
                out.extend_from_slice(&count.to_le_bytes()[..count_width]);
            }
        }
    }
    out.push(0);
    out
}

fn run_clusters(runs: &[Run]) -> u64 {
    runs.iter().map(|r| r.0).sum()
}

// ============================================================================
// Attribute encoding
// ============================================================================

fn resident_attribute(type_code: u32, name: &str, id: u16, flags: u16, value: &[u8]) -> Vec<u8> {
    let name_bytes = utf16(name);
    let value_offset = (24 + name_bytes.len()).next_multiple_of(8);
    let length = (value_offset + value.len()).next_multiple_of(8);
    let mut attr = vec![0u8; length];
    put(&mut attr, 0, &type_code.to_le_bytes());
    put(&mut attr, 4, &(length as u32).to_le_bytes());
    attr[9] = name.encode_utf16().count() as u8;
    put(&mut attr, 10, &24u16.to_le_bytes());
    put(&mut attr, 12, &flags.to_le_bytes());
    put(&mut attr, 14, &id.to_le_bytes());
    put(&mut attr, 16, &(value.len() as u32).to_le_bytes());
    put(&mut attr, 20, &(value_offset as u16).to_le_bytes());
    attr[22] = (type_code == FILE_NAME) as u8;
    put(&mut attr, 24, &name_bytes);
    put(&mut attr, value_offset, value);
    attr
}

/// One extent of a non-resident attribute
#[derive(Debug, Clone)]
pub struct NonResident {
    pub type_code: u32,
    pub name: String,
    pub flags: u16,
    pub lowest_vcn: u64,
    pub data_size: u64,
    pub initialized_size: u64,
    pub runs: Vec<Run>,
}

impl NonResident {
    /// Unnamed-or-named $DATA stored in `runs`, fully initialized
    pub fn data(name: &str, size: u64, runs: Vec<Run>) -> Self {
        Self {
            type_code: DATA,
            name: name.to_string(),
            flags: 0,
            lowest_vcn: 0,
            data_size: size,
            initialized_size: size,
            runs,
        }
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    fn encode(&self, id: u16) -> Vec<u8> {
        let name_bytes = utf16(&self.name);
        let runs = encode_runs(&self.runs);
        let runs_offset = (64 + name_bytes.len()).next_multiple_of(8);
        let length = (runs_offset + runs.len()).next_multiple_of(8);
        let clusters = run_clusters(&self.runs);
        let highest_vcn = (self.lowest_vcn + clusters).saturating_sub(1);

        let mut attr = vec![0u8; length];
        put(&mut attr, 0, &self.type_code.to_le_bytes());
        put(&mut attr, 4, &(length as u32).to_le_bytes());
        attr[8] = 1;
        attr[9] = self.name.encode_utf16().count() as u8;
        put(&mut attr, 10, &64u16.to_le_bytes());
        put(&mut attr, 12, &self.flags.to_le_bytes());
        put(&mut attr, 14, &id.to_le_bytes());
        put(&mut attr, 16, &self.lowest_vcn.to_le_bytes());
        put(&mut attr, 24, &highest_vcn.to_le_bytes());
        put(&mut attr, 32, &(runs_offset as u16).to_le_bytes());
        put(&mut attr, 40, &(clusters * CLUSTER as u64).to_le_bytes());
        put(&mut attr, 48, &self.data_size.to_le_bytes());
        put(&mut attr, 56, &self.initialized_size.to_le_bytes());
        put(&mut attr, 64, &name_bytes);
        put(&mut attr, runs_offset, &runs);
        attr
    }
}

fn standard_information_value(times: Times) -> Vec<u8> {
    let mut value = vec![0u8; 72];
    put(&mut value, 0, &filetime(times.created).to_le_bytes());
    put(&mut value, 8, &filetime(times.modified).to_le_bytes());
    put(&mut value, 16, &filetime(times.modified).to_le_bytes());
    put(&mut value, 24, &filetime(times.accessed).to_le_bytes());
    put(&mut value, 32, &0x20u32.to_le_bytes());
    value
}

fn file_name_value(parent: u64, name: &str, namespace: u8, times: Times, directory: bool, size: u64) -> Vec<u8> {
    let name_bytes = utf16(name);
    let mut value = vec![0u8; 66 + name_bytes.len()];
    put(&mut value, 0, &parent.to_le_bytes());
    put(&mut value, 8, &filetime(times.created).to_le_bytes());
    put(&mut value, 16, &filetime(times.modified).to_le_bytes());
    put(&mut value, 24, &filetime(times.modified).to_le_bytes());
    put(&mut value, 32, &filetime(times.accessed).to_le_bytes());
    put(&mut value, 40, &size.next_multiple_of(8).to_le_bytes());
    put(&mut value, 48, &size.to_le_bytes());
    let flags: u32 = if directory { 0x1000_0000 } else { 0x20 };
    put(&mut value, 56, &flags.to_le_bytes());
    value[64] = name.encode_utf16().count() as u8;
    value[65] = namespace;
    put(&mut value, 66, &name_bytes);
    value
}

// ============================================================================
// Records
// ============================================================================

/// Attribute-list entry describing one attribute of a record
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub type_code: u32,
    pub name: String,
    pub lowest_vcn: u64,
    pub reference: u64,
    pub id: u16,
}

/// Key of a directory index entry: a FILE_NAME value and its file
#[derive(Debug, Clone)]
pub struct IndexKey {
    pub reference: u64,
    pub key: Vec<u8>,
    sort: Vec<u16>,
}

fn collation_key(name: &str) -> Vec<u16> {
    name.encode_utf16()
        .map(|u| if (b'a' as u16..=b'z' as u16).contains(&u) { u - 0x20 } else { u })
        .collect()
}

#[derive(Debug, Clone)]
pub struct RecordBuilder {
    pub number: u64,
    pub sequence: u16,
    directory: bool,
    base: u64,
    attributes: Vec<Vec<u8>>,
    listed: Vec<ListEntry>,
    keys: Vec<IndexKey>,
    next_id: u16,
}

impl RecordBuilder {
    pub fn new(number: u64, sequence: u16) -> Self {
        Self {
            number,
            sequence,
            directory: false,
            base: 0,
            attributes: Vec::new(),
            listed: Vec::new(),
            keys: Vec::new(),
            next_id: 0,
        }
    }

    pub fn reference(&self) -> u64 {
        reference(self.number, self.sequence)
    }

    pub fn directory(mut self) -> Self {
        self.directory = true;
        self
    }

    pub fn extension_of(mut self, base: u64) -> Self {
        self.base = base;
        self
    }

    fn push(&mut self, type_code: u32, name: &str, lowest_vcn: u64, encode: impl FnOnce(u16) -> Vec<u8>) {
        let id = self.next_id;
        self.next_id += 1;
        self.attributes.push(encode(id));
        self.listed.push(ListEntry {
            type_code,
            name: name.to_string(),
            lowest_vcn,
            reference: self.reference(),
            id,
        });
    }

    pub fn standard_information(mut self, times: Times) -> Self {
        let value = standard_information_value(times);
        self.push(STANDARD_INFORMATION, "", 0, |id| {
            resident_attribute(STANDARD_INFORMATION, "", id, 0, &value)
        });
        self
    }

    pub fn file_name(mut self, parent: u64, name: &str, namespace: u8, times: Times, size: u64) -> Self {
        let value = file_name_value(parent, name, namespace, times, self.directory, size);
        self.keys.push(IndexKey {
            reference: self.reference(),
            key: value.clone(),
            sort: collation_key(name),
        });
        self.push(FILE_NAME, "", 0, |id| resident_attribute(FILE_NAME, "", id, 0, &value));
        self
    }

    pub fn data(self, name: &str, value: &[u8]) -> Self {
        self.data_with_flags(name, value, 0)
    }

    pub fn data_with_flags(mut self, name: &str, value: &[u8], flags: u16) -> Self {
        self.push(DATA, name, 0, |id| resident_attribute(DATA, name, id, flags, value));
        self
    }

    pub fn resident(mut self, type_code: u32, name: &str, value: &[u8]) -> Self {
        self.push(type_code, name, 0, |id| resident_attribute(type_code, name, id, 0, value));
        self
    }

    pub fn non_resident(mut self, attribute: NonResident) -> Self {
        let (type_code, name, lowest) = (attribute.type_code, attribute.name.clone(), attribute.lowest_vcn);
        self.push(type_code, &name, lowest, |id| attribute.encode(id));
        self
    }

    /// Entries an attribute list needs to describe this record's attributes
    pub fn list_entries(&self) -> Vec<ListEntry> {
        self.listed.clone()
    }

    /// Index keys for every FILE_NAME of this record
    pub fn index_keys(&self) -> Vec<IndexKey> {
        self.keys.clone()
    }

    /// Keys of the names this record has in directory `parent`
    pub fn index_keys_in(&self, parent: u64) -> Vec<IndexKey> {
        let record = |raw: u64| raw & 0x0000_FFFF_FFFF_FFFF;
        self.keys
            .iter()
            .filter(|k| record(u64::from_le_bytes(k.key[0..8].try_into().unwrap())) == record(parent))
            .cloned()
            .collect()
    }

    /// Add an $ATTRIBUTE_LIST (not itself listed)
    pub fn attribute_list(mut self, entries: &[ListEntry]) -> Self {
        let mut value = Vec::new();
        for entry in entries {
            let name = utf16(&entry.name);
            let length = (26 + name.len()).next_multiple_of(8);
            let mut bytes = vec![0u8; length];
            put(&mut bytes, 0, &entry.type_code.to_le_bytes());
            put(&mut bytes, 4, &(length as u16).to_le_bytes());
            bytes[6] = entry.name.encode_utf16().count() as u8;
            bytes[7] = 26;
            put(&mut bytes, 8, &entry.lowest_vcn.to_le_bytes());
            put(&mut bytes, 16, &entry.reference.to_le_bytes());
            put(&mut bytes, 24, &entry.id.to_le_bytes());
            put(&mut bytes, 26, &name);
            value.extend(bytes);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.attributes
            .push(resident_attribute(ATTRIBUTE_LIST, "", id, 0, &value));
        self
    }

    /// Raw record bytes, update sequence array not yet applied
    pub fn build(&self) -> Vec<u8> {
        let mut record = vec![0u8; RECORD];
        put(&mut record, 0, b"FILE");
        put(&mut record, 4, &0x30u16.to_le_bytes());
        put(&mut record, 6, &((RECORD / SECTOR + 1) as u16).to_le_bytes());
        put(&mut record, 16, &self.sequence.to_le_bytes());
        put(&mut record, 18, &1u16.to_le_bytes());
        put(&mut record, 20, &0x38u16.to_le_bytes());
        let flags: u16 = if self.directory { 0x0003 } else { 0x0001 };
        put(&mut record, 22, &flags.to_le_bytes());
        put(&mut record, 28, &(RECORD as u32).to_le_bytes());
        put(&mut record, 32, &self.base.to_le_bytes());
        put(&mut record, 40, &self.next_id.to_le_bytes());
        put(&mut record, 44, &(self.number as u32).to_le_bytes());

        let mut offset = 0x38;
        for attribute in &self.attributes {
            assert!(
                offset + attribute.len() + 8 <= RECORD,
                "attributes of record {} overflow the record",
                self.number
            );
            put(&mut record, offset, attribute);
            offset += attribute.len();
        }
        put(&mut record, offset, &0xFFFF_FFFFu32.to_le_bytes());
        offset += 8;
        put(&mut record, 24, &(offset as u32).to_le_bytes());
        record
    }
}

// ============================================================================
// Directory indexes
// ============================================================================

struct Node {
    keys: Vec<IndexKey>,
    /// Empty for leaves, otherwise one more than `keys`
    children: Vec<Node>,
}

fn build_tree(keys: &[IndexKey], capacity: usize) -> Node {
    if keys.len() <= capacity {
        return Node {
            keys: keys.to_vec(),
            children: Vec::new(),
        };
    }
    let chunk = (keys.len() + capacity) / (capacity + 1);
    let mut node = Node {
        keys: Vec::new(),
        children: Vec::new(),
    };
    let mut pos = 0;
    loop {
        let end = (pos + chunk).min(keys.len());
        node.children.push(build_tree(&keys[pos..end], capacity));
        if end < keys.len() {
            node.keys.push(keys[end].clone());
            pos = end + 1;
        } else {
            break;
        }
    }
    node
}

fn index_entry(file: u64, key: Option<&[u8]>, subnode: Option<u64>) -> Vec<u8> {
    let key_length = key.map(<[u8]>::len).unwrap_or(0);
    let mut length = (16 + key_length).next_multiple_of(8);
    if subnode.is_some() {
        length += 8;
    }
    let mut flags = 0u32;
    if key.is_none() {
        flags |= 0x02;
    }
    if subnode.is_some() {
        flags |= 0x01;
    }
    let mut entry = vec![0u8; length];
    if key.is_some() {
        put(&mut entry, 0, &file.to_le_bytes());
    }
    put(&mut entry, 8, &(length as u16).to_le_bytes());
    put(&mut entry, 10, &(key_length as u16).to_le_bytes());
    put(&mut entry, 12, &flags.to_le_bytes());
    if let Some(key) = key {
        put(&mut entry, 16, key);
    }
    if let Some(vcn) = subnode {
        put(&mut entry, length - 8, &vcn.to_le_bytes());
    }
    entry
}

fn indx_block(vcn: u64, entries: &[u8], has_children: bool) -> Vec<u8> {
    const NODE: usize = 0x18;
    const ENTRIES: usize = 0x40;
    assert!(ENTRIES + entries.len() <= CLUSTER, "index node overflows its block");

    let mut block = vec![0u8; CLUSTER];
    put(&mut block, 0, b"INDX");
    put(&mut block, 4, &0x28u16.to_le_bytes());
    put(&mut block, 6, &((CLUSTER / SECTOR + 1) as u16).to_le_bytes());
    put(&mut block, 16, &vcn.to_le_bytes());
    put(&mut block, NODE, &((ENTRIES - NODE) as u32).to_le_bytes());
    put(&mut block, NODE + 4, &((ENTRIES - NODE + entries.len()) as u32).to_le_bytes());
    put(&mut block, NODE + 8, &((CLUSTER - NODE) as u32).to_le_bytes());
    put(&mut block, NODE + 12, &(has_children as u32).to_le_bytes());
    put(&mut block, ENTRIES, entries);
    protect(&mut block, 0x28, 0x0005);
    block
}

fn layout_node(node: &Node, blocks: &mut Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, key) in node.keys.iter().enumerate() {
        let subnode = node.children.get(i).map(|child| emit_block(child, blocks));
        out.extend(index_entry(key.reference, Some(&key.key), subnode));
    }
    let subnode = node.children.last().map(|child| emit_block(child, blocks));
    out.extend(index_entry(0, None, subnode));
    out
}

fn emit_block(node: &Node, blocks: &mut Vec<Vec<u8>>) -> u64 {
    let vcn = blocks.len();
    blocks.push(Vec::new());
    let entries = layout_node(node, blocks);
    blocks[vcn] = indx_block(vcn as u64, &entries, !node.children.is_empty());
    vcn as u64
}

// ============================================================================
// ImageBuilder
// ============================================================================

pub struct ImageBuilder {
    image: Vec<u8>,
    total_clusters: u64,
    /// (LCN, cluster count) extents of the $MFT
    mft_fragments: Vec<(u64, u64)>,
    next_cluster: u64,
    records: BTreeMap<u64, Vec<u8>>,
}

impl ImageBuilder {
    pub fn new(total_clusters: u64, mft_fragments: &[(u64, u64)], data_start: u64) -> Self {
        Self {
            image: vec![0u8; total_clusters as usize * CLUSTER],
            total_clusters,
            mft_fragments: mft_fragments.to_vec(),
            next_cluster: data_start,
            records: BTreeMap::new(),
        }
    }

    pub fn mft_record_count(&self) -> u64 {
        self.mft_fragments.iter().map(|f| f.1).sum::<u64>() * RECORDS_PER_CLUSTER
    }

    /// Byte offset of a record slot inside the image
    pub fn record_offset(&self, number: u64) -> usize {
        let mut first = 0;
        for &(lcn, clusters) in &self.mft_fragments {
            let count = clusters * RECORDS_PER_CLUSTER;
            if number < first + count {
                return lcn as usize * CLUSTER + (number - first) as usize * RECORD;
            }
            first += count;
        }
        panic!("record {} is outside the $MFT", number);
    }

    pub fn mft_runs(&self) -> Vec<Run> {
        self.mft_fragments.iter().map(|&(lcn, n)| (n, Some(lcn))).collect()
    }

    /// Contiguous clusters outside the $MFT extents
    pub fn alloc(&mut self, clusters: u64) -> u64 {
        loop {
            let start = self.next_cluster;
            let end = start + clusters;
            match self
                .mft_fragments
                .iter()
                .find(|&&(lcn, n)| start < lcn + n && lcn < end)
            {
                Some(&(lcn, n)) => self.next_cluster = lcn + n,
                None => {
                    assert!(end <= self.total_clusters, "image is full");
                    self.next_cluster = end;
                    return start;
                }
            }
        }
    }

    pub fn write(&mut self, lcn: u64, bytes: &[u8]) {
        let at = lcn as usize * CLUSTER;
        put(&mut self.image, at, bytes);
    }

    /// Store `bytes` contiguously
    pub fn store(&mut self, bytes: &[u8]) -> Vec<Run> {
        if bytes.is_empty() {
            return Vec::new();
        }
        let clusters = bytes.len().div_ceil(CLUSTER) as u64;
        let lcn = self.alloc(clusters);
        self.write(lcn, bytes);
        vec![(clusters, Some(lcn))]
    }

    /// Store `bytes` one cluster per run, the last cluster placed first on
    /// disk so the run list carries a negative LCN delta
    pub fn store_fragmented(&mut self, bytes: &[u8]) -> Vec<Run> {
        let chunks: Vec<&[u8]> = bytes.chunks(CLUSTER).collect();
        let n = chunks.len();
        let mut lcns = vec![0u64; n];
        lcns[n - 1] = self.alloc(1);
        for lcn in lcns.iter_mut().take(n - 1) {
            *lcn = self.alloc(1);
        }
        for (chunk, &lcn) in chunks.iter().zip(&lcns) {
            self.write(lcn, chunk);
        }
        lcns.into_iter().map(|lcn| (1, Some(lcn))).collect()
    }

    pub fn add(&mut self, record: &RecordBuilder) {
        self.records.insert(record.number, record.build());
    }

    /// Give `record` an $I30 index over `keys`. With a leaf capacity the
    /// index becomes a B-tree whose nodes below the root live in INDX blocks.
    pub fn directory(&mut self, record: RecordBuilder, mut keys: Vec<IndexKey>, leaf_capacity: Option<usize>) -> RecordBuilder {
        keys.sort_by(|a, b| a.sort.cmp(&b.sort));
        let tree = match leaf_capacity {
            Some(capacity) => build_tree(&keys, capacity),
            None => Node {
                keys,
                children: Vec::new(),
            },
        };

        let mut blocks = Vec::new();
        let entries = layout_node(&tree, &mut blocks);

        let mut root = vec![0u8; 32];
        put(&mut root, 0, &FILE_NAME.to_le_bytes());
        put(&mut root, 4, &1u32.to_le_bytes());
        put(&mut root, 8, &(CLUSTER as u32).to_le_bytes());
        root[12] = 1;
        put(&mut root, 16, &16u32.to_le_bytes());
        put(&mut root, 20, &((16 + entries.len()) as u32).to_le_bytes());
        put(&mut root, 24, &((16 + entries.len()) as u32).to_le_bytes());
        put(&mut root, 28, &((!tree.children.is_empty()) as u32).to_le_bytes());
        root.extend(entries);

        let mut record = record.directory().resident(INDEX_ROOT, "$I30", &root);
        if !blocks.is_empty() {
            let bytes = blocks.concat();
            let size = bytes.len() as u64;
            let runs = self.store(&bytes);
            record = record.non_resident(NonResident {
                type_code: INDEX_ALLOCATION,
                name: "$I30".to_string(),
                flags: 0,
                lowest_vcn: 0,
                data_size: size,
                initialized_size: size,
                runs,
            });
        }
        record
    }

    /// Boot sector and records written into the image
    pub fn finish(mut self) -> Vec<u8> {
        let mut boot = vec![0u8; SECTOR];
        put(&mut boot, 0, &[0xEB, 0x52, 0x90]);
        put(&mut boot, 3, b"NTFS    ");
        put(&mut boot, 0x0B, &(SECTOR as u16).to_le_bytes());
        boot[0x0D] = (CLUSTER / SECTOR) as u8;
        put(&mut boot, 0x28, &(self.total_clusters * (CLUSTER / SECTOR) as u64).to_le_bytes());
        put(&mut boot, 0x30, &self.mft_fragments[0].0.to_le_bytes());
        put(&mut boot, 0x38, &2u64.to_le_bytes());
        boot[0x40] = (-10i8) as u8;
        boot[0x44] = 1;
        put(&mut boot, 0x48, &0x1234_5678_9ABC_DEF0u64.to_le_bytes());
        boot[510] = 0x55;
        boot[511] = 0xAA;
        put(&mut self.image, 0, &boot);

        let records = std::mem::take(&mut self.records);
        for (number, mut record) in records {
            protect(&mut record, 0x30, 0x0007);
            let at = self.record_offset(number);
            put(&mut self.image, at, &record);
        }
        self.image
    }
}

// ============================================================================
// Volume contents
// ============================================================================

pub const ROOT: u64 = reference(5, 5);

const SYSTEM_FILES: [(u64, &str); 11] = [
    (0, "$MFT"),
    (1, "$MFTMirr"),
    (2, "$LogFile"),
    (3, "$Volume"),
    (4, "$AttrDef"),
    (6, "$Bitmap"),
    (7, "$Boot"),
    (8, "$BadClus"),
    (9, "$Secure"),
    (10, "$UpCase"),
    (11, "$Extend"),
];

/// Add the metadata files and return their root index keys
pub fn system_files(image: &mut ImageBuilder, times: Times) -> Vec<IndexKey> {
    let mut keys = Vec::new();
    for (number, name) in SYSTEM_FILES {
        let mut record = RecordBuilder::new(number, number.max(1) as u16);
        if name == "$Extend" {
            record = record.directory();
        }
        record = record
            .standard_information(times)
            .file_name(ROOT, name, WIN32_AND_DOS, times, 0);
        record = match name {
            "$MFT" => {
                let size = image.mft_record_count() * RECORD as u64;
                record.non_resident(NonResident::data("", size, image.mft_runs()))
            }
            "$Extend" => image.directory(record, Vec::new(), None),
            _ => record.data("", &[]),
        };
        keys.extend(record.index_keys());
        image.add(&record);
    }
    keys
}

/// Root directory record over `keys` plus its own "." entry
pub fn root_directory(image: &mut ImageBuilder, mut keys: Vec<IndexKey>, times: Times, leaf_capacity: Option<usize>) {
    let root = RecordBuilder::new(5, 5)
        .directory()
        .standard_information(times)
        .file_name(ROOT, ".", WIN32_AND_DOS, times, 0);
    keys.extend(root.index_keys());
    let root = image.directory(root, keys, leaf_capacity);
    image.add(&root);
}

// Well-known references of the main fixture
pub const NUMBERS_TXT: u64 = 281474976710720;
pub const A: u64 = 281474976710721;
pub const B1: u64 = reference(66, 1);
pub const C1: u64 = reference(67, 1);
pub const D: u64 = 281474976710728;
pub const ADS: u64 = 1125899906842697;
pub const ADS_TXT: u64 = 562949953421386;
pub const MISC: u64 = reference(76, 1);
pub const FRAGMENTED: u64 = reference(77, 1);
pub const SPARSE: u64 = reference(78, 1);
pub const COMPRESSED: u64 = reference(79, 1);
pub const ENCRYPTED: u64 = reference(80, 1);
pub const UNINITIALIZED: u64 = reference(81, 1);
pub const LONG_NAME: u64 = reference(82, 3);
pub const DOS_ONLY: u64 = reference(83, 1);
pub const BIG: u64 = reference(84, 1);
pub const BIG_EXTENSION_1: u64 = reference(85, 1);
pub const BIG_EXTENSION_2: u64 = reference(86, 1);
pub const CAFE: u64 = reference(87, 1);
pub const INNER_IMG: u64 = reference(88, 1);
pub const IMAGES: u64 = reference(89, 1);
pub const FILLER_FIRST: u64 = 90;
pub const FILLER_COUNT: u64 = 30;
/// Long name in /a/b1, DOS name only in /a/images
pub const LINKED: u64 = reference(120, 1);
pub const LINKED_CONTENT: &[u8] = b"linked\n";

pub const FRAGMENTED_SIZE: usize = 3 * CLUSTER + 100;
pub const BIG_SIZE: usize = 4 * CLUSTER;

pub fn numbers_content() -> Vec<u8> {
    let mut content: Vec<u8> = (1..2000).flat_map(|i| format!("{}\n", i).into_bytes()).collect();
    content.truncate(3893);
    content
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + seed as usize) % 251) as u8).collect()
}

pub fn filler_name(i: u64) -> String {
    format!("file{:02}", i)
}

/// The main fixture and the offset of every record slot
pub struct Fixture {
    pub image: Vec<u8>,
    record_offsets: BTreeMap<u64, usize>,
}

impl Fixture {
    pub fn record_offset(&self, number: u64) -> usize {
        self.record_offsets[&number]
    }
}

/// A volume holding the same tree as GRR's ntfs.img test image
///
/// ```text
/// /a/b1/c1/d               "foo\n"
/// /numbers.txt             3893 bytes, non-resident
/// /ads/ads.txt             "Foo.\n", streams one "Bar..\n" and two "Baz...\n"
/// /a/misc/...              fragmented, sparse, compressed, encrypted,
///                          partially initialized, DOS names, attribute list,
///                          non-ASCII name, 30 filler files (multi-level index)
/// /a/images/inner.img      a nested NTFS volume with /hello.txt
/// /a/b1/linked.txt         hard link known in /a/images only as LINKED.TXT
/// ```
///
/// The $MFT is split into two extents; records from 32 on live in the second.
pub fn grr_image() -> Fixture {
    let system_times = Times::new("2020-03-03 16:45:00", "2020-03-03 16:45:00", "2020-03-03 16:45:00");
    let mut image = ImageBuilder::new(512, &[(4, 8), (400, 24)], 16);

    let mut root_keys = system_files(&mut image, system_times);

    // /numbers.txt
    let numbers = numbers_content();
    let numbers_times = Times::new("2020-03-03 16:46:00", "2020-03-03 20:10:46", "2020-03-03 20:10:46");
    let runs = image.store(&numbers);
    let record = RecordBuilder::new(64, 1)
        .standard_information(numbers_times)
        .file_name(ROOT, "numbers.txt", WIN32_AND_DOS, numbers_times, numbers.len() as u64)
        .non_resident(NonResident::data("", numbers.len() as u64, runs));
    root_keys.extend(record.index_keys());
    image.add(&record);

    // /a/b1/c1/d
    let d_times = Times::new("2020-03-04 15:00:00", "2020-03-04 15:00:00", "2020-03-04 15:00:00");
    let d = RecordBuilder::new(72, 1)
        .standard_information(d_times)
        .file_name(C1, "d", WIN32_AND_DOS, d_times, 4)
        .data("", b"foo\n");
    image.add(&d);

    let c1 = RecordBuilder::new(67, 1)
        .directory()
        .standard_information(d_times)
        .file_name(B1, "c1", WIN32_AND_DOS, d_times, 0);
    let c1 = image.directory(c1, d.index_keys(), None);
    image.add(&c1);

    let b1 = RecordBuilder::new(66, 1)
        .directory()
        .standard_information(d_times)
        .file_name(A, "b1", WIN32_AND_DOS, d_times, 0);
    let linked = RecordBuilder::new(120, 1)
        .standard_information(d_times)
        .file_name(B1, "linked.txt", WIN32, d_times, LINKED_CONTENT.len() as u64)
        .file_name(IMAGES, "LINKED.TXT", DOS, d_times, LINKED_CONTENT.len() as u64)
        .data("", LINKED_CONTENT);
    image.add(&linked);
    let mut b1_keys = c1.index_keys();
    b1_keys.extend(linked.index_keys_in(B1));
    let b1 = image.directory(b1, b1_keys, None);
    image.add(&b1);

    // /a/misc
    let misc_keys = misc_files(&mut image);
    let misc = RecordBuilder::new(76, 1)
        .directory()
        .standard_information(d_times)
        .file_name(A, "misc", WIN32_AND_DOS, d_times, 0);
    let misc = image.directory(misc, misc_keys, Some(3));
    image.add(&misc);

    // /a/images/inner.img
    let inner = inner_image();
    let runs = image.store(&inner);
    let inner_img = RecordBuilder::new(88, 1)
        .standard_information(d_times)
        .file_name(IMAGES, "inner.img", WIN32_AND_DOS, d_times, inner.len() as u64)
        .non_resident(NonResident::data("", inner.len() as u64, runs));
    image.add(&inner_img);
    let images = RecordBuilder::new(89, 1)
        .directory()
        .standard_information(d_times)
        .file_name(A, "images", WIN32_AND_DOS, d_times, 0);
    let mut images_keys = inner_img.index_keys();
    images_keys.extend(linked.index_keys_in(IMAGES));
    let images = image.directory(images, images_keys, None);
    image.add(&images);

    // /a
    let a_times = Times::new("2020-03-03 16:47:43", "2020-03-03 16:47:50", "2020-03-03 16:48:16");
    let mut a_keys = b1.index_keys();
    a_keys.extend(misc.index_keys());
    a_keys.extend(images.index_keys());
    let a = RecordBuilder::new(65, 1)
        .directory()
        .standard_information(a_times)
        .file_name(ROOT, "a", WIN32_AND_DOS, a_times, 0);
    let a = image.directory(a, a_keys, None);
    root_keys.extend(a.index_keys());
    image.add(&a);

    // /ads/ads.txt with two alternate data streams
    let ads_txt_times = Times::new("2020-04-07 13:18:53", "2020-04-07 13:48:56", "2020-04-07 13:48:51");
    let ads_txt = RecordBuilder::new(74, 2)
        .standard_information(ads_txt_times)
        .file_name(ADS, "ads.txt", WIN32_AND_DOS, ads_txt_times, 5)
        .data("", b"Foo.\n")
        .data("one", b"Bar..\n")
        .data("two", b"Baz...\n");
    image.add(&ads_txt);

    let ads_times = Times::new("2020-04-07 13:23:07", "2020-04-07 14:56:47", "2020-04-07 14:57:02");
    let ads = RecordBuilder::new(73, 4)
        .directory()
        .standard_information(ads_times)
        .file_name(ROOT, "ads", WIN32_AND_DOS, ads_times, 0);
    let ads = image.directory(ads, ads_txt.index_keys(), None);
    root_keys.extend(ads.index_keys());
    image.add(&ads);

    root_directory(&mut image, root_keys, system_times, Some(3));

    let record_offsets = (0..image.mft_record_count())
        .map(|n| (n, image.record_offset(n)))
        .collect();
    Fixture {
        image: image.finish(),
        record_offsets,
    }
}

fn misc_files(image: &mut ImageBuilder) -> Vec<IndexKey> {
    let times = Times::new("2021-06-01 10:00:00", "2021-06-02 11:00:00", "2021-06-03 12:00:00");
    let mut keys = Vec::new();
    let mut add = |image: &mut ImageBuilder, record: RecordBuilder| {
        keys.extend(record.index_keys());
        image.add(&record);
    };

    let content = pattern(FRAGMENTED_SIZE, 1);
    let runs = image.store_fragmented(&content);
    add(
        image,
        RecordBuilder::new(77, 1)
            .standard_information(times)
            .file_name(MISC, "fragmented.bin", WIN32_AND_DOS, times, content.len() as u64)
            .non_resident(NonResident::data("", content.len() as u64, runs)),
    );

    let first = image.store(&[b'A'; CLUSTER]);
    let third = image.store(&[b'C'; CLUSTER]);
    let runs = vec![first[0], (1, None), third[0]];
    add(
        image,
        RecordBuilder::new(78, 1)
            .standard_information(times)
            .file_name(MISC, "sparse.bin", WIN32_AND_DOS, times, 3 * CLUSTER as u64)
            .non_resident(NonResident::data("", 3 * CLUSTER as u64, runs).with_flags(FLAG_SPARSE)),
    );

    let runs = image.store(&pattern(100, 3));
    add(
        image,
        RecordBuilder::new(79, 1)
            .standard_information(times)
            .file_name(MISC, "compressed.bin", WIN32_AND_DOS, times, 100)
            .non_resident(NonResident::data("", 100, runs).with_flags(FLAG_COMPRESSED)),
    );

    add(
        image,
        RecordBuilder::new(80, 1)
            .standard_information(times)
            .file_name(MISC, "encrypted.bin", WIN32_AND_DOS, times, 6)
            .data_with_flags("", b"secret", FLAG_ENCRYPTED),
    );

    let runs = image.store(&[0xEE; 2 * CLUSTER]);
    let mut uninitialized = NonResident::data("", 2 * CLUSTER as u64, runs);
    uninitialized.initialized_size = 100;
    add(
        image,
        RecordBuilder::new(81, 1)
            .standard_information(times)
            .file_name(MISC, "uninit.bin", WIN32_AND_DOS, times, 2 * CLUSTER as u64)
            .non_resident(uninitialized),
    );

    add(
        image,
        RecordBuilder::new(82, 3)
            .standard_information(times)
            .file_name(MISC, "Long File Name.txt", WIN32, times, 5)
            .file_name(MISC, "LONGFI~1.TXT", DOS, times, 5)
            .data("", b"long\n"),
    );

    add(
        image,
        RecordBuilder::new(83, 1)
            .standard_information(times)
            .file_name(MISC, "DOSONLY.TXT", DOS, times, 4)
            .data("", b"dos\n"),
    );

    // big.dat: $DATA split over two extension records
    let content = pattern(BIG_SIZE, 9);
    let head_runs = image.store(&content[..2 * CLUSTER]);
    let tail_runs = image.store(&content[2 * CLUSTER..]);
    let extension_1 = RecordBuilder::new(85, 1)
        .extension_of(BIG)
        .non_resident(NonResident::data("", BIG_SIZE as u64, head_runs));
    let extension_2 = RecordBuilder::new(86, 1)
        .extension_of(BIG)
        .non_resident(NonResident {
            lowest_vcn: 2,
            data_size: 0,
            initialized_size: 0,
            ..NonResident::data("", 0, tail_runs)
        })
        .data("meta", b"metadata\n");
    let base = RecordBuilder::new(84, 1)
        .standard_information(times)
        .file_name(MISC, "big.dat", WIN32_AND_DOS, times, BIG_SIZE as u64);
    let mut entries = base.list_entries();
    entries.extend(extension_1.list_entries());
    entries.extend(extension_2.list_entries());
    let base = base.attribute_list(&entries);
    image.add(&extension_1);
    image.add(&extension_2);
    add(image, base);

    add(
        image,
        RecordBuilder::new(87, 1)
            .standard_information(times)
            .file_name(MISC, "café.txt", WIN32, times, 6)
            .data("", "café\n".as_bytes()),
    );

    for i in 0..FILLER_COUNT {
        let name = filler_name(i);
        let content = format!("{}\n", name);
        add(
            image,
            RecordBuilder::new(FILLER_FIRST + i, 1)
                .standard_information(times)
                .file_name(MISC, &name, WIN32_AND_DOS, times, content.len() as u64)
                .data("", content.as_bytes()),
        );
    }

    keys
}

pub const HELLO: &[u8] = b"hello from the inner volume\n";

/// A small single-extent volume holding /hello.txt
pub fn inner_image() -> Vec<u8> {
    let times = Times::new("2022-01-01 00:00:00", "2022-01-01 00:00:00", "2022-01-01 00:00:00");
    let mut image = ImageBuilder::new(48, &[(4, 8)], 16);
    let mut keys = system_files(&mut image, times);

    let hello = RecordBuilder::new(20, 1)
        .standard_information(times)
        .file_name(ROOT, "hello.txt", WIN32_AND_DOS, times, HELLO.len() as u64)
        .data("", HELLO);
    keys.extend(hello.index_keys());
    image.add(&hello);

    root_directory(&mut image, keys, times, None);
    image.finish()
}

/// Write an image to a temporary file
pub fn write_image(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

/// OS layer over `image` with `inner` nested below it
pub fn image_spec(image: &Path, inner: PathSpec) -> PathSpec {
    PathSpec::os(image.display().to_string())
        .with_path_options(CaseMode::Literal)
        .with_nested(inner)
}

/// The NTFS layer the way a caller or a stat entry spells it
pub fn ntfs_spec(path: &str, inode: Option<u64>, options: Option<CaseMode>, stream: Option<&str>) -> PathSpec {
    PathSpec {
        inode,
        path_options: options,
        stream_name: stream.map(str::to_string),
        ..PathSpec::ntfs(path)
    }
}
