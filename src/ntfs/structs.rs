//! NTFS on-disk layouts
//!
//! Every structure here is decoded from a little-endian byte slice at fixed
//! offsets. Decoders return `None` when the slice is too short; callers turn
//! that into an error carrying the record number.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Constants
// ============================================================================

/// "FILE"
pub const MFT_RECORD_SIGNATURE: u32 = 0x454C4946;
/// "BAAD", written by chkdsk over records it could not repair
pub const MFT_RECORD_BAD_SIGNATURE: u32 = 0x44414142;
/// "INDX"
pub const INDEX_RECORD_SIGNATURE: u32 = 0x58444E49;

pub const ATTRIBUTE_END_MARKER: u32 = 0xFFFFFFFF;

/// Update sequence arrays protect the last two bytes of every 512 bytes,
/// whatever the sector size
pub const FIXUP_STRIDE: usize = 512;

pub const BOOT_SECTOR_SIZE: usize = 512;
pub const NTFS_OEM_ID: &[u8; 8] = b"NTFS    ";

pub const MFT_RECORD_MFT: u64 = 0;
pub const MFT_RECORD_ROOT: u64 = 5;

// Record header flags
pub const MFT_RECORD_IN_USE: u16 = 0x0001;
pub const MFT_RECORD_IS_DIRECTORY: u16 = 0x0002;

// Attribute header flags
pub const ATTRIBUTE_FLAG_COMPRESSION_MASK: u16 = 0x00FF;
pub const ATTRIBUTE_FLAG_ENCRYPTED: u16 = 0x4000;
pub const ATTRIBUTE_FLAG_SPARSE: u16 = 0x8000;

// Index entry flags
pub const INDEX_ENTRY_NODE: u32 = 0x01;
pub const INDEX_ENTRY_END: u32 = 0x02;

/// Index node header flag: entries point into $INDEX_ALLOCATION
pub const INDEX_NODE_HAS_CHILDREN: u32 = 0x01;

/// $FILE_NAME flag of a file carrying an $I30 index
pub const FILE_NAME_FLAG_DIRECTORY: u32 = 0x1000_0000;

pub const FILE_NAME_INDEX: &str = "$I30";

// ============================================================================
// AttributeType
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AttributeType {
    StandardInformation = 0x10,
    AttributeList = 0x20,
    FileName = 0x30,
    ObjectId = 0x40,
    SecurityDescriptor = 0x50,
    VolumeName = 0x60,
    VolumeInformation = 0x70,
    Data = 0x80,
    IndexRoot = 0x90,
    IndexAllocation = 0xA0,
    Bitmap = 0xB0,
    ReparsePoint = 0xC0,
    EaInformation = 0xD0,
    Ea = 0xE0,
    LoggedUtilityStream = 0x100,
}

impl AttributeType {
    const ALL: [AttributeType; 15] = [
        Self::StandardInformation,
        Self::AttributeList,
        Self::FileName,
        Self::ObjectId,
        Self::SecurityDescriptor,
        Self::VolumeName,
        Self::VolumeInformation,
        Self::Data,
        Self::IndexRoot,
        Self::IndexAllocation,
        Self::Bitmap,
        Self::ReparsePoint,
        Self::EaInformation,
        Self::Ea,
        Self::LoggedUtilityStream,
    ];

    pub fn from_u32(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.code() == code)
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

// ============================================================================
// FileReference
// ============================================================================

/// Record number (low 48 bits) and sequence number (high 16 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileReference(u64);

impl FileReference {
    const RECORD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn new(record_number: u64, sequence_number: u16) -> Self {
        Self((record_number & Self::RECORD_MASK) | ((sequence_number as u64) << 48))
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn record_number(self) -> u64 {
        self.0 & Self::RECORD_MASK
    }

    /// 0 disables the sequence check
    pub const fn sequence_number(self) -> u16 {
        (self.0 >> 48) as u16
    }
}

impl From<u64> for FileReference {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for FileReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.record_number(), self.sequence_number())
    }
}

// ============================================================================
// FilenameNamespace
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FilenameNamespace {
    Posix = 0,
    Win32 = 1,
    Dos = 2,
    Win32AndDos = 3,
}

impl FilenameNamespace {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Posix,
            1 => Self::Win32,
            2 => Self::Dos,
            3 => Self::Win32AndDos,
            _ => return None,
        })
    }

    /// Any name but a bare 8.3 alias
    pub fn is_long(&self) -> bool {
        *self != Self::Dos
    }

    /// Preference when picking a file's display name
    pub fn display_rank(&self) -> u8 {
        match self {
            Self::Win32 | Self::Win32AndDos => 2,
            Self::Posix => 1,
            Self::Dos => 0,
        }
    }
}

// ============================================================================
// Boot sector
// ============================================================================

#[derive(Debug, Clone)]
pub struct NtfsBootSector {
    pub oem_id: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub total_sectors: u64,
    pub mft_cluster_number: u64,
    pub mft_mirror_cluster_number: u64,
    /// Positive: clusters per record. Negative: log2 of the byte size.
    pub clusters_per_mft_record: i8,
    /// Same encoding as `clusters_per_mft_record`
    pub clusters_per_index_block: i8,
    pub volume_serial_number: u64,
}

impl NtfsBootSector {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let data = data.get(..0x50)?;
        let mut oem_id = [0u8; 8];
        oem_id.copy_from_slice(&data[0x03..0x0B]);

        Some(Self {
            oem_id,
            bytes_per_sector: LittleEndian::read_u16(&data[0x0B..]),
            sectors_per_cluster: data[0x0D],
            total_sectors: LittleEndian::read_u64(&data[0x28..]),
            mft_cluster_number: LittleEndian::read_u64(&data[0x30..]),
            mft_mirror_cluster_number: LittleEndian::read_u64(&data[0x38..]),
            clusters_per_mft_record: data[0x40] as i8,
            clusters_per_index_block: data[0x44] as i8,
            volume_serial_number: LittleEndian::read_u64(&data[0x48..]),
        })
    }

    pub fn is_valid_ntfs(&self) -> bool {
        let sector_ok = self.bytes_per_sector >= 256 && self.bytes_per_sector.is_power_of_two();
        let cluster_ok = self.sectors_per_cluster.is_power_of_two();
        &self.oem_id == NTFS_OEM_ID && sector_ok && cluster_ok
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        u32::from(self.bytes_per_sector) * u32::from(self.sectors_per_cluster)
    }

    pub fn bytes_per_mft_record(&self) -> u32 {
        self.decode_size(self.clusters_per_mft_record)
    }

    pub fn bytes_per_index_record(&self) -> u32 {
        self.decode_size(self.clusters_per_index_block)
    }

    /// 0 for encodings that do not fit, so geometry validation rejects them
    fn decode_size(&self, encoded: i8) -> u32 {
        match encoded {
            0.. => (encoded as u32).saturating_mul(self.bytes_per_cluster()),
            _ => 1u32.checked_shl(encoded.unsigned_abs() as u32).unwrap_or(0),
        }
    }
}

// ============================================================================
// MFT record header
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MftRecordHeader {
    pub signature: u32,
    pub update_sequence_offset: u16,
    /// Number of u16 entries in the update sequence array, USN included
    pub update_sequence_size: u16,
    pub sequence_number: u16,
    pub first_attribute_offset: u16,
    pub flags: u16,
    pub used_size: u32,
    pub allocated_size: u32,
    pub base_record_reference: u64,
}

impl MftRecordHeader {
    pub const SIZE: usize = 0x30;

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let data = data.get(..Self::SIZE)?;
        Some(Self {
            signature: LittleEndian::read_u32(&data[0x00..]),
            update_sequence_offset: LittleEndian::read_u16(&data[0x04..]),
            update_sequence_size: LittleEndian::read_u16(&data[0x06..]),
            sequence_number: LittleEndian::read_u16(&data[0x10..]),
            first_attribute_offset: LittleEndian::read_u16(&data[0x14..]),
            flags: LittleEndian::read_u16(&data[0x16..]),
            used_size: LittleEndian::read_u32(&data[0x18..]),
            allocated_size: LittleEndian::read_u32(&data[0x1C..]),
            base_record_reference: LittleEndian::read_u64(&data[0x20..]),
        })
    }

    pub fn has_file_signature(&self) -> bool {
        self.signature == MFT_RECORD_SIGNATURE
    }

    pub fn is_in_use(&self) -> bool {
        self.flags & MFT_RECORD_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & MFT_RECORD_IS_DIRECTORY != 0
    }

    /// Owner of an extension record; zero for base records
    pub fn base_reference(&self) -> FileReference {
        FileReference::from_raw(self.base_record_reference)
    }

    pub fn is_base_record(&self) -> bool {
        self.base_record_reference == 0
    }
}

// ============================================================================
// Attribute headers
// ============================================================================

/// Part of the header common to resident and non-resident attributes
#[derive(Debug, Clone, Default)]
pub struct AttributeHeader {
    pub attribute_type: u32,
    pub length: u32,
    pub non_resident: bool,
    /// In UTF-16 code units
    pub name_length: u8,
    pub name_offset: u16,
    pub flags: u16,
    pub attribute_id: u16,
}

impl AttributeHeader {
    pub const SIZE: usize = 0x10;

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let data = data.get(..Self::SIZE)?;
        Some(Self {
            attribute_type: LittleEndian::read_u32(&data[0x00..]),
            length: LittleEndian::read_u32(&data[0x04..]),
            non_resident: data[0x08] != 0,
            name_length: data[0x09],
            name_offset: LittleEndian::read_u16(&data[0x0A..]),
            flags: LittleEndian::read_u16(&data[0x0C..]),
            attribute_id: LittleEndian::read_u16(&data[0x0E..]),
        })
    }

    /// The attribute's name, read from the whole attribute. `None` when the
    /// name lies outside it.
    pub fn name(&self, attribute: &[u8]) -> Option<String> {
        let start = self.name_offset as usize;
        let end = start + self.name_length as usize * 2;
        match self.name_length {
            0 => Some(String::new()),
            _ => attribute.get(start..end).map(decode_utf16le),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResidentAttributeHeader {
    pub base: AttributeHeader,
    pub value_length: u32,
    pub value_offset: u16,
}

impl ResidentAttributeHeader {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let base = AttributeHeader::from_bytes(data)?;
        if base.non_resident {
            return None;
        }
        let data = data.get(..0x18)?;
        Some(Self {
            base,
            value_length: LittleEndian::read_u32(&data[0x10..]),
            value_offset: LittleEndian::read_u16(&data[0x14..]),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NonResidentAttributeHeader {
    pub base: AttributeHeader,
    pub lowest_vcn: u64,
    pub highest_vcn: u64,
    pub data_runs_offset: u16,
    /// log2 of the compression unit in clusters; 0 when uncompressed
    pub compression_unit: u16,
    pub allocated_size: u64,
    pub data_size: u64,
    pub initialized_size: u64,
}

impl NonResidentAttributeHeader {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let base = AttributeHeader::from_bytes(data)?;
        if !base.non_resident {
            return None;
        }
        let data = data.get(..0x40)?;
        Some(Self {
            base,
            lowest_vcn: LittleEndian::read_u64(&data[0x10..]),
            highest_vcn: LittleEndian::read_u64(&data[0x18..]),
            data_runs_offset: LittleEndian::read_u16(&data[0x20..]),
            compression_unit: LittleEndian::read_u16(&data[0x22..]),
            allocated_size: LittleEndian::read_u64(&data[0x28..]),
            data_size: LittleEndian::read_u64(&data[0x30..]),
            initialized_size: LittleEndian::read_u64(&data[0x38..]),
        })
    }
}

// ============================================================================
// $STANDARD_INFORMATION and $FILE_NAME
// ============================================================================

/// Timestamps are FILETIMEs
#[derive(Debug, Clone, Default)]
pub struct StandardInformation {
    pub creation_time: u64,
    pub modification_time: u64,
    pub mft_modification_time: u64,
    pub access_time: u64,
    pub file_attributes: u32,
}

impl StandardInformation {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        // NTFS 1.2 layout; 3.x appends owner, security and USN fields
        let data = data.get(..0x30)?;
        Some(Self {
            creation_time: LittleEndian::read_u64(&data[0x00..]),
            modification_time: LittleEndian::read_u64(&data[0x08..]),
            mft_modification_time: LittleEndian::read_u64(&data[0x10..]),
            access_time: LittleEndian::read_u64(&data[0x18..]),
            file_attributes: LittleEndian::read_u32(&data[0x20..]),
        })
    }
}

/// Value of a $FILE_NAME attribute, also the key of every $I30 index entry
#[derive(Debug, Clone)]
pub struct FileNameAttribute {
    pub parent_reference: FileReference,
    pub creation_time: u64,
    pub modification_time: u64,
    pub mft_modification_time: u64,
    pub access_time: u64,
    pub allocated_size: u64,
    pub data_size: u64,
    pub flags: u32,
    pub namespace: FilenameNamespace,
    pub name: String,
}

impl FileNameAttribute {
    const NAME_OFFSET: usize = 0x42;

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let header = data.get(..Self::NAME_OFFSET)?;
        let name_units = header[0x40] as usize;
        let namespace = FilenameNamespace::from_u8(header[0x41])?;
        let name = data.get(Self::NAME_OFFSET..Self::NAME_OFFSET + name_units * 2)?;

        Some(Self {
            parent_reference: FileReference::from_raw(LittleEndian::read_u64(&header[0x00..])),
            creation_time: LittleEndian::read_u64(&header[0x08..]),
            modification_time: LittleEndian::read_u64(&header[0x10..]),
            mft_modification_time: LittleEndian::read_u64(&header[0x18..]),
            access_time: LittleEndian::read_u64(&header[0x20..]),
            allocated_size: LittleEndian::read_u64(&header[0x28..]),
            data_size: LittleEndian::read_u64(&header[0x30..]),
            flags: LittleEndian::read_u32(&header[0x38..]),
            namespace,
            name: decode_utf16le(name),
        })
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FILE_NAME_FLAG_DIRECTORY != 0
    }
}

// ============================================================================
// Data runs
// ============================================================================

/// `cluster_count` clusters from virtual cluster `vcn`, stored at logical
/// cluster `lcn`; `None` for a sparse run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRun {
    pub vcn: u64,
    pub cluster_count: u64,
    pub lcn: Option<u64>,
}

impl DataRun {
    pub fn is_sparse(&self) -> bool {
        self.lcn.is_none()
    }

    /// First VCN after the run, saturating at `u64::MAX`
    pub fn end_vcn(&self) -> u64 {
        self.vcn.saturating_add(self.cluster_count)
    }
}

// ============================================================================
// $ATTRIBUTE_LIST
// ============================================================================

#[derive(Debug, Clone)]
pub struct AttributeListEntry {
    pub attribute_type: u32,
    pub entry_length: u16,
    /// Lowest VCN of the extent the entry describes
    pub starting_vcn: u64,
    /// Record holding the attribute
    pub mft_reference: FileReference,
    pub attribute_id: u16,
    pub name: String,
}

impl AttributeListEntry {
    const MIN_SIZE: usize = 0x1A;

    /// Decode the entry at the start of `data`
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let header = data.get(..Self::MIN_SIZE)?;
        let entry_length = LittleEndian::read_u16(&header[0x04..]);
        if (entry_length as usize) < Self::MIN_SIZE || entry_length as usize > data.len() {
            return None;
        }

        let name_units = header[0x06] as usize;
        let name_offset = header[0x07] as usize;
        let name = match name_units {
            0 => String::new(),
            _ => decode_utf16le(data.get(name_offset..name_offset + name_units * 2)?),
        };

        Some(Self {
            attribute_type: LittleEndian::read_u32(&header[0x00..]),
            entry_length,
            starting_vcn: LittleEndian::read_u64(&header[0x08..]),
            mft_reference: FileReference::from_raw(LittleEndian::read_u64(&header[0x10..])),
            attribute_id: LittleEndian::read_u16(&header[0x18..]),
            name,
        })
    }

    pub fn record_number(&self) -> u64 {
        self.mft_reference.record_number()
    }
}

/// Decode a whole attribute list. `None` when an entry is cut short; zero
/// padding after the last entry is accepted.
pub fn parse_attribute_list(data: &[u8]) -> Option<Vec<AttributeListEntry>> {
    let mut entries = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        if rest.len() < AttributeListEntry::MIN_SIZE && rest.iter().all(|&b| b == 0) {
            break;
        }
        let entry = AttributeListEntry::from_bytes(rest)?;
        rest = &rest[entry.entry_length as usize..];
        entries.push(entry);
    }

    Some(entries)
}

// ============================================================================
// Index structures
// ============================================================================

/// Start of an $INDEX_ROOT value; the root node header follows it
#[derive(Debug, Clone)]
pub struct IndexRootHeader {
    pub indexed_attribute_type: u32,
    pub collation_rule: u32,
    pub index_block_size: u32,
    pub clusters_per_index_block: u8,
}

impl IndexRootHeader {
    pub const SIZE: usize = 0x10;

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let data = data.get(..Self::SIZE)?;
        Some(Self {
            indexed_attribute_type: LittleEndian::read_u32(&data[0x00..]),
            collation_rule: LittleEndian::read_u32(&data[0x04..]),
            index_block_size: LittleEndian::read_u32(&data[0x08..]),
            clusters_per_index_block: data[0x0C],
        })
    }
}

/// Node header of the index root and of every INDX block. Offsets count
/// from the node header.
#[derive(Debug, Clone)]
pub struct IndexNodeHeader {
    pub entries_offset: u32,
    pub total_size: u32,
    pub allocated_size: u32,
    pub flags: u32,
}

impl IndexNodeHeader {
    pub const SIZE: usize = 0x10;

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let data = data.get(..Self::SIZE)?;
        Some(Self {
            entries_offset: LittleEndian::read_u32(&data[0x00..]),
            total_size: LittleEndian::read_u32(&data[0x04..]),
            allocated_size: LittleEndian::read_u32(&data[0x08..]),
            flags: LittleEndian::read_u32(&data[0x0C..]),
        })
    }

    pub fn has_children(&self) -> bool {
        self.flags & INDEX_NODE_HAS_CHILDREN != 0
    }
}

#[derive(Debug, Clone)]
pub struct IndexEntryHeader {
    pub file_reference: FileReference,
    pub entry_length: u16,
    pub key_length: u16,
    pub flags: u32,
}

impl IndexEntryHeader {
    pub const SIZE: usize = 0x10;

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let data = data.get(..Self::SIZE)?;
        Some(Self {
            file_reference: FileReference::from_raw(LittleEndian::read_u64(&data[0x00..])),
            entry_length: LittleEndian::read_u16(&data[0x08..]),
            key_length: LittleEndian::read_u16(&data[0x0A..]),
            flags: LittleEndian::read_u32(&data[0x0C..]),
        })
    }

    /// A subnode VCN occupies the entry's last 8 bytes
    pub fn has_subnode(&self) -> bool {
        self.flags & INDEX_ENTRY_NODE != 0
    }

    /// Terminating entry of a node; carries no key
    pub fn is_last(&self) -> bool {
        self.flags & INDEX_ENTRY_END != 0
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// Little-endian UTF-16 to a String; unpaired surrogates become U+FFFD
pub fn decode_utf16le(data: &[u8]) -> String {
    let mut units = vec![0u16; data.len() / 2];
    LittleEndian::read_u16_into(&data[..units.len() * 2], &mut units);
    String::from_utf16_lossy(&units)
}

/// 100ns ticks between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_EPOCH: i128 = 116_444_736_000_000_000;

/// FILETIME to whole Unix seconds, rounding towards the past. Every u64
/// tick count lands well inside the i64 range.
pub fn filetime_to_unix(filetime: u64) -> i64 {
    (filetime as i128 - FILETIME_UNIX_EPOCH).div_euclid(10_000_000) as i64
}

pub fn filetime_to_datetime(filetime: u64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(filetime_to_unix(filetime), 0).unwrap_or_default()
}
