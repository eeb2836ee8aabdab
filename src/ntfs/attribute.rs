//! Attribute decoding
//!
//! Decodes the attribute sequence of one MFT record, the run lists of
//! non-resident attributes, and assembles the full attribute set of a file
//! whose attributes spill into extension records through $ATTRIBUTE_LIST.

use crate::error::{NtfsError, Result};
use crate::ntfs::mft::MftRecord;
use crate::ntfs::stream::read_attribute_to_end;
use crate::ntfs::structs::*;
use crate::ntfs::volume::NtfsVolume;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// ============================================================================
// Attribute
// ============================================================================

/// Location and size of a non-resident attribute's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonResidentData {
    pub lowest_vcn: u64,
    pub highest_vcn: u64,
    pub allocated_size: u64,
    pub data_size: u64,
    pub initialized_size: u64,
    pub compression_unit: u16,
    pub runs: Vec<DataRun>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeData {
    /// Value stored inside the MFT record
    Resident(Vec<u8>),
    /// Value stored in clusters described by a run list
    NonResident(NonResidentData),
}

/// One decoded attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub type_code: u32,
    /// Empty for unnamed attributes
    pub name: String,
    pub flags: u16,
    pub attribute_id: u16,
    /// Record the attribute was read from (base or extension)
    pub record_number: u64,
    pub data: AttributeData,
}

impl Attribute {
    /// Decode one attribute from its full on-disk bytes (header included)
    fn decode(record_number: u64, bytes: &[u8]) -> Result<Self> {
        let header = AttributeHeader::from_bytes(bytes)
            .ok_or_else(|| NtfsError::malformed(record_number, "attribute header truncated"))?;

        let name = header.name(bytes).ok_or_else(|| {
            NtfsError::malformed(
                record_number,
                format!("name of attribute 0x{:X} lies outside it", header.attribute_type),
            )
        })?;

        let data = if header.non_resident {
            let nr = NonResidentAttributeHeader::from_bytes(bytes).ok_or_else(|| {
                NtfsError::malformed(
                    record_number,
                    format!("non-resident header of attribute 0x{:X} truncated", header.attribute_type),
                )
            })?;
            let runs_offset = nr.data_runs_offset as usize;
            if runs_offset > bytes.len() {
                return Err(NtfsError::malformed(
                    record_number,
                    format!("run list offset 0x{:X} beyond attribute end", runs_offset),
                ));
            }
            let runs = decode_runs(record_number, &bytes[runs_offset..], nr.lowest_vcn)?;
            AttributeData::NonResident(NonResidentData {
                lowest_vcn: nr.lowest_vcn,
                highest_vcn: nr.highest_vcn,
                allocated_size: nr.allocated_size,
                data_size: nr.data_size,
                initialized_size: nr.initialized_size,
                compression_unit: nr.compression_unit,
                runs,
            })
        } else {
            let r = ResidentAttributeHeader::from_bytes(bytes).ok_or_else(|| {
                NtfsError::malformed(
                    record_number,
                    format!("resident header of attribute 0x{:X} truncated", header.attribute_type),
                )
            })?;
            let start = r.value_offset as usize;
            let end = start + r.value_length as usize;
            let value = bytes.get(start..end).ok_or_else(|| {
                NtfsError::malformed(
                    record_number,
                    format!(
                        "resident value {}..{} outside a {}-byte attribute",
                        start,
                        end,
                        bytes.len()
                    ),
                )
            })?;
            AttributeData::Resident(value.to_vec())
        };

        Ok(Self {
            type_code: header.attribute_type,
            name,
            flags: header.flags,
            attribute_id: header.attribute_id,
            record_number,
            data,
        })
    }

    pub fn kind(&self) -> Option<AttributeType> {
        AttributeType::from_u32(self.type_code)
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.data, AttributeData::Resident(_))
    }

    /// Logical size of the attribute's value
    pub fn data_size(&self) -> u64 {
        match &self.data {
            AttributeData::Resident(value) => value.len() as u64,
            AttributeData::NonResident(nr) => nr.data_size,
        }
    }

    pub fn resident_value(&self) -> Option<&[u8]> {
        match &self.data {
            AttributeData::Resident(value) => Some(value),
            AttributeData::NonResident(_) => None,
        }
    }

    pub fn non_resident(&self) -> Option<&NonResidentData> {
        match &self.data {
            AttributeData::NonResident(nr) => Some(nr),
            AttributeData::Resident(_) => None,
        }
    }

    /// Run list; empty for resident attributes
    pub fn runs(&self) -> &[DataRun] {
        self.non_resident().map(|nr| nr.runs.as_slice()).unwrap_or(&[])
    }

    pub fn is_compressed(&self) -> bool {
        (self.flags & ATTRIBUTE_FLAG_COMPRESSION_MASK) != 0
    }

    pub fn is_encrypted(&self) -> bool {
        (self.flags & ATTRIBUTE_FLAG_ENCRYPTED) != 0
    }

    pub fn is_sparse(&self) -> bool {
        (self.flags & ATTRIBUTE_FLAG_SPARSE) != 0
    }

    fn lowest_vcn(&self) -> u64 {
        self.non_resident().map(|nr| nr.lowest_vcn).unwrap_or(0)
    }
}

/// Decode the attribute sequence of a record, starting at `first_offset`.
/// `data` must end at the record's used size; the END marker is required.
pub fn decode_attributes(record_number: u64, data: &[u8], first_offset: usize) -> Result<Vec<Attribute>> {
    let mut attributes = Vec::new();
    let mut offset = first_offset;

    loop {
        let Some(type_bytes) = data.get(offset..offset + 4) else {
            return Err(NtfsError::malformed(
                record_number,
                format!("attribute sequence not terminated (offset 0x{:X})", offset),
            ));
        };
        if u32::from_le_bytes([type_bytes[0], type_bytes[1], type_bytes[2], type_bytes[3]])
            == ATTRIBUTE_END_MARKER
        {
            break;
        }

        let header = AttributeHeader::from_bytes(&data[offset..]).ok_or_else(|| {
            NtfsError::malformed(record_number, format!("attribute header at 0x{:X} truncated", offset))
        })?;

        let length = header.length as usize;
        if length < 16 || offset + length > data.len() {
            return Err(NtfsError::malformed(
                record_number,
                format!(
                    "attribute 0x{:X} at 0x{:X} has length {} in {} used bytes",
                    header.attribute_type,
                    offset,
                    length,
                    data.len()
                ),
            ));
        }

        attributes.push(Attribute::decode(record_number, &data[offset..offset + length])?);
        offset += length;
    }

    Ok(attributes)
}

// ============================================================================
// Run list decoding
// ============================================================================

/// Read a little-endian integer of `width` bytes, sign-extending if `signed`
fn read_varint(bytes: &[u8], signed: bool) -> i64 {
    let mut value = 0i64;
    for (i, &b) in bytes.iter().enumerate() {
        value |= (b as i64) << (i * 8);
    }
    let width = bytes.len();
    if signed && width > 0 && width < 8 {
        let shift = 64 - width * 8;
        value = (value << shift) >> shift;
    }
    value
}

/// Decode a run list. Each run header byte gives the width of the length
/// field (low nibble) and of the signed LCN delta (high nibble); a zero
/// delta width marks a sparse run. Decoding stops at a zero header byte.
pub fn decode_runs(record_number: u64, data: &[u8], starting_vcn: u64) -> Result<Vec<DataRun>> {
    let mut runs = Vec::new();
    let mut pos = 0;
    let mut vcn = starting_vcn;
    let mut current_lcn: i64 = 0;

    while pos < data.len() {
        let header = data[pos];
        if header == 0 {
            break;
        }
        pos += 1;

        let length_bytes = (header & 0x0F) as usize;
        let offset_bytes = (header >> 4) as usize;
        if length_bytes == 0 || length_bytes > 8 || offset_bytes > 8 {
            return Err(NtfsError::malformed(
                record_number,
                format!("invalid run header 0x{:02X} at {}", header, pos - 1),
            ));
        }
        if pos + length_bytes + offset_bytes > data.len() {
            return Err(NtfsError::malformed(
                record_number,
                format!("run at {} extends past the run list", pos - 1),
            ));
        }

        let cluster_count = read_varint(&data[pos..pos + length_bytes], false) as u64;
        pos += length_bytes;

        let lcn = if offset_bytes == 0 {
            None
        } else {
            let delta = read_varint(&data[pos..pos + offset_bytes], true);
            pos += offset_bytes;
            current_lcn = current_lcn
                .checked_add(delta)
                .filter(|lcn| *lcn >= 0)
                .ok_or_else(|| {
                    NtfsError::malformed(
                        record_number,
                        format!("run at VCN {} has a negative LCN", vcn),
                    )
                })?;
            Some(current_lcn as u64)
        };

        runs.push(DataRun {
            vcn,
            cluster_count,
            lcn,
        });
        vcn = vcn.checked_add(cluster_count).ok_or_else(|| {
            NtfsError::malformed(
                record_number,
                format!("run of {} clusters at VCN {} overflows", cluster_count, vcn),
            )
        })?;
    }

    Ok(runs)
}

// ============================================================================
// FileRecord: a file's full attribute set
// ============================================================================

/// A base MFT record together with every attribute it owns, including those
/// stored in extension records
#[derive(Debug, Clone)]
pub struct FileRecord {
    base: Arc<MftRecord>,
    attributes: Vec<Attribute>,
}

impl FileRecord {
    /// Gather the attributes of `base`, following its $ATTRIBUTE_LIST if present
    pub fn load(volume: &NtfsVolume, base: Arc<MftRecord>) -> Result<Self> {
        let base_number = base.record_number();
        let Some(list) = base
            .attributes()
            .iter()
            .find(|a| a.kind() == Some(AttributeType::AttributeList))
        else {
            return Ok(Self {
                attributes: base.attributes().to_vec(),
                base,
            });
        };

        let list_bytes = match list.resident_value() {
            Some(value) => value.to_vec(),
            None => read_attribute_to_end(volume, list)?,
        };
        let entries = parse_attribute_list(&list_bytes)
            .ok_or_else(|| NtfsError::malformed(base_number, "attribute list entry truncated"))?;

        debug!(
            target: "ntfs::attribute",
            "record {} has an attribute list with {} entries", base_number, entries.len()
        );

        let mut records: HashMap<u64, Arc<MftRecord>> = HashMap::new();
        records.insert(base_number, base.clone());
        let mut seen = HashSet::new();
        let mut attributes = Vec::with_capacity(entries.len());

        for entry in &entries {
            let record = match records.get(&entry.record_number()) {
                Some(record) => record.clone(),
                None => {
                    let extension = volume.read_record(entry.mft_reference)?;
                    let owner = extension.header().base_reference().record_number();
                    if owner != base_number {
                        return Err(NtfsError::corrupt(
                            extension.record_number(),
                            format!(
                                "listed as an extension of record {} but belongs to record {}",
                                base_number, owner
                            ),
                        ));
                    }
                    records.insert(extension.record_number(), extension.clone());
                    extension
                }
            };

            if !seen.insert((record.record_number(), entry.attribute_id)) {
                continue;
            }

            match record
                .attributes()
                .iter()
                .find(|a| a.type_code == entry.attribute_type && a.attribute_id == entry.attribute_id)
            {
                Some(attribute) => attributes.push(attribute.clone()),
                None => warn!(
                    target: "ntfs::attribute",
                    "attribute 0x{:X} id {} listed for record {} is missing from record {}",
                    entry.attribute_type,
                    entry.attribute_id,
                    base_number,
                    record.record_number()
                ),
            }
        }

        let attributes = merge_extents(base_number, attributes)?;
        Ok(Self { base, attributes })
    }

    pub fn base(&self) -> &Arc<MftRecord> {
        &self.base
    }

    pub fn record_number(&self) -> u64 {
        self.base.record_number()
    }

    pub fn reference(&self) -> FileReference {
        self.base.reference()
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// A directory carries a filename index; the header flag is a fallback
    pub fn is_directory(&self) -> bool {
        self.find(AttributeType::IndexRoot, FILE_NAME_INDEX).is_some() || self.base.is_directory()
    }

    /// Attribute of the given type with an exactly matching name
    pub fn find(&self, kind: AttributeType, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.type_code == kind.code() && a.name == name)
    }

    pub fn standard_information(&self) -> Option<StandardInformation> {
        self.attributes
            .iter()
            .filter(|a| a.kind() == Some(AttributeType::StandardInformation))
            .find_map(|a| a.resident_value().and_then(StandardInformation::from_bytes))
    }

    pub fn file_names(&self) -> Vec<FileNameAttribute> {
        self.attributes
            .iter()
            .filter(|a| a.kind() == Some(AttributeType::FileName))
            .filter_map(|a| a.resident_value().and_then(FileNameAttribute::from_bytes))
            .collect()
    }

    /// Display name: Win32 first, then POSIX, DOS only as a last resort
    pub fn best_file_name(&self) -> Option<FileNameAttribute> {
        let mut best: Option<FileNameAttribute> = None;
        for name in self.file_names() {
            let better = match &best {
                None => true,
                Some(current) => name.namespace.display_rank() > current.namespace.display_rank(),
            };
            if better {
                best = Some(name);
            }
        }
        best
    }

    /// Does the file have a name outside the DOS namespace in `directory`?
    pub fn has_long_name_in(&self, directory: u64) -> bool {
        self.file_names()
            .iter()
            .any(|n| n.namespace.is_long() && n.parent_reference.record_number() == directory)
    }

    /// All $DATA attributes: the unnamed stream and alternate data streams
    pub fn data_streams(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes
            .iter()
            .filter(|a| a.kind() == Some(AttributeType::Data))
    }
}

/// Fold non-resident extents that start past VCN 0 into the extent that
/// starts at VCN 0 of the same attribute, in VCN order
fn merge_extents(record_number: u64, attributes: Vec<Attribute>) -> Result<Vec<Attribute>> {
    let (mut merged, mut extents): (Vec<Attribute>, Vec<Attribute>) =
        attributes.into_iter().partition(|a| a.lowest_vcn() == 0);
    extents.sort_by_key(|a| a.lowest_vcn());

    for extent in extents {
        let head = merged
            .iter_mut()
            .find(|a| a.type_code == extent.type_code && a.name == extent.name && !a.is_resident());
        let (Some(head), AttributeData::NonResident(tail)) = (head, extent.data) else {
            return Err(NtfsError::malformed(
                record_number,
                format!(
                    "extent of attribute 0x{:X} '{}' has no first extent",
                    extent.type_code, extent.name
                ),
            ));
        };
        if let AttributeData::NonResident(nr) = &mut head.data {
            nr.runs.extend(tail.runs);
            nr.highest_vcn = nr.highest_vcn.max(tail.highest_vcn);
        }
    }

    Ok(merged)
}
