//! MFT (Master File Table) record reader
//!
//! Locates records through the $MFT's own run list, verifies the update
//! sequence (fixup) array, checks the `FILE` signature and in-use flag, and
//! validates file-reference sequence numbers.

use crate::error::{NtfsError, Result};
use crate::ntfs::attribute::{decode_attributes, Attribute};
use crate::ntfs::geometry::VolumeGeometry;
use crate::ntfs::source::ByteSource;
use crate::ntfs::stream::read_from_runs;
use crate::ntfs::structs::*;
use log::warn;

// ============================================================================
// Fixup
// ============================================================================

/// Apply the update sequence array to a multi-sector structure (FILE or INDX).
///
/// NTFS stores the last 2 bytes of each 512-byte stride in the array and
/// replaces them with the update sequence number; every stride must carry
/// that number or the structure was torn or damaged.
pub fn apply_fixup(record_number: u64, data: &mut [u8], usa_offset: u16, usa_count: u16) -> Result<()> {
    let usa_offset = usa_offset as usize;
    let usa_count = usa_count as usize;
    let strides = data.len() / FIXUP_STRIDE;

    if usa_count < 2 {
        return Err(NtfsError::corrupt(
            record_number,
            format!("update sequence array has {} entries", usa_count),
        ));
    }
    if usa_count - 1 != strides {
        return Err(NtfsError::corrupt(
            record_number,
            format!(
                "update sequence array covers {} strides, structure has {}",
                usa_count - 1,
                strides
            ),
        ));
    }
    if usa_offset + usa_count * 2 > FIXUP_STRIDE - 2 {
        return Err(NtfsError::corrupt(
            record_number,
            format!("update sequence array at 0x{:X} overlaps the first stride end", usa_offset),
        ));
    }

    let usn = [data[usa_offset], data[usa_offset + 1]];

    for i in 1..usa_count {
        let stride_end = i * FIXUP_STRIDE - 2;
        if data[stride_end..stride_end + 2] != usn {
            return Err(NtfsError::corrupt(
                record_number,
                format!("update sequence mismatch in stride {}", i - 1),
            ));
        }
        let saved = usa_offset + i * 2;
        data[stride_end] = data[saved];
        data[stride_end + 1] = data[saved + 1];
    }

    Ok(())
}

// ============================================================================
// MftRecord
// ============================================================================

/// One fixed-size MFT record after fixup, with its own attributes decoded
#[derive(Debug, Clone)]
pub struct MftRecord {
    record_number: u64,
    header: MftRecordHeader,
    data: Vec<u8>,
    attributes: Vec<Attribute>,
}

impl MftRecord {
    /// Parse a raw record buffer
    pub fn parse(record_number: u64, mut data: Vec<u8>) -> Result<Self> {
        let header = MftRecordHeader::from_bytes(&data)
            .ok_or_else(|| NtfsError::corrupt(record_number, "record header truncated"))?;

        if !header.has_file_signature() {
            if header.signature == MFT_RECORD_BAD_SIGNATURE {
                warn!(target: "ntfs::mft", "MFT record {} is marked BAAD", record_number);
            }
            return Err(NtfsError::RecordNotInUse(record_number));
        }

        apply_fixup(
            record_number,
            &mut data,
            header.update_sequence_offset,
            header.update_sequence_size,
        )
        .inspect_err(|e| warn!(target: "ntfs::mft", "fixup failed: {}", e))?;

        if !header.is_in_use() {
            return Err(NtfsError::RecordNotInUse(record_number));
        }

        if header.used_size as usize > data.len()
            || (header.first_attribute_offset as usize) >= data.len()
        {
            return Err(NtfsError::corrupt(
                record_number,
                format!(
                    "used size {} / first attribute 0x{:X} outside a {}-byte record",
                    header.used_size,
                    header.first_attribute_offset,
                    data.len()
                ),
            ));
        }

        let attributes = decode_attributes(
            record_number,
            &data[..header.used_size as usize],
            header.first_attribute_offset as usize,
        )?;

        Ok(Self {
            record_number,
            header,
            data,
            attributes,
        })
    }

    pub fn record_number(&self) -> u64 {
        self.record_number
    }

    pub fn sequence_number(&self) -> u16 {
        self.header.sequence_number
    }

    /// File reference carrying the record's current sequence number
    pub fn reference(&self) -> FileReference {
        FileReference::new(self.record_number, self.header.sequence_number)
    }

    pub fn header(&self) -> &MftRecordHeader {
        &self.header
    }

    /// Raw record bytes after fixup
    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    /// Attributes stored in this record only (see `FileRecord` for the full set)
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn is_directory(&self) -> bool {
        self.header.is_directory()
    }

    /// Fail if `reference` carries a sequence number that this record no longer has.
    /// A zero sequence number requests no check.
    pub fn check_sequence(&self, reference: FileReference) -> Result<()> {
        let wanted = reference.sequence_number();
        if wanted != 0 && wanted != self.header.sequence_number {
            return Err(NtfsError::StaleReference {
                reference: reference.raw(),
                record: self.record_number,
                current: self.header.sequence_number,
            });
        }
        Ok(())
    }
}

// ============================================================================
// MftReader - record location through the $MFT run list
// ============================================================================

/// Maps record numbers to volume offsets through the $MFT's data runs
#[derive(Debug, Clone)]
pub struct MftReader {
    runs: Vec<DataRun>,
    /// Size of the $MFT data stream in bytes
    mft_size: u64,
    record_size: u32,
}

impl MftReader {
    /// Reader covering only the first records, assuming a contiguous start at
    /// the boot sector's MFT cluster. Used to read record 0 itself.
    pub fn bootstrap(geometry: &VolumeGeometry) -> Self {
        const BOOTSTRAP_RECORDS: u64 = 16;
        let bytes = BOOTSTRAP_RECORDS * geometry.bytes_per_record as u64;
        let clusters = bytes.div_ceil(geometry.bytes_per_cluster as u64);
        Self {
            runs: vec![DataRun {
                vcn: 0,
                cluster_count: clusters,
                lcn: Some(geometry.mft_start_lcn),
            }],
            mft_size: clusters * geometry.bytes_per_cluster as u64,
            record_size: geometry.bytes_per_record,
        }
    }

    pub fn new(runs: Vec<DataRun>, mft_size: u64, record_size: u32) -> Self {
        Self {
            runs,
            mft_size,
            record_size,
        }
    }

    /// Number of records the $MFT data stream holds
    pub fn record_count(&self) -> u64 {
        self.mft_size / self.record_size as u64
    }

    pub fn runs(&self) -> &[DataRun] {
        &self.runs
    }

    /// Read and parse one record; no sequence check is applied here
    pub fn read_record(
        &self,
        source: &dyn ByteSource,
        geometry: &VolumeGeometry,
        record_number: u64,
    ) -> Result<MftRecord> {
        if record_number >= self.record_count() {
            return Err(NtfsError::RecordNotInUse(record_number));
        }

        let mut buffer = vec![0u8; self.record_size as usize];
        let offset = record_number * self.record_size as u64;
        // Gaps in the $MFT run list are a defect of record 0's $DATA attribute
        read_from_runs(source, geometry, MFT_RECORD_MFT, &self.runs, offset, &mut buffer)?;

        MftRecord::parse(record_number, buffer)
    }
}
