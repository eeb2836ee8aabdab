//! Data stream selection and reading
//!
//! Resolves a stream name to a $DATA attribute and reads attribute content
//! through resident values or run lists. Sparse runs and the region past the
//! initialized size read as zeros; compressed and encrypted content is refused.

use crate::error::{NtfsError, Result};
use crate::ntfs::attribute::{Attribute, AttributeData, FileRecord};
use crate::ntfs::collation::{names_match, CaseMode};
use crate::ntfs::geometry::VolumeGeometry;
use crate::ntfs::source::{read_exact_at, ByteSource};
use crate::ntfs::structs::DataRun;
use crate::ntfs::volume::NtfsVolume;
use log::warn;
use std::io;
use std::sync::Arc;

// ============================================================================
// Stream selection
// ============================================================================

/// Pick the $DATA attribute named `name` ("" for the unnamed stream).
/// Under `CaseMode::Fold` an exact match wins over a case-folded one.
pub fn select_stream<'a>(file: &'a FileRecord, name: &str, mode: CaseMode) -> Result<&'a Attribute> {
    let mut folded = None;
    for attribute in file.data_streams() {
        if attribute.name == name {
            return Ok(attribute);
        }
        if folded.is_none() && names_match(&attribute.name, name, mode) {
            folded = Some(attribute);
        }
    }
    folded.ok_or_else(|| NtfsError::StreamNotFound(name.to_string()))
}

// ============================================================================
// Attribute content
// ============================================================================

/// Fill `buffer` from the run list starting at byte `offset` of the stream.
/// Every byte must be mapped by a run that lies inside the volume; sparse
/// runs yield zeros.
pub fn read_from_runs(
    source: &dyn ByteSource,
    geometry: &VolumeGeometry,
    record_number: u64,
    runs: &[DataRun],
    offset: u64,
    buffer: &mut [u8],
) -> Result<()> {
    let cluster = geometry.bytes_per_cluster as u64;
    let volume_end = source.len();
    let mut filled = 0usize;

    while filled < buffer.len() {
        let position = offset.checked_add(filled as u64).ok_or_else(|| {
            NtfsError::malformed(record_number, format!("read at {} overflows", offset))
        })?;
        let vcn = position / cluster;
        let within = position % cluster;

        let index = runs.partition_point(|r| r.end_vcn() <= vcn);
        let run = runs
            .get(index)
            .filter(|r| r.vcn <= vcn)
            .ok_or_else(|| {
                NtfsError::malformed(record_number, format!("no run maps VCN {}", vcn))
            })?;

        let run_remaining = (run.end_vcn() - vcn)
            .checked_mul(cluster)
            .map_or(u64::MAX, |bytes| bytes - within);
        let n = run_remaining.min((buffer.len() - filled) as u64) as usize;
        let chunk = &mut buffer[filled..filled + n];

        match run.lcn {
            None => chunk.fill(0),
            Some(lcn) => {
                let at = lcn
                    .checked_add(vcn - run.vcn)
                    .and_then(|target| geometry.cluster_to_byte_offset(target))
                    .and_then(|start| start.checked_add(within))
                    .filter(|at| at.checked_add(n as u64).is_some_and(|end| end <= volume_end))
                    .ok_or_else(|| {
                        NtfsError::malformed(
                            record_number,
                            format!("run at LCN {} for VCN {} lies outside the volume", lcn, vcn),
                        )
                    })?;
                read_exact_at(source, at, chunk)?;
            }
        }
        filled += n;
    }

    Ok(())
}

fn check_readable(attribute: &Attribute) -> Result<()> {
    let reason = if attribute.is_encrypted() {
        "encrypted"
    } else if attribute.is_compressed() {
        "compressed"
    } else {
        return Ok(());
    };
    warn!(
        target: "ntfs::stream",
        "refusing {} stream '{}' of record {}", reason, attribute.name, attribute.record_number
    );
    Err(NtfsError::UnsupportedStream {
        name: attribute.name.clone(),
        reason: reason.to_string(),
    })
}

/// Read up to `buffer.len()` bytes of the attribute's value at `offset`.
/// Returns the number of bytes read; 0 at or past the end.
pub fn read_attribute(
    volume: &NtfsVolume,
    attribute: &Attribute,
    offset: u64,
    buffer: &mut [u8],
) -> Result<usize> {
    check_readable(attribute)?;

    match &attribute.data {
        AttributeData::Resident(value) => {
            if offset >= value.len() as u64 {
                return Ok(0);
            }
            let start = offset as usize;
            let n = buffer.len().min(value.len() - start);
            buffer[..n].copy_from_slice(&value[start..start + n]);
            Ok(n)
        }
        AttributeData::NonResident(nr) => {
            if offset >= nr.data_size {
                return Ok(0);
            }
            let n = (buffer.len() as u64).min(nr.data_size - offset) as usize;
            let initialized = nr.initialized_size.min(nr.data_size);

            // Bytes below the initialized size come from disk, the rest are zero
            let from_disk = if offset >= initialized {
                0
            } else {
                (n as u64).min(initialized - offset) as usize
            };
            if from_disk > 0 {
                read_from_runs(
                    volume.source(),
                    volume.geometry(),
                    attribute.record_number,
                    &nr.runs,
                    offset,
                    &mut buffer[..from_disk],
                )?;
            }
            buffer[from_disk..n].fill(0);
            Ok(n)
        }
    }
}

/// Read the whole value of a (small) attribute
pub fn read_attribute_to_end(volume: &NtfsVolume, attribute: &Attribute) -> Result<Vec<u8>> {
    let size = usize::try_from(attribute.data_size()).map_err(|_| {
        NtfsError::malformed(
            attribute.record_number,
            format!("attribute size {} does not fit in memory", attribute.data_size()),
        )
    })?;
    let mut buffer = vec![0u8; size];
    let n = read_attribute(volume, attribute, 0, &mut buffer)?;
    buffer.truncate(n);
    Ok(buffer)
}

// ============================================================================
// NtfsStreamSource: a data stream as a byte source
// ============================================================================

/// A data stream of a file, usable as the byte source of a nested volume
pub struct NtfsStreamSource {
    volume: Arc<NtfsVolume>,
    attribute: Attribute,
}

impl NtfsStreamSource {
    pub fn new(volume: Arc<NtfsVolume>, attribute: Attribute) -> Result<Self> {
        check_readable(&attribute)?;
        Ok(Self { volume, attribute })
    }
}

impl ByteSource for NtfsStreamSource {
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> io::Result<usize> {
        read_attribute(&self.volume, &self.attribute, offset, buffer).map_err(io::Error::from)
    }

    fn len(&self) -> u64 {
        self.attribute.data_size()
    }
}
