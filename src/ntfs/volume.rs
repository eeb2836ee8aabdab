//! An opened NTFS volume
//!
//! Holds the byte source, the geometry decoded from the boot sector, the
//! $MFT run list and the record cache shared by every handle on the volume.

use crate::config::VfsConfig;
use crate::error::{NtfsError, Result};
use crate::ntfs::attribute::{Attribute, FileRecord};
use crate::ntfs::cache::{CacheStats, RecordCache};
use crate::ntfs::geometry::VolumeGeometry;
use crate::ntfs::mft::{MftReader, MftRecord};
use crate::ntfs::source::{read_exact_at, ByteSource};
use crate::ntfs::stream::read_attribute;
use crate::ntfs::structs::*;
use log::{debug, info};
use std::sync::Arc;

pub struct NtfsVolume {
    source: Arc<dyn ByteSource>,
    geometry: VolumeGeometry,
    mft: MftReader,
    cache: RecordCache,
    config: VfsConfig,
}

impl NtfsVolume {
    /// Decode the boot sector and locate the $MFT through record 0's own
    /// data runs
    pub fn open(source: Arc<dyn ByteSource>, config: &VfsConfig) -> Result<Arc<Self>> {
        let mut boot = vec![0u8; BOOT_SECTOR_SIZE];
        read_exact_at(source.as_ref(), 0, &mut boot).map_err(|e| match e {
            NtfsError::ShortRead { got, .. } => {
                NtfsError::InvalidVolume(format!("source holds only {} bytes", got))
            }
            other => other,
        })?;
        let geometry = VolumeGeometry::from_boot_sector(&boot)?;

        info!(
            target: "ntfs::volume",
            "NTFS volume: {} bytes/sector, {} bytes/cluster, {} bytes/record, {} bytes/index block, MFT at LCN {}",
            geometry.bytes_per_sector,
            geometry.bytes_per_cluster,
            geometry.bytes_per_record,
            geometry.bytes_per_index_record,
            geometry.mft_start_lcn
        );

        let mut volume = Self {
            source,
            mft: MftReader::bootstrap(&geometry),
            geometry,
            cache: RecordCache::new(config.record_cache_capacity),
            config: config.clone(),
        };

        let mft_record = volume
            .mft
            .read_record(volume.source.as_ref(), &volume.geometry, MFT_RECORD_MFT)
            .map_err(|e| NtfsError::InvalidVolume(format!("cannot read the $MFT record: {}", e)))?;
        let mft_file = FileRecord::load(&volume, Arc::new(mft_record))
            .map_err(|e| NtfsError::InvalidVolume(format!("cannot load the $MFT attributes: {}", e)))?;

        let data = mft_file
            .find(AttributeType::Data, "")
            .and_then(Attribute::non_resident)
            .ok_or_else(|| NtfsError::InvalidVolume("$MFT has no non-resident $DATA".to_string()))?;

        volume.mft = MftReader::new(data.runs.clone(), data.data_size, volume.geometry.bytes_per_record);
        volume.cache.clear();

        info!(
            target: "ntfs::volume",
            "$MFT holds {} records in {} runs",
            volume.mft.record_count(),
            volume.mft.runs().len()
        );

        Ok(Arc::new(volume))
    }

    /// Read the record addressed by `reference`, checking its sequence number
    pub fn read_record(&self, reference: FileReference) -> Result<Arc<MftRecord>> {
        let record_number = reference.record_number();
        let record = match self.cache.get(record_number) {
            Some(record) => record,
            None => {
                let record = Arc::new(self.mft.read_record(
                    self.source.as_ref(),
                    &self.geometry,
                    record_number,
                )?);
                self.cache.insert(record.clone());
                record
            }
        };
        record.check_sequence(reference)?;
        Ok(record)
    }

    /// Read a file's base record and gather its attributes
    pub fn file_record(&self, reference: FileReference) -> Result<FileRecord> {
        let base = self.read_record(reference)?;
        if !base.header().is_base_record() {
            debug!(
                target: "ntfs::volume",
                "record {} is an extension of record {}",
                reference.record_number(),
                base.header().base_reference().record_number()
            );
            return Err(NtfsError::RecordNotInUse(reference.record_number()));
        }
        FileRecord::load(self, base)
    }

    /// The root directory
    pub fn root(&self) -> Result<FileRecord> {
        self.file_record(FileReference::new(MFT_RECORD_ROOT, 0))
    }

    /// Read attribute content at `offset`; see `stream::read_attribute`
    pub fn read_attribute(&self, attribute: &Attribute, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        read_attribute(self, attribute, offset, buffer)
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn source(&self) -> &dyn ByteSource {
        self.source.as_ref()
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    /// Number of records in the $MFT
    pub fn record_count(&self) -> u64 {
        self.mft.record_count()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
