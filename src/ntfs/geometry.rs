//! Sector/cluster geometry decoded from the NTFS boot sector

use crate::error::{NtfsError, Result};
use crate::ntfs::structs::{NtfsBootSector, BOOT_SECTOR_SIZE, FIXUP_STRIDE};

/// Addressing constants of one NTFS volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeGeometry {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub bytes_per_cluster: u32,
    pub bytes_per_record: u32,
    pub bytes_per_index_record: u32,
    pub mft_start_lcn: u64,
    pub mft_mirror_lcn: u64,
    pub total_sectors: u64,
    pub volume_serial_number: u64,
}

impl VolumeGeometry {
    /// Decode and validate the boot sector
    pub fn from_boot_sector(data: &[u8]) -> Result<Self> {
        if data.len() < BOOT_SECTOR_SIZE {
            return Err(NtfsError::InvalidVolume(format!(
                "boot sector truncated: {} bytes",
                data.len()
            )));
        }

        let boot = NtfsBootSector::from_bytes(data)
            .ok_or_else(|| NtfsError::InvalidVolume("unreadable boot sector".to_string()))?;

        if !boot.is_valid_ntfs() {
            return Err(NtfsError::InvalidVolume(format!(
                "OEM ID {:?}, {} bytes/sector, {} sectors/cluster",
                String::from_utf8_lossy(&boot.oem_id),
                boot.bytes_per_sector,
                boot.sectors_per_cluster
            )));
        }

        let geometry = Self {
            bytes_per_sector: boot.bytes_per_sector as u32,
            sectors_per_cluster: boot.sectors_per_cluster as u32,
            bytes_per_cluster: boot.bytes_per_cluster(),
            bytes_per_record: boot.bytes_per_mft_record(),
            bytes_per_index_record: boot.bytes_per_index_record(),
            mft_start_lcn: boot.mft_cluster_number,
            mft_mirror_lcn: boot.mft_mirror_cluster_number,
            total_sectors: boot.total_sectors,
            volume_serial_number: boot.volume_serial_number,
        };

        if geometry.bytes_per_cluster == 0
            || geometry.bytes_per_record == 0
            || geometry.bytes_per_index_record == 0
        {
            return Err(NtfsError::InvalidVolume(format!(
                "zero derived size (cluster {}, record {}, index record {})",
                geometry.bytes_per_cluster,
                geometry.bytes_per_record,
                geometry.bytes_per_index_record
            )));
        }

        // Fixups protect every 512-byte stride, so records must be whole strides
        if (geometry.bytes_per_record as usize) % FIXUP_STRIDE != 0
            || (geometry.bytes_per_index_record as usize) % FIXUP_STRIDE != 0
        {
            return Err(NtfsError::InvalidVolume(format!(
                "record size {} / index record size {} not a multiple of {}",
                geometry.bytes_per_record, geometry.bytes_per_index_record, FIXUP_STRIDE
            )));
        }

        Ok(geometry)
    }

    /// Byte offset of a logical cluster number from the start of the volume;
    /// `None` when it does not fit in 64 bits
    pub fn cluster_to_byte_offset(&self, cluster: u64) -> Option<u64> {
        cluster.checked_mul(self.bytes_per_cluster as u64)
    }

    /// Size of one MFT record
    pub fn bytes_per_record(&self) -> u32 {
        self.bytes_per_record
    }

    /// Byte offset of the start of the $MFT (first extent)
    pub fn mft_byte_offset(&self) -> Option<u64> {
        self.cluster_to_byte_offset(self.mft_start_lcn)
    }

    /// Size of the unit an INDX block VCN counts in
    pub fn index_vcn_size(&self) -> u64 {
        if self.bytes_per_index_record >= self.bytes_per_cluster {
            self.bytes_per_cluster as u64
        } else {
            FIXUP_STRIDE as u64
        }
    }

    /// Total volume size in bytes
    pub fn volume_size(&self) -> u64 {
        self.total_sectors.saturating_mul(self.bytes_per_sector as u64)
    }
}
