//! Volume geometry.
//!
//! Every structure in this crate is sized from a handful of numbers taken
//! from the boot sector. `VolumeParams` carries them, validated once, so the
//! rest of the code can trust the arithmetic.

use crate::error::{NtfsError, NtfsResult};

/// Update sequence stride. Fixups always protect 512-byte units, whatever
/// the device sector size.
pub const FIXUP_STRIDE: usize = 512;

/// Smallest record size the fixup scheme can protect.
const MIN_RECORD_SIZE: u32 = FIXUP_STRIDE as u32;

/// Largest cluster NTFS allows (2 MiB).
const MAX_CLUSTER_SIZE: u32 = 2 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeParams {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    /// Size of one MFT (`FILE`) record in bytes
    pub mft_record_size: u32,
    /// Size of one index (`INDX`) buffer in bytes
    pub index_buffer_size: u32,
}

impl Default for VolumeParams {
    fn default() -> Self {
        Self {
            bytes_per_sector: 512,
            sectors_per_cluster: 8,
            mft_record_size: 1024,
            index_buffer_size: 4096,
        }
    }
}

impl VolumeParams {
    pub fn new(
        bytes_per_sector: u32,
        sectors_per_cluster: u32,
        mft_record_size: u32,
        index_buffer_size: u32,
    ) -> NtfsResult<Self> {
        if !bytes_per_sector.is_power_of_two() || !(512..=4096).contains(&bytes_per_sector) {
            return Err(NtfsError::InvalidParameter("bytes per sector"));
        }
        if !sectors_per_cluster.is_power_of_two() {
            return Err(NtfsError::InvalidParameter("sectors per cluster"));
        }
        match bytes_per_sector.checked_mul(sectors_per_cluster) {
            Some(c) if c <= MAX_CLUSTER_SIZE => {}
            _ => return Err(NtfsError::InvalidParameter("cluster size")),
        }
        for size in [mft_record_size, index_buffer_size] {
            if size < MIN_RECORD_SIZE || !size.is_power_of_two() {
                return Err(NtfsError::InvalidParameter("record size"));
            }
        }

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            mft_record_size,
            index_buffer_size,
        })
    }

    /// Decode the boot-sector encoding, where record sizes are given either as
    /// a positive cluster count or as a negative power of two in bytes.
    pub fn from_raw(
        bytes_per_sector: u16,
        sectors_per_cluster: u8,
        clusters_per_mft_record: i8,
        clusters_per_index_record: i8,
    ) -> NtfsResult<Self> {
        let bytes_per_cluster = bytes_per_sector as u32 * sectors_per_cluster as u32;
        let decode = |raw: i8| -> NtfsResult<u32> {
            if raw < 0 {
                let shift = -(raw as i32) as u32;
                1u32.checked_shl(shift).ok_or(NtfsError::InvalidParameter("record size exponent"))
            } else {
                Ok(raw as u32 * bytes_per_cluster)
            }
        };

        Self::new(
            bytes_per_sector as u32,
            sectors_per_cluster as u32,
            decode(clusters_per_mft_record)?,
            decode(clusters_per_index_record)?,
        )
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    /// Boot-sector encoding of the index buffer size (inverse of `from_raw`).
    pub fn raw_clusters_per_index_record(&self) -> i8 {
        let cluster = self.bytes_per_cluster();
        if self.index_buffer_size >= cluster {
            (self.index_buffer_size / cluster) as i8
        } else {
            -(self.index_buffer_size.trailing_zeros() as i8)
        }
    }

    /// Number of VCN units between consecutive index blocks.
    ///
    /// Index block VCNs count clusters when a cluster fits in an index buffer,
    /// and 512-byte units otherwise.
    pub fn index_block_vcn_stride(&self) -> i64 {
        let cluster = self.bytes_per_cluster();
        if cluster <= self.index_buffer_size {
            (self.index_buffer_size / cluster) as i64
        } else {
            (self.index_buffer_size as usize / FIXUP_STRIDE) as i64
        }
    }

    /// Byte offset of an index block inside `$INDEX_ALLOCATION`.
    pub fn index_vcn_to_position(&self, vcn: i64) -> NtfsResult<u64> {
        if vcn < 0 {
            return Err(NtfsError::RangeError("negative index block vcn"));
        }
        let unit = if self.bytes_per_cluster() <= self.index_buffer_size {
            self.bytes_per_cluster() as u64
        } else {
            FIXUP_STRIDE as u64
        };
        (vcn as u64)
            .checked_mul(unit)
            .ok_or(NtfsError::RangeError("index block vcn"))
    }

    /// VCN of the `idx`-th index block.
    pub fn index_block_vcn(&self, idx: u64) -> i64 {
        idx as i64 * self.index_block_vcn_stride()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry() {
        let p = VolumeParams::default();
        assert_eq!(p.bytes_per_cluster(), 4096);
        assert_eq!(p.index_block_vcn_stride(), 1);
        assert_eq!(p.index_vcn_to_position(3).unwrap(), 3 * 4096);
    }

    #[test]
    fn test_from_raw_negative_sizes() {
        // 512 B sectors, 8 sectors/cluster, MFT record = 2^10, index = 1 cluster
        let p = VolumeParams::from_raw(512, 8, -10, 1).unwrap();
        assert_eq!(p.mft_record_size, 1024);
        assert_eq!(p.index_buffer_size, 4096);
        assert_eq!(p.raw_clusters_per_index_record(), 1);
    }

    #[test]
    fn test_index_vcn_in_sectors_for_big_clusters() {
        // 64 KiB clusters are larger than a 4 KiB index buffer
        let p = VolumeParams::new(512, 128, 1024, 4096).unwrap();
        assert_eq!(p.index_block_vcn_stride(), 8);
        assert_eq!(p.index_block_vcn(2), 16);
        assert_eq!(p.index_vcn_to_position(16).unwrap(), 16 * 512);
        assert_eq!(p.raw_clusters_per_index_record(), -12);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(VolumeParams::new(500, 8, 1024, 4096).is_err());
        assert!(VolumeParams::new(512, 3, 1024, 4096).is_err());
        assert!(VolumeParams::new(512, 8, 256, 4096).is_err());
        assert!(VolumeParams::from_raw(512, 8, -40, 1).is_err());
        assert!(VolumeParams::default().index_vcn_to_position(-1).is_err());
    }
}
