//! Cluster-level access to an NTFS volume.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::bitmap::ClusterBitmap;
use crate::error::{NtfsError, NtfsResult};
use crate::params::VolumeParams;
use crate::storage::BlockDevice;

/// A block device viewed as an array of clusters, with its allocation bitmap.
pub struct Volume {
    device: Arc<dyn BlockDevice>,
    params: VolumeParams,
    bitmap: ClusterBitmap,
}

impl Volume {
    pub fn new(
        device: Arc<dyn BlockDevice>,
        params: VolumeParams,
        bitmap: ClusterBitmap,
    ) -> NtfsResult<Self> {
        let block = device.block_size();
        if block == 0 || params.bytes_per_cluster() % block != 0 {
            return Err(NtfsError::InvalidParameter("cluster size is not a multiple of the block size"));
        }
        let clusters = device.size_bytes() / params.bytes_per_cluster() as u64;
        if bitmap.total_clusters() > clusters {
            return Err(NtfsError::InvalidParameter("bitmap covers more clusters than the device"));
        }

        log::debug!(
            "ntfs: volume of {} clusters, {} bytes/cluster, {} free",
            bitmap.total_clusters(),
            params.bytes_per_cluster(),
            bitmap.free_clusters()
        );

        Ok(Self { device, params, bitmap })
    }

    /// Fresh volume over a device, with every cluster free.
    pub fn format(device: Arc<dyn BlockDevice>, params: VolumeParams) -> NtfsResult<Self> {
        let clusters = device.size_bytes() / params.bytes_per_cluster() as u64;
        Self::new(device, params, ClusterBitmap::new(clusters))
    }

    pub fn params(&self) -> &VolumeParams {
        &self.params
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.params.bytes_per_cluster()
    }

    pub fn total_clusters(&self) -> u64 {
        self.bitmap.total_clusters()
    }

    pub fn bitmap(&self) -> &ClusterBitmap {
        &self.bitmap
    }

    pub fn bitmap_mut(&mut self) -> &mut ClusterBitmap {
        &mut self.bitmap
    }

    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    fn cluster_lba(&self, lcn: u64, len: usize) -> NtfsResult<(u64, u32)> {
        let cluster = self.bytes_per_cluster() as usize;
        if len % cluster != 0 {
            return Err(NtfsError::InvalidParameter("buffer is not a whole number of clusters"));
        }
        let clusters = (len / cluster) as u64;
        match lcn.checked_add(clusters) {
            Some(end) if end <= self.total_clusters() => {}
            _ => return Err(NtfsError::RangeError("cluster beyond end of volume")),
        }
        let blocks_per_cluster = (cluster as u32 / self.device.block_size()) as u64;
        let count = u32::try_from(clusters * blocks_per_cluster)
            .map_err(|_| NtfsError::InvalidParameter("transfer too large"))?;
        Ok((lcn * blocks_per_cluster, count))
    }

    /// Read whole clusters starting at `lcn`.
    pub fn read_clusters(&self, lcn: u64, buf: &mut [u8]) -> NtfsResult<()> {
        let (lba, count) = self.cluster_lba(lcn, buf.len())?;
        self.device.read_blocks(lba, count, buf)
    }

    /// Write whole clusters starting at `lcn`.
    pub fn write_clusters(&self, lcn: u64, buf: &[u8]) -> NtfsResult<()> {
        let (lba, count) = self.cluster_lba(lcn, buf.len())?;
        self.device.write_blocks(lba, count, buf)
    }

    /// Read `buf.len()` bytes at absolute byte position `pos`.
    pub fn read_bytes(&self, pos: u64, buf: &mut [u8]) -> NtfsResult<()> {
        let cluster = self.bytes_per_cluster() as u64;
        let first = pos / cluster;
        let end = pos
            .checked_add(buf.len() as u64)
            .ok_or(NtfsError::RangeError("byte range overflows"))?;
        let last = (end + cluster - 1) / cluster;
        let mut span = vec![0u8; ((last - first) * cluster) as usize];
        self.read_clusters(first, &mut span)?;
        let skip = (pos - first * cluster) as usize;
        buf.copy_from_slice(&span[skip..skip + buf.len()]);
        Ok(())
    }

    /// Write `buf` at absolute byte position `pos`, preserving the rest of
    /// the clusters it touches.
    pub fn write_bytes(&self, pos: u64, buf: &[u8]) -> NtfsResult<()> {
        let cluster = self.bytes_per_cluster() as u64;
        let first = pos / cluster;
        let end = pos
            .checked_add(buf.len() as u64)
            .ok_or(NtfsError::RangeError("byte range overflows"))?;
        let last = (end + cluster - 1) / cluster;
        let mut span = vec![0u8; ((last - first) * cluster) as usize];
        if pos % cluster != 0 || end % cluster != 0 {
            self.read_clusters(first, &mut span)?;
        }
        let skip = (pos - first * cluster) as usize;
        span[skip..skip + buf.len()].copy_from_slice(buf);
        self.write_clusters(first, &span)
    }

    pub fn allocate_clusters(
        &mut self,
        count: u64,
        hint: Option<u64>,
        is_mft: bool,
    ) -> NtfsResult<Vec<(u64, u64)>> {
        let runs = self.bitmap.allocate(count, hint, is_mft)?;
        log::trace!("ntfs: allocated {} clusters as {} run(s)", count, runs.len());
        Ok(runs)
    }

    pub fn free_clusters(&mut self, lcn: u64, count: u64) -> NtfsResult<()> {
        log::trace!("ntfs: freeing {} clusters at lcn {}", count, lcn);
        self.bitmap.free(lcn, count)
    }
}
