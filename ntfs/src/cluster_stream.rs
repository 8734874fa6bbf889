//! Cluster-granular access to an attribute's data through its run list.
//!
//! `RawClusterStream` maps VCNs straight onto the volume, allocating on write
//! and turning released clusters into holes. `SparseClusterStream` layers
//! compression units on top: whole-unit granularity, all-zero units kept as
//! holes, and optional compressed storage through a [`Compressor`].

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{NtfsError, NtfsResult};
use crate::run::DataRun;
use crate::runlist::{ClusterRunList, CookedDataRun};
use crate::volume::Volume;

/// Outcome of compressing one compression unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionResult {
    /// The unit compressed into this many bytes of the output buffer.
    Compressed(usize),
    Incompressible,
    AllZeros,
}

/// Compression codec for compressed attributes (LZNT1 on real volumes).
pub trait Compressor: Send + Sync {
    fn compress(&self, input: &[u8], output: &mut [u8]) -> CompressionResult;

    /// Decompress `input` into `output`, returning the bytes produced.
    fn decompress(&self, input: &[u8], output: &mut [u8]) -> NtfsResult<usize>;
}

pub trait ClusterStream {
    fn allocated_cluster_count(&self) -> i64;

    /// `(vcn, count)` ranges that have backing storage.
    fn stored_clusters(&self) -> Vec<(i64, i64)>;

    fn is_cluster_stored(&self, vcn: i64) -> bool;

    fn expand_to_clusters(&mut self, num_vcns: i64, allocate: bool) -> NtfsResult<()>;

    fn truncate_to_clusters(&mut self, num_vcns: i64) -> NtfsResult<()>;

    fn read_clusters(&mut self, start_vcn: i64, count: i64, buf: &mut [u8]) -> NtfsResult<()>;

    /// Write whole clusters. Returns the net number of clusters allocated.
    fn write_clusters(&mut self, start_vcn: i64, count: i64, buf: &[u8]) -> NtfsResult<i64>;

    /// Zero clusters, releasing storage where possible. Returns the net
    /// number of clusters allocated (negative when storage was released).
    fn clear_clusters(&mut self, start_vcn: i64, count: i64) -> NtfsResult<i64>;
}

// ============================================================================
// Shared read helpers
// ============================================================================

fn check_buffer(volume: &Volume, count: i64, len: usize) -> NtfsResult<usize> {
    let cluster = volume.bytes_per_cluster() as usize;
    if count < 0 || count as usize * cluster != len {
        return Err(NtfsError::InvalidParameter("buffer is not count clusters long"));
    }
    Ok(cluster)
}

/// Read clusters through a run list, zero-filling holes.
pub(crate) fn read_runs(
    volume: &Volume,
    runs: &ClusterRunList,
    start_vcn: i64,
    count: i64,
    buf: &mut [u8],
) -> NtfsResult<()> {
    let cluster = check_buffer(volume, count, buf.len())?;
    let end = start_vcn + count;
    let mut vcn = start_vcn;
    while vcn < end {
        let run = runs.get(runs.find_run(vcn)?).copied().ok_or(NtfsError::NotFound)?;
        let n = run.end_vcn().min(end) - vcn;
        let off = (vcn - start_vcn) as usize * cluster;
        let slice = &mut buf[off..off + n as usize * cluster];
        if run.is_sparse() {
            slice.fill(0);
        } else {
            let lcn = run.start_lcn() + (vcn - run.start_vcn());
            volume.read_clusters(lcn as u64, slice)?;
        }
        vcn += n;
    }
    Ok(())
}

fn is_stored(runs: &ClusterRunList, vcn: i64) -> bool {
    runs.find_run(vcn)
        .ok()
        .and_then(|i| runs.get(i))
        .map(|r| !r.is_sparse())
        .unwrap_or(false)
}

/// Fill `cache` with the plain contents of the compression unit at `unit_vcn`.
///
/// Any other cluster layout than the three a unit can take is rejected as
/// corrupt rather than read as zeros.
pub(crate) fn load_unit(
    volume: &Volume,
    runs: &ClusterRunList,
    unit: i64,
    compressor: Option<&dyn Compressor>,
    unit_vcn: i64,
    cache: &mut [u8],
    io: &mut [u8],
) -> NtfsResult<()> {
    let cluster = volume.bytes_per_cluster() as usize;
    let stored = (unit_vcn..unit_vcn + unit)
        .take_while(|&v| is_stored(runs, v))
        .count() as i64;

    if stored == unit {
        return read_runs(volume, runs, unit_vcn, unit, cache);
    }
    // a unit is fully stored, a hole, or a stored prefix followed by holes
    if (unit_vcn + stored + 1..unit_vcn + unit).any(|v| is_stored(runs, v)) {
        log::warn!("ntfs: compression unit at vcn {} has clusters stored after a hole", unit_vcn);
        return Err(NtfsError::CorruptData("stored cluster after a hole in a compression unit"));
    }
    if stored == 0 {
        cache.fill(0);
        return Ok(());
    }

    // a stored prefix followed by holes is a compressed unit
    let codec = compressor.ok_or(NtfsError::UnsupportedOperation("compressed unit without a codec"))?;
    let input = &mut io[..stored as usize * cluster];
    read_runs(volume, runs, unit_vcn, stored, input)?;
    let produced = codec.decompress(input, cache)?;
    if produced < cache.len() {
        return Err(NtfsError::CorruptData("compression unit decompressed short"));
    }
    Ok(())
}

// ============================================================================
// Raw stream
// ============================================================================

pub struct RawClusterStream<'a> {
    volume: &'a mut Volume,
    runs: &'a mut ClusterRunList,
    is_mft: bool,
}

impl<'a> RawClusterStream<'a> {
    pub fn new(volume: &'a mut Volume, runs: &'a mut ClusterRunList, is_mft: bool) -> Self {
        Self { volume, runs, is_mft }
    }

    pub fn runs(&self) -> &ClusterRunList {
        &*self.runs
    }

    pub fn volume(&self) -> &Volume {
        &*self.volume
    }

    pub fn are_all_clusters_stored(&self, start_vcn: i64, count: i64) -> bool {
        (start_vcn..start_vcn + count).all(|vcn| is_stored(&*self.runs, vcn))
    }

    /// Back every hole in `[start_vcn, start_vcn + count)` with clusters.
    /// Returns the number of clusters allocated.
    pub fn allocate_clusters(&mut self, start_vcn: i64, count: i64) -> NtfsResult<i64> {
        let end = start_vcn + count;
        let mut vcn = start_vcn;
        let mut total = 0;
        while vcn < end {
            let mut idx = self.runs.find_run(vcn)?;
            let run = *self.run(idx)?;
            if !run.is_sparse() {
                vcn = run.end_vcn();
                continue;
            }
            if vcn > run.start_vcn() {
                self.runs.split_run(idx, vcn)?;
                idx += 1;
            }
            if self.run(idx)?.end_vcn() > end {
                self.runs.split_run(idx, end)?;
            }
            let n = self.run(idx)?.length();

            let hint = self
                .runs
                .iter()
                .take(idx)
                .rev()
                .find(|r| !r.is_sparse())
                .map(|r| (r.start_lcn() + r.length()) as u64);
            let allocs = self.volume.allocate_clusters(n as u64, hint, self.is_mft)?;
            self.runs.make_non_sparse(idx, &allocs)?;

            total += n;
            vcn += n;
        }
        Ok(total)
    }

    /// Free the clusters backing `[start_vcn, start_vcn + count)`, leaving
    /// holes. Returns the number of clusters released.
    pub fn release_clusters(&mut self, start_vcn: i64, count: i64) -> NtfsResult<i64> {
        let end = start_vcn + count;
        let mut vcn = start_vcn;
        let mut total = 0;
        while vcn < end {
            let mut idx = self.runs.find_run(vcn)?;
            let run = *self.run(idx)?;
            if run.is_sparse() {
                vcn = run.end_vcn();
                continue;
            }
            if vcn > run.start_vcn() {
                self.runs.split_run(idx, vcn)?;
                idx += 1;
            }
            if self.run(idx)?.end_vcn() > end {
                self.runs.split_run(idx, end)?;
            }
            let run = *self.run(idx)?;
            self.volume
                .free_clusters(run.start_lcn() as u64, run.length() as u64)?;
            self.runs.make_sparse(idx)?;

            total += run.length();
            vcn = run.end_vcn();
        }
        Ok(total)
    }

    fn run(&self, idx: usize) -> NtfsResult<&CookedDataRun> {
        self.runs.get(idx).ok_or(NtfsError::NotFound)
    }

    fn write_allocated(&mut self, start_vcn: i64, count: i64, buf: &[u8]) -> NtfsResult<()> {
        let cluster = check_buffer(&*self.volume, count, buf.len())?;
        let end = start_vcn + count;
        let mut vcn = start_vcn;
        while vcn < end {
            let run = *self.run(self.runs.find_run(vcn)?)?;
            if run.is_sparse() {
                return Err(NtfsError::CorruptData("write to an unallocated cluster"));
            }
            let n = run.end_vcn().min(end) - vcn;
            let off = (vcn - start_vcn) as usize * cluster;
            let lcn = run.start_lcn() + (vcn - run.start_vcn());
            self.volume
                .write_clusters(lcn as u64, &buf[off..off + n as usize * cluster])?;
            vcn += n;
        }
        Ok(())
    }
}

impl ClusterStream for RawClusterStream<'_> {
    fn allocated_cluster_count(&self) -> i64 {
        self.runs.allocated_clusters()
    }

    fn stored_clusters(&self) -> Vec<(i64, i64)> {
        self.runs.stored_ranges()
    }

    fn is_cluster_stored(&self, vcn: i64) -> bool {
        is_stored(&*self.runs, vcn)
    }

    fn expand_to_clusters(&mut self, num_vcns: i64, allocate: bool) -> NtfsResult<()> {
        let next = self.runs.next_virtual_cluster();
        if num_vcns <= next {
            return Ok(());
        }
        if allocate && (num_vcns - next) as u64 > self.volume.bitmap().free_clusters() {
            return Err(NtfsError::NoSpace);
        }
        let extent = self.runs.last().map(|r| r.extent()).unwrap_or(0);
        self.runs.append(DataRun::sparse(num_vcns - next), extent)?;
        if allocate {
            self.allocate_clusters(next, num_vcns - next)?;
        }
        Ok(())
    }

    fn truncate_to_clusters(&mut self, num_vcns: i64) -> NtfsResult<()> {
        let next = self.runs.next_virtual_cluster();
        if num_vcns >= next {
            return Ok(());
        }
        let num_vcns = num_vcns.max(0);
        self.release_clusters(num_vcns, next - num_vcns)?;

        let mut idx = self.runs.find_run(num_vcns)?;
        if self.run(idx)?.start_vcn() < num_vcns {
            self.runs.split_run(idx, num_vcns)?;
            idx += 1;
        }
        self.runs.truncate_at(idx);
        Ok(())
    }

    fn read_clusters(&mut self, start_vcn: i64, count: i64, buf: &mut [u8]) -> NtfsResult<()> {
        read_runs(&*self.volume, &*self.runs, start_vcn, count, buf)
    }

    fn write_clusters(&mut self, start_vcn: i64, count: i64, buf: &[u8]) -> NtfsResult<i64> {
        check_buffer(&*self.volume, count, buf.len())?;
        let allocated = self.allocate_clusters(start_vcn, count)?;
        self.write_allocated(start_vcn, count, buf)?;
        Ok(allocated)
    }

    fn clear_clusters(&mut self, start_vcn: i64, count: i64) -> NtfsResult<i64> {
        Ok(-self.release_clusters(start_vcn, count)?)
    }
}

// ============================================================================
// Compression-unit stream
// ============================================================================

pub struct SparseClusterStream<'a> {
    raw: RawClusterStream<'a>,
    unit: i64,
    compressor: Option<&'a dyn Compressor>,
    cache_vcn: Option<i64>,
    cache: Vec<u8>,
    io: Vec<u8>,
}

impl<'a> SparseClusterStream<'a> {
    /// `unit` is the compression unit in clusters.
    pub fn new(
        volume: &'a mut Volume,
        runs: &'a mut ClusterRunList,
        unit: i64,
        compressor: Option<&'a dyn Compressor>,
    ) -> Self {
        let unit = unit.max(1);
        let unit_bytes = unit as usize * volume.bytes_per_cluster() as usize;
        Self {
            raw: RawClusterStream::new(volume, runs, false),
            unit,
            compressor,
            cache_vcn: None,
            cache: vec![0; unit_bytes],
            io: vec![0; unit_bytes],
        }
    }

    fn cluster_bytes(&self) -> usize {
        self.raw.volume().bytes_per_cluster() as usize
    }

    fn round_up(&self, vcn: i64) -> i64 {
        (vcn + self.unit - 1) / self.unit * self.unit
    }

    fn load_cache(&mut self, unit_vcn: i64) -> NtfsResult<()> {
        if self.cache_vcn == Some(unit_vcn) {
            return Ok(());
        }
        self.cache_vcn = None;
        load_unit(
            &*self.raw.volume,
            &*self.raw.runs,
            self.unit,
            self.compressor,
            unit_vcn,
            &mut self.cache,
            &mut self.io,
        )?;
        self.cache_vcn = Some(unit_vcn);
        Ok(())
    }

    fn compress_and_write(&mut self, unit_vcn: i64, data: &[u8]) -> NtfsResult<i64> {
        let cluster = self.cluster_bytes();
        let result = match self.compressor {
            Some(codec) => codec.compress(data, &mut self.io),
            None if data.iter().all(|&b| b == 0) => CompressionResult::AllZeros,
            None => CompressionResult::Incompressible,
        };

        match result {
            CompressionResult::AllZeros => Ok(-self.raw.release_clusters(unit_vcn, self.unit)?),
            // only worth it when at least a cluster is saved
            CompressionResult::Compressed(len) if data.len().saturating_sub(len) > cluster => {
                let stored = ((len + cluster - 1) / cluster) as i64;
                self.io[len..stored as usize * cluster].fill(0);
                let released = self.raw.release_clusters(unit_vcn + stored, self.unit - stored)?;
                let io = core::mem::take(&mut self.io);
                let written = self
                    .raw
                    .write_clusters(unit_vcn, stored, &io[..stored as usize * cluster]);
                self.io = io;
                Ok(written? - released)
            }
            _ => self.raw.write_clusters(unit_vcn, self.unit, data),
        }
    }
}

impl ClusterStream for SparseClusterStream<'_> {
    fn allocated_cluster_count(&self) -> i64 {
        self.raw.allocated_cluster_count()
    }

    fn stored_clusters(&self) -> Vec<(i64, i64)> {
        let mut out: Vec<(i64, i64)> = Vec::new();
        for (start, count) in self.raw.stored_clusters() {
            let s = start - start % self.unit;
            let e = self.round_up(start + count);
            match out.last_mut() {
                Some((ps, pc)) if *ps + *pc >= s => *pc = e.max(*ps + *pc) - *ps,
                _ => out.push((s, e - s)),
            }
        }
        out
    }

    fn is_cluster_stored(&self, vcn: i64) -> bool {
        self.raw.is_cluster_stored(vcn - vcn % self.unit)
    }

    fn expand_to_clusters(&mut self, num_vcns: i64, _allocate: bool) -> NtfsResult<()> {
        let aligned = self.round_up(num_vcns);
        self.raw.expand_to_clusters(aligned, false)
    }

    fn truncate_to_clusters(&mut self, num_vcns: i64) -> NtfsResult<()> {
        let aligned = self.round_up(num_vcns);
        self.raw.truncate_to_clusters(aligned)?;
        if aligned != num_vcns && self.raw.runs.next_virtual_cluster() > num_vcns {
            self.raw.release_clusters(num_vcns, aligned - num_vcns)?;
        }
        self.cache_vcn = None;
        Ok(())
    }

    fn read_clusters(&mut self, start_vcn: i64, count: i64, buf: &mut [u8]) -> NtfsResult<()> {
        let cluster = check_buffer(&*self.raw.volume, count, buf.len())?;
        let mut done = 0;
        while done < count {
            let focus = start_vcn + done;
            let unit_vcn = focus - focus % self.unit;
            self.load_cache(unit_vcn)?;

            let off = (focus - unit_vcn) as usize * cluster;
            let n = (self.unit - (focus - unit_vcn)).min(count - done);
            let dst = done as usize * cluster;
            let len = n as usize * cluster;
            buf[dst..dst + len].copy_from_slice(&self.cache[off..off + len]);
            done += n;
        }
        Ok(())
    }

    fn write_clusters(&mut self, start_vcn: i64, count: i64, buf: &[u8]) -> NtfsResult<i64> {
        let cluster = check_buffer(&*self.raw.volume, count, buf.len())?;
        let mut total = 0;
        let mut done = 0;
        while done < count {
            let focus = start_vcn + done;
            let unit_vcn = focus - focus % self.unit;

            if focus == unit_vcn && count - done >= self.unit {
                let src = done as usize * cluster;
                let len = self.unit as usize * cluster;
                if self.cache_vcn == Some(unit_vcn) {
                    self.cache_vcn = None;
                }
                total += self.compress_and_write(unit_vcn, &buf[src..src + len])?;
                done += self.unit;
            } else {
                self.load_cache(unit_vcn)?;
                let off = (focus - unit_vcn) as usize * cluster;
                let n = (self.unit - (focus - unit_vcn)).min(count - done);
                let src = done as usize * cluster;
                let len = n as usize * cluster;
                self.cache[off..off + len].copy_from_slice(&buf[src..src + len]);

                let cache = core::mem::take(&mut self.cache);
                let written = self.compress_and_write(unit_vcn, &cache);
                self.cache = cache;
                total += written?;
                done += n;
            }
        }
        Ok(total)
    }

    fn clear_clusters(&mut self, start_vcn: i64, count: i64) -> NtfsResult<i64> {
        let cluster = self.cluster_bytes();
        let mut total = 0;
        let mut done = 0;
        while done < count {
            let focus = start_vcn + done;
            let unit_vcn = focus - focus % self.unit;

            if focus == unit_vcn && count - done >= self.unit {
                total -= self.raw.release_clusters(focus, self.unit)?;
                if self.cache_vcn == Some(unit_vcn) {
                    self.cache_vcn = None;
                }
                done += self.unit;
            } else {
                let n = (self.unit - (focus - unit_vcn)).min(count - done);
                let zeros = vec![0u8; n as usize * cluster];
                total += self.write_clusters(focus, n, &zeros)?;
                done += n;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::VolumeParams;
    use crate::storage::RamDisk;
    use alloc::sync::Arc;

    const CLUSTER: usize = 512;

    fn volume(clusters: u64) -> Volume {
        let disk = Arc::new(RamDisk::new(512, clusters));
        Volume::format(disk, VolumeParams::new(512, 1, 1024, 4096).unwrap()).unwrap()
    }

    /// Stores uniform non-zero units as a single byte.
    struct Uniform;

    impl Compressor for Uniform {
        fn compress(&self, input: &[u8], output: &mut [u8]) -> CompressionResult {
            match input.first() {
                _ if input.iter().all(|&b| b == 0) => CompressionResult::AllZeros,
                Some(&b) if input.iter().all(|&x| x == b) => {
                    output[0] = b;
                    CompressionResult::Compressed(1)
                }
                _ => CompressionResult::Incompressible,
            }
        }

        fn decompress(&self, input: &[u8], output: &mut [u8]) -> NtfsResult<usize> {
            output.fill(input[0]);
            Ok(output.len())
        }
    }

    #[test]
    fn test_raw_expand_allocates() {
        let mut vol = volume(64);
        let mut runs = ClusterRunList::new();
        let mut s = RawClusterStream::new(&mut vol, &mut runs, false);
        s.expand_to_clusters(8, true).unwrap();
        assert_eq!(s.allocated_cluster_count(), 8);
        assert_eq!(s.stored_clusters(), vec![(0, 8)]);
        drop(s);
        assert_eq!(vol.bitmap().free_clusters(), 56);
    }

    #[test]
    fn test_raw_write_into_hole_allocates_on_demand() {
        let mut vol = volume(64);
        let mut runs = ClusterRunList::new();
        let mut s = RawClusterStream::new(&mut vol, &mut runs, false);
        s.expand_to_clusters(10, false).unwrap();
        assert!(!s.is_cluster_stored(4));

        let data = vec![0x11u8; 2 * CLUSTER];
        assert_eq!(s.write_clusters(4, 2, &data).unwrap(), 2);
        assert!(s.is_cluster_stored(4));
        assert!(!s.is_cluster_stored(6));
        assert!(s.are_all_clusters_stored(4, 2));
        assert!(!s.are_all_clusters_stored(3, 2));

        let mut out = vec![0xFFu8; 10 * CLUSTER];
        s.read_clusters(0, 10, &mut out).unwrap();
        assert!(out[..4 * CLUSTER].iter().all(|&b| b == 0));
        assert!(out[4 * CLUSTER..6 * CLUSTER].iter().all(|&b| b == 0x11));
        assert!(out[6 * CLUSTER..].iter().all(|&b| b == 0));

        // rewriting allocated clusters allocates nothing new
        assert_eq!(s.write_clusters(4, 2, &data).unwrap(), 0);
    }

    #[test]
    fn test_raw_clear_and_truncate_release() {
        let mut vol = volume(64);
        let mut runs = ClusterRunList::new();
        {
            let mut s = RawClusterStream::new(&mut vol, &mut runs, false);
            s.expand_to_clusters(12, true).unwrap();
            assert_eq!(s.clear_clusters(2, 3).unwrap(), -3);
            assert_eq!(s.allocated_cluster_count(), 9);
            s.truncate_to_clusters(7).unwrap();
            assert_eq!(s.allocated_cluster_count(), 4);
        }
        assert_eq!(runs.next_virtual_cluster(), 7);
        assert_eq!(vol.bitmap().free_clusters(), 60);
    }

    #[test]
    fn test_sparse_rounds_to_unit() {
        let mut vol = volume(64);
        let mut runs = ClusterRunList::new();
        let mut s = SparseClusterStream::new(&mut vol, &mut runs, 4, None);
        s.expand_to_clusters(5, true).unwrap();
        assert_eq!(s.raw.runs().next_virtual_cluster(), 8);
        assert_eq!(s.allocated_cluster_count(), 0);

        let data = vec![0x22u8; CLUSTER];
        assert_eq!(s.write_clusters(5, 1, &data).unwrap(), 4);
        assert!(s.is_cluster_stored(4));
        assert_eq!(s.stored_clusters(), vec![(4, 4)]);

        let mut out = vec![0u8; 2 * CLUSTER];
        s.read_clusters(4, 2, &mut out).unwrap();
        assert!(out[..CLUSTER].iter().all(|&b| b == 0));
        assert!(out[CLUSTER..].iter().all(|&b| b == 0x22));

        // zeroing the only non-zero cluster turns the unit back into a hole
        assert_eq!(s.clear_clusters(5, 1).unwrap(), -4);
        assert!(!s.is_cluster_stored(4));
    }

    #[test]
    fn test_compressed_unit_round_trip() {
        let mut vol = volume(64);
        let mut runs = ClusterRunList::new();
        let codec = Uniform;
        let mut s = SparseClusterStream::new(&mut vol, &mut runs, 4, Some(&codec));
        s.expand_to_clusters(8, false).unwrap();

        let data = vec![0x7Eu8; 4 * CLUSTER];
        assert_eq!(s.write_clusters(0, 4, &data).unwrap(), 1);
        assert_eq!(s.allocated_cluster_count(), 1);

        let mut noisy = vec![0u8; 4 * CLUSTER];
        for (i, b) in noisy.iter_mut().enumerate() {
            *b = i as u8;
        }
        assert_eq!(s.write_clusters(4, 4, &noisy).unwrap(), 4);

        let mut out = vec![0u8; 8 * CLUSTER];
        s.cache_vcn = None;
        s.read_clusters(0, 8, &mut out).unwrap();
        assert_eq!(&out[..4 * CLUSTER], &data[..]);
        assert_eq!(&out[4 * CLUSTER..], &noisy[..]);
    }

    #[test]
    fn test_compressed_unit_needs_codec() {
        let mut vol = volume(64);
        let mut runs = ClusterRunList::new();
        let codec = Uniform;
        {
            let mut s = SparseClusterStream::new(&mut vol, &mut runs, 4, Some(&codec));
            s.expand_to_clusters(4, false).unwrap();
            s.write_clusters(0, 4, &vec![0x01u8; 4 * CLUSTER]).unwrap();
        }
        let mut s = SparseClusterStream::new(&mut vol, &mut runs, 4, None);
        let mut out = vec![0u8; CLUSTER];
        assert_eq!(
            s.read_clusters(0, 1, &mut out),
            Err(NtfsError::UnsupportedOperation("compressed unit without a codec"))
        );
    }

    #[test]
    fn test_cluster_stored_after_hole_is_corrupt() {
        let mut vol = volume(64);
        let codec = Uniform;
        for stored in [&[2i64][..], &[0, 2]] {
            let mut runs = ClusterRunList::new();
            {
                let mut raw = RawClusterStream::new(&mut vol, &mut runs, false);
                raw.expand_to_clusters(4, false).unwrap();
                for &vcn in stored {
                    raw.write_clusters(vcn, 1, &vec![0x33u8; CLUSTER]).unwrap();
                }
            }
            let mut s = SparseClusterStream::new(&mut vol, &mut runs, 4, Some(&codec));
            let mut out = vec![0u8; CLUSTER];
            assert!(matches!(s.read_clusters(0, 1, &mut out), Err(NtfsError::CorruptData(_))));
        }
    }

    #[test]
    fn test_sparse_truncate_releases_partial_unit() {
        let mut vol = volume(64);
        let mut runs = ClusterRunList::new();
        {
            let mut s = SparseClusterStream::new(&mut vol, &mut runs, 4, None);
            s.expand_to_clusters(8, false).unwrap();
            let noisy: Vec<u8> = (0..8 * CLUSTER).map(|i| (i % 251) as u8 + 1).collect();
            s.write_clusters(0, 8, &noisy).unwrap();
            s.truncate_to_clusters(6).unwrap();
            assert_eq!(s.allocated_cluster_count(), 6);
        }
        assert_eq!(runs.next_virtual_cluster(), 8);
        assert_eq!(vol.bitmap().free_clusters(), 58);
    }
}
