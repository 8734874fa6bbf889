//! Attributes assembled from one or more extent records.
//!
//! A large or fragmented attribute is spread over several attribute records,
//! possibly in different `FILE` records, each mapping a contiguous VCN range.
//! `NtfsAttribute` stitches them into one cooked run list for I/O and writes
//! the per-extent mapping pairs back after every change.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::cmp::Ordering;
use core::fmt;

use super::buffer::{AttributeBuffer, NonResidentBuffer};
use super::list::AttributeListRecord;
use super::record::AttributeRecord;
use super::types::{AttributeFlags, AttributeType};
use crate::cluster_stream::{ClusterStream, Compressor, RawClusterStream, SparseClusterStream};
use crate::codec::compare_names;
use crate::error::{NtfsError, NtfsResult};
use crate::file_ref::FileRecordReference;
use crate::op::Operation;
use crate::runlist::ClusterRunList;
use crate::volume::Volume;

/// Largest chunk zeroed in one pass when filling gaps.
const ZERO_CHUNK: usize = 64 * 1024;

/// Attribute lengths are signed 64-bit on disk.
const MAX_LENGTH: u64 = i64::MAX as u64;

fn clusters_for(len: u64, cluster: u64) -> u64 {
    len / cluster + (len % cluster != 0) as u64
}

/// One attribute record together with the `FILE` record that holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeExtent {
    pub location: FileRecordReference,
    pub record: AttributeRecord,
}

pub struct NtfsAttribute {
    extents: Vec<AttributeExtent>,
    /// Extents emptied by truncation, not yet handed to the caller
    removed: Vec<AttributeExtent>,
    compressor: Option<Arc<dyn Compressor>>,
    last_modified: Option<u64>,
}

impl fmt::Debug for NtfsAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NtfsAttribute")
            .field("extents", &self.extents)
            .field("removed", &self.removed)
            .field("compressor", &self.compressor.is_some())
            .field("last_modified", &self.last_modified)
            .finish()
    }
}

impl NtfsAttribute {
    pub fn new(location: FileRecordReference, record: AttributeRecord) -> Self {
        Self {
            extents: vec![AttributeExtent { location, record }],
            removed: Vec::new(),
            compressor: None,
            last_modified: None,
        }
    }

    /// Assemble an attribute from all its extents, in any order.
    pub fn from_extents(mut extents: Vec<AttributeExtent>) -> NtfsResult<Self> {
        let first = extents
            .first()
            .ok_or(NtfsError::InvalidParameter("attribute without extents"))?;
        let (ty, name) = (first.record.attr_type(), first.record.name());
        let same = extents.iter().all(|e| {
            e.record.attr_type() == ty
                && compare_names(e.record.name(), name) == Ordering::Equal
                && e.record.is_non_resident() == first.record.is_non_resident()
        });
        if !same {
            return Err(NtfsError::CorruptData("extents belong to different attributes"));
        }
        if !first.record.is_non_resident() && extents.len() > 1 {
            return Err(NtfsError::CorruptData("resident attribute with several extents"));
        }

        extents.sort_by_key(|e| e.record.start_vcn());
        if extents[0].record.start_vcn() != 0 {
            return Err(NtfsError::CorruptData("first extent does not start at vcn 0"));
        }
        for pair in extents.windows(2) {
            if pair[1].record.start_vcn() != pair[0].record.last_vcn() + 1 {
                return Err(NtfsError::CorruptData("attribute extents are not contiguous"));
            }
        }

        Ok(Self {
            extents,
            removed: Vec::new(),
            compressor: None,
            last_modified: None,
        })
    }

    pub fn set_compressor(&mut self, compressor: Arc<dyn Compressor>) {
        self.compressor = Some(compressor);
    }

    pub fn attr_type(&self) -> AttributeType {
        self.primary().attr_type()
    }

    pub fn name(&self) -> Option<&str> {
        self.primary().name()
    }

    pub fn is_non_resident(&self) -> bool {
        self.primary().is_non_resident()
    }

    /// The extent starting at VCN 0, which carries the sizes.
    pub fn primary(&self) -> &AttributeRecord {
        &self.extents[0].record
    }

    fn primary_mut(&mut self) -> &mut AttributeRecord {
        &mut self.extents[0].record
    }

    pub fn extents(&self) -> &[AttributeExtent] {
        &self.extents
    }

    pub fn extent_mut(&mut self, idx: usize) -> Option<&mut AttributeExtent> {
        self.extents.get_mut(idx)
    }

    pub fn into_extents(self) -> Vec<AttributeExtent> {
        self.extents
    }

    /// Extents dropped by a truncation that failed part way. Their records
    /// still sit in their `FILE` records and the attribute list.
    pub fn take_removed_extents(&mut self) -> Vec<AttributeExtent> {
        core::mem::take(&mut self.removed)
    }

    pub fn length(&self) -> u64 {
        self.primary().data_length()
    }

    pub fn initialized_length(&self) -> u64 {
        self.primary().initialized_length()
    }

    /// Timestamp of the last operation that changed the value.
    pub fn last_modified(&self) -> Option<u64> {
        self.last_modified
    }

    fn touch(&mut self, op: &Operation) {
        self.last_modified = Some(op.timestamp());
    }

    fn is_sparse_aware(&self) -> bool {
        self.primary()
            .flags()
            .intersects(AttributeFlags::COMPRESSED | AttributeFlags::SPARSE)
    }

    /// All extents' runs as one list; each run remembers its extent index.
    pub fn cluster_runs(&self) -> NtfsResult<ClusterRunList> {
        let mut runs = ClusterRunList::new();
        for (i, ext) in self.extents.iter().enumerate() {
            if let Some(n) = ext.record.non_resident() {
                runs.append_extent(n.start_vcn, &n.runs, i)?;
            }
        }
        Ok(runs)
    }

    /// `(lcn, count)` of every allocated cluster range.
    pub fn clusters(&self) -> NtfsResult<Vec<(i64, i64)>> {
        Ok(self.cluster_runs()?.clusters())
    }

    pub fn to_attribute_list_records(&self) -> Vec<AttributeListRecord> {
        self.extents
            .iter()
            .map(|e| AttributeListRecord::from_attribute(&e.record, e.location))
            .collect()
    }

    /// Split extent `extent_idx` before its run `run_idx`; the new extent
    /// goes to `location`. Returns the index of the new extent, whose record
    /// id the caller assigns.
    pub fn split_extent(
        &mut self,
        extent_idx: usize,
        run_idx: usize,
        location: FileRecordReference,
    ) -> NtfsResult<usize> {
        let ext = self
            .extents
            .get_mut(extent_idx)
            .ok_or(NtfsError::InvalidParameter("no such extent"))?;
        let record = ext.record.split(run_idx)?;
        log::debug!(
            "ntfs: split {:?} extent at vcn {} into {}",
            record.attr_type(),
            record.start_vcn(),
            location
        );
        self.extents.insert(extent_idx + 1, AttributeExtent { location, record });
        Ok(extent_idx + 1)
    }

    // ------------------------------------------------------------------
    // Data access
    // ------------------------------------------------------------------

    pub fn data_buffer<'a>(&'a self, volume: &'a Volume) -> NtfsResult<AttributeBuffer<'a>> {
        match self.primary().resident() {
            Some(r) => Ok(AttributeBuffer::Resident(&r.data)),
            None => Ok(AttributeBuffer::NonResident(NonResidentBuffer::new(
                volume,
                self.cluster_runs()?,
                self.primary(),
                self.compressor.as_deref(),
            ))),
        }
    }

    pub fn read(&self, volume: &Volume, pos: u64, buf: &mut [u8]) -> NtfsResult<usize> {
        self.data_buffer(volume)?.read_at(pos, buf)
    }

    /// Run `f` over a cluster stream for this attribute, then write the
    /// resulting mapping back into the extents.
    fn with_stream<R>(
        &mut self,
        volume: &mut Volume,
        f: impl FnOnce(&mut dyn ClusterStream) -> NtfsResult<R>,
    ) -> NtfsResult<R> {
        let mut runs = self.cluster_runs()?;
        let cluster = volume.bytes_per_cluster() as u64;
        let compressor = self.compressor.clone();

        let result = if self.is_sparse_aware() {
            let unit = self.primary().compression_unit_clusters();
            let mut stream = SparseClusterStream::new(volume, &mut runs, unit, compressor.as_deref());
            f(&mut stream)
        } else {
            let mut stream = RawClusterStream::new(volume, &mut runs, false);
            f(&mut stream)
        };

        // the bitmap already reflects any partial work, so keep the map in step
        self.store_runs(&mut runs, cluster);
        result
    }

    fn store_runs(&mut self, runs: &mut ClusterRunList, cluster: u64) {
        runs.collapse_runs();
        for (i, ext) in self.extents.iter_mut().enumerate() {
            let Some(n) = ext.record.non_resident_mut() else {
                continue;
            };
            n.runs = runs.raw_runs(i);
            match runs.extent_vcn_range(i) {
                Some((first, last)) => {
                    n.start_vcn = first;
                    n.last_vcn = last;
                }
                None => n.last_vcn = n.start_vcn - 1,
            }
        }

        // only trailing extents can lose all their runs, so indices of the
        // kept ones stay valid
        let extents = core::mem::take(&mut self.extents);
        for (i, ext) in extents.into_iter().enumerate() {
            let empty = ext.record.non_resident().is_some_and(|n| n.runs.is_empty());
            if i > 0 && empty {
                log::debug!(
                    "ntfs: {:?} extent {} in {} emptied",
                    ext.record.attr_type(),
                    ext.record.id(),
                    ext.location
                );
                self.removed.push(ext);
            } else {
                self.extents.push(ext);
            }
        }

        let sparse_aware = self.is_sparse_aware();
        let allocated = runs.next_virtual_cluster() as u64 * cluster;
        let stored = runs.allocated_clusters() as u64 * cluster;
        if let Some(n) = self.primary_mut().non_resident_mut() {
            n.allocated_length = allocated;
            if sparse_aware {
                n.compressed_length = stored;
            }
        }
    }

    /// Write whole-cluster-aligned or not, reading back partial edge clusters.
    fn write_bytes(&mut self, volume: &mut Volume, pos: u64, data: &[u8]) -> NtfsResult<()> {
        let cluster = volume.bytes_per_cluster() as u64;
        let end = pos
            .checked_add(data.len() as u64)
            .ok_or(NtfsError::RangeError("write past maximum attribute size"))?;
        let first_vcn = pos / cluster;
        let last_vcn = clusters_for(end, cluster);
        let count = (last_vcn - first_vcn) as i64;
        let cl = cluster as usize;

        self.with_stream(volume, |stream| {
            let mut span = vec![0u8; count as usize * cl];
            let head = (pos % cluster) as usize;
            if head != 0 {
                stream.read_clusters(first_vcn as i64, 1, &mut span[..cl])?;
            }
            if end % cluster != 0 && (count > 1 || head == 0) {
                let off = (count as usize - 1) * cl;
                stream.read_clusters(last_vcn as i64 - 1, 1, &mut span[off..off + cl])?;
            }
            span[head..head + data.len()].copy_from_slice(data);
            stream.write_clusters(first_vcn as i64, count, &span)?;
            Ok(())
        })
    }

    fn zero_bytes(&mut self, volume: &mut Volume, pos: u64, len: u64) -> NtfsResult<()> {
        let zeros = vec![0u8; (len as usize).min(ZERO_CHUNK)];
        let mut done = 0;
        while done < len {
            let n = (len - done).min(zeros.len() as u64) as usize;
            self.write_bytes(volume, pos + done, &zeros[..n])?;
            done += n as u64;
        }
        Ok(())
    }

    /// Write `data` at byte `pos`, growing the attribute as needed.
    pub fn write(
        &mut self,
        op: &Operation,
        volume: &mut Volume,
        pos: u64,
        data: &[u8],
    ) -> NtfsResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let end = pos
            .checked_add(data.len() as u64)
            .filter(|&e| e <= MAX_LENGTH)
            .ok_or(NtfsError::RangeError("write past maximum attribute size"))?;

        if let Some(r) = self.primary_mut().resident_mut() {
            let end = usize::try_from(end)
                .map_err(|_| NtfsError::RangeError("resident write too large"))?;
            if end > r.data.len() {
                r.data.resize(end, 0);
            }
            r.data[pos as usize..end].copy_from_slice(data);
            self.touch(op);
            return Ok(data.len());
        }

        if end > self.length() {
            self.resize(op, volume, end)?;
        }
        let initialized = self.initialized_length();
        self.write_bytes(volume, pos, data)?;
        if pos > initialized {
            self.zero_bytes(volume, initialized, pos - initialized)?;
        }

        if let Some(n) = self.primary_mut().non_resident_mut() {
            n.initialized_length = n.initialized_length.max(end);
        }
        self.touch(op);
        Ok(data.len())
    }

    /// Grow or shrink the value to `len` bytes.
    ///
    /// Shrinking can empty whole extents. They are dropped from the attribute
    /// and returned, so the caller can delete their records and their
    /// attribute list entries.
    pub fn set_length(
        &mut self,
        op: &Operation,
        volume: &mut Volume,
        len: u64,
    ) -> NtfsResult<Vec<AttributeExtent>> {
        self.resize(op, volume, len)?;
        Ok(self.take_removed_extents())
    }

    fn resize(&mut self, op: &Operation, volume: &mut Volume, len: u64) -> NtfsResult<()> {
        if len > MAX_LENGTH {
            return Err(NtfsError::RangeError("attribute length beyond 2^63 - 1"));
        }
        if let Some(r) = self.primary_mut().resident_mut() {
            let len = usize::try_from(len)
                .map_err(|_| NtfsError::RangeError("resident value too large"))?;
            r.data.resize(len, 0);
            self.touch(op);
            return Ok(());
        }

        let cluster = volume.bytes_per_cluster() as u64;
        let clusters = clusters_for(len, cluster) as i64;
        let allocate = !self.is_sparse_aware();
        self.with_stream(volume, |stream| {
            stream.truncate_to_clusters(clusters)?;
            stream.expand_to_clusters(clusters, allocate)
        })?;

        if let Some(n) = self.primary_mut().non_resident_mut() {
            n.data_length = len;
            n.initialized_length = n.initialized_length.min(len);
        }
        log::trace!("ntfs: {:?} resized to {} bytes", self.attr_type(), len);
        self.touch(op);
        Ok(())
    }

    /// Zero `[pos, pos + len)`. Sparse and compressed attributes give the
    /// whole clusters inside the range back to the volume. Holes stay in
    /// their extents, so no extent is removed.
    pub fn clear(&mut self, op: &Operation, volume: &mut Volume, pos: u64, len: u64) -> NtfsResult<()> {
        let end = pos
            .checked_add(len)
            .filter(|&e| e <= self.length())
            .ok_or(NtfsError::RangeError("clear beyond end of attribute"))?;
        if len == 0 {
            return Ok(());
        }
        if let Some(r) = self.primary_mut().resident_mut() {
            r.data[pos as usize..end as usize].fill(0);
            self.touch(op);
            return Ok(());
        }

        let cluster = volume.bytes_per_cluster() as u64;
        let first_whole = clusters_for(pos, cluster);
        let last_whole = end / cluster;
        if self.is_sparse_aware() && last_whole > first_whole {
            self.zero_bytes(volume, pos, first_whole * cluster - pos)?;
            self.with_stream(volume, |stream| {
                stream.clear_clusters(first_whole as i64, (last_whole - first_whole) as i64)
            })?;
            self.zero_bytes(volume, last_whole * cluster, end - last_whole * cluster)?;
        } else {
            self.zero_bytes(volume, pos, len)?;
        }
        self.touch(op);
        Ok(())
    }
}
