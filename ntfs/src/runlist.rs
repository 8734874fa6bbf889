//! Cooked run lists: data runs resolved to absolute VCN/LCN ranges.
//!
//! The cooked list is the working form of an attribute's mapping. Mutations
//! (split, sparse/non-sparse conversion, truncation, merging) happen here,
//! and the delta-encoded raw runs of each extent are re-derived on save.

use alloc::vec::Vec;

use crate::error::{NtfsError, NtfsResult};
use crate::run::DataRun;

/// Index of the attribute extent a run belongs to.
pub type ExtentId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookedDataRun {
    start_vcn: i64,
    start_lcn: i64,
    length: i64,
    is_sparse: bool,
    extent: ExtentId,
}

impl CookedDataRun {
    /// Resolve `raw` against the LCN of the previous non-sparse run.
    pub fn new(raw: &DataRun, start_vcn: i64, prev_lcn: i64, extent: ExtentId) -> NtfsResult<Self> {
        if start_vcn < 0 {
            return Err(NtfsError::RangeError("run starts at a negative vcn"));
        }
        let start_lcn = if raw.is_sparse {
            prev_lcn
        } else {
            prev_lcn
                .checked_add(raw.offset)
                .filter(|&lcn| lcn >= 0)
                .ok_or(NtfsError::RangeError("run resolves to a negative lcn"))?
        };
        if raw.length <= 0 {
            return Err(NtfsError::RangeError("run with non-positive length"));
        }
        Ok(Self {
            start_vcn,
            start_lcn,
            length: raw.length,
            is_sparse: raw.is_sparse,
            extent,
        })
    }

    pub fn start_vcn(&self) -> i64 {
        self.start_vcn
    }

    pub fn start_lcn(&self) -> i64 {
        self.start_lcn
    }

    pub fn length(&self) -> i64 {
        self.length
    }

    pub fn is_sparse(&self) -> bool {
        self.is_sparse
    }

    pub fn extent(&self) -> ExtentId {
        self.extent
    }

    /// First VCN past the run.
    pub fn end_vcn(&self) -> i64 {
        self.start_vcn + self.length
    }

    pub fn contains(&self, vcn: i64) -> bool {
        vcn >= self.start_vcn && vcn < self.end_vcn()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterRunList {
    runs: Vec<CookedDataRun>,
}

impl ClusterRunList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&CookedDataRun> {
        self.runs.get(idx)
    }

    pub fn last(&self) -> Option<&CookedDataRun> {
        self.runs.last()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, CookedDataRun> {
        self.runs.iter()
    }

    /// First VCN not covered by any run.
    pub fn next_virtual_cluster(&self) -> i64 {
        self.runs.last().map(CookedDataRun::end_vcn).unwrap_or(0)
    }

    /// Append the runs of one extent. Deltas restart from LCN 0 for every
    /// extent, while VCNs continue from `start_vcn`.
    pub fn append_extent(&mut self, start_vcn: i64, raw: &[DataRun], extent: ExtentId) -> NtfsResult<()> {
        let mut vcn = start_vcn;
        let mut lcn = 0;
        for run in raw {
            let cooked = CookedDataRun::new(run, vcn, lcn, extent)?;
            vcn = cooked.end_vcn();
            if !cooked.is_sparse {
                lcn = cooked.start_lcn;
            }
            self.push(cooked)?;
        }
        Ok(())
    }

    /// Append one raw run, resolving its delta against the last run.
    pub fn append(&mut self, raw: DataRun, extent: ExtentId) -> NtfsResult<()> {
        let prev_lcn = self.runs.last().map(|r| r.start_lcn).unwrap_or(0);
        let cooked = CookedDataRun::new(&raw, self.next_virtual_cluster(), prev_lcn, extent)?;
        self.push(cooked)
    }

    fn push(&mut self, run: CookedDataRun) -> NtfsResult<()> {
        if let Some(last) = self.runs.last() {
            if run.start_vcn < last.end_vcn() {
                return Err(NtfsError::CorruptData("overlapping runs"));
            }
        }
        self.runs.push(run);
        Ok(())
    }

    /// Index of the run containing `vcn`.
    pub fn find_run(&self, vcn: i64) -> NtfsResult<usize> {
        if let Some(last) = self.runs.last() {
            if last.contains(vcn) {
                return Ok(self.runs.len() - 1);
            }
        }
        let idx = self.runs.partition_point(|r| r.end_vcn() <= vcn);
        match self.runs.get(idx) {
            Some(run) if run.contains(vcn) => Ok(idx),
            _ => Err(NtfsError::RangeError("vcn not mapped by any run")),
        }
    }

    /// Split run `idx` so that a new run starts at `vcn`.
    pub fn split_run(&mut self, idx: usize, vcn: i64) -> NtfsResult<()> {
        let run = *self.runs.get(idx).ok_or(NtfsError::NotFound)?;
        if vcn <= run.start_vcn || vcn >= run.end_vcn() {
            return Err(NtfsError::InvalidParameter("split point outside run"));
        }
        let head = vcn - run.start_vcn;
        let tail = CookedDataRun {
            start_vcn: vcn,
            start_lcn: if run.is_sparse { run.start_lcn } else { run.start_lcn + head },
            length: run.length - head,
            is_sparse: run.is_sparse,
            extent: run.extent,
        };
        self.runs[idx].length = head;
        self.runs.insert(idx + 1, tail);
        Ok(())
    }

    /// Turn run `idx` into a hole. The caller frees its clusters.
    pub fn make_sparse(&mut self, idx: usize) -> NtfsResult<()> {
        let prev_lcn = idx
            .checked_sub(1)
            .and_then(|p| self.runs.get(p))
            .map(|r| r.start_lcn)
            .unwrap_or(0);
        let run = self.runs.get_mut(idx).ok_or(NtfsError::NotFound)?;
        run.is_sparse = true;
        run.start_lcn = prev_lcn;
        Ok(())
    }

    /// Replace hole `idx` with the given `(lcn, length)` allocations, which
    /// must exactly cover it.
    pub fn make_non_sparse(&mut self, idx: usize, allocations: &[(u64, u64)]) -> NtfsResult<()> {
        let run = *self.runs.get(idx).ok_or(NtfsError::NotFound)?;
        if !run.is_sparse {
            return Err(NtfsError::InvalidParameter("run is already allocated"));
        }
        let total: u64 = allocations.iter().map(|&(_, len)| len).sum();
        if total != run.length as u64 {
            return Err(NtfsError::InvalidParameter("allocation does not cover the hole"));
        }

        let mut vcn = run.start_vcn;
        let replacement: Vec<CookedDataRun> = allocations
            .iter()
            .map(|&(lcn, len)| {
                let r = CookedDataRun {
                    start_vcn: vcn,
                    start_lcn: lcn as i64,
                    length: len as i64,
                    is_sparse: false,
                    extent: run.extent,
                };
                vcn += len as i64;
                r
            })
            .collect();
        self.runs.splice(idx..=idx, replacement);
        Ok(())
    }

    /// Drop run `idx` and everything after it.
    pub fn truncate_at(&mut self, idx: usize) {
        self.runs.truncate(idx);
    }

    /// Merge neighbours of the same extent that are both sparse, or that are
    /// physically contiguous.
    pub fn collapse_runs(&mut self) {
        let mut merged: Vec<CookedDataRun> = Vec::with_capacity(self.runs.len());
        for run in self.runs.drain(..) {
            if let Some(prev) = merged.last_mut() {
                let same_extent = prev.extent == run.extent && prev.end_vcn() == run.start_vcn;
                let joinable = if prev.is_sparse {
                    run.is_sparse
                } else {
                    !run.is_sparse && prev.start_lcn + prev.length == run.start_lcn
                };
                if same_extent && joinable {
                    prev.length += run.length;
                    continue;
                }
            }
            merged.push(run);
        }
        self.runs = merged;
    }

    /// Re-encode the runs of one extent as LCN deltas.
    pub fn raw_runs(&self, extent: ExtentId) -> Vec<DataRun> {
        let mut base = 0;
        self.runs
            .iter()
            .filter(|r| r.extent == extent)
            .map(|r| {
                if r.is_sparse {
                    DataRun::sparse(r.length)
                } else {
                    let run = DataRun::new(r.start_lcn - base, r.length, false);
                    base = r.start_lcn;
                    run
                }
            })
            .collect()
    }

    /// `(first, last)` VCN mapped by an extent.
    pub fn extent_vcn_range(&self, extent: ExtentId) -> Option<(i64, i64)> {
        let mut it = self.runs.iter().filter(|r| r.extent == extent);
        let first = it.next()?;
        let last = it.last().unwrap_or(first);
        Some((first.start_vcn, last.end_vcn() - 1))
    }

    /// Clusters with backing storage.
    pub fn allocated_clusters(&self) -> i64 {
        self.runs.iter().filter(|r| !r.is_sparse).map(|r| r.length).sum()
    }

    /// `(vcn, count)` ranges with backing storage, adjacent runs merged.
    pub fn stored_ranges(&self) -> Vec<(i64, i64)> {
        let mut out: Vec<(i64, i64)> = Vec::new();
        for r in self.runs.iter().filter(|r| !r.is_sparse) {
            match out.last_mut() {
                Some((s, c)) if *s + *c == r.start_vcn => *c += r.length,
                _ => out.push((r.start_vcn, r.length)),
            }
        }
        out
    }

    /// `(lcn, count)` of every allocated run, in VCN order.
    pub fn clusters(&self) -> Vec<(i64, i64)> {
        self.runs
            .iter()
            .filter(|r| !r.is_sparse)
            .map(|r| (r.start_lcn, r.length))
            .collect()
    }
}
