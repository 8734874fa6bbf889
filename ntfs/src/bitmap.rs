//! Allocation bitmaps.
//!
//! `ClusterBitmap` tracks which clusters of the volume are in use (`$Bitmap`),
//! and `Bitmap` is the growable bit set used for index block allocation
//! (the `$BITMAP` attribute next to `$INDEX_ALLOCATION`).

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{NtfsError, NtfsResult};

// ============================================================================
// Generic bitmap
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    bytes: Vec<u8>,
}

impl Bitmap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self { bytes: bytes.to_vec() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_present(&self, idx: u64) -> bool {
        let byte = (idx / 8) as usize;
        self.bytes
            .get(byte)
            .map(|b| b & (1 << (idx % 8)) != 0)
            .unwrap_or(false)
    }

    pub fn mark_present(&mut self, idx: u64) {
        let byte = (idx / 8) as usize;
        if byte >= self.bytes.len() {
            // NTFS keeps attribute bitmaps 8-byte aligned
            let len = (byte + 8) & !7;
            self.bytes.resize(len, 0);
        }
        self.bytes[byte] |= 1 << (idx % 8);
    }

    pub fn mark_absent(&mut self, idx: u64) {
        let byte = (idx / 8) as usize;
        if let Some(b) = self.bytes.get_mut(byte) {
            *b &= !(1 << (idx % 8));
        }
    }

    /// Mark and return the first clear bit at or after `min`.
    pub fn allocate_first_available(&mut self, min: u64) -> u64 {
        let mut idx = min;
        while self.is_present(idx) {
            idx += 1;
        }
        self.mark_present(idx);
        idx
    }

    pub fn count_present(&self) -> u64 {
        self.bytes.iter().map(|b| b.count_ones() as u64).sum()
    }
}

// ============================================================================
// Cluster bitmap
// ============================================================================

/// Free/used state of every cluster on the volume.
///
/// A region at the start of the volume can be reserved for the MFT; ordinary
/// allocations avoid it until the rest of the volume is full.
#[derive(Debug, Clone)]
pub struct ClusterBitmap {
    bits: Vec<u8>,
    total_clusters: u64,
    mft_zone: (u64, u64),
    free: u64,
}

impl ClusterBitmap {
    pub fn new(total_clusters: u64) -> Self {
        Self {
            bits: vec![0; ((total_clusters + 7) / 8) as usize],
            total_clusters,
            mft_zone: (0, 0),
            free: total_clusters,
        }
    }

    pub fn from_bytes(bytes: &[u8], total_clusters: u64) -> NtfsResult<Self> {
        let needed = ((total_clusters + 7) / 8) as usize;
        if bytes.len() < needed {
            return Err(NtfsError::CorruptData("cluster bitmap shorter than volume"));
        }
        let mut bitmap = Self {
            bits: bytes[..needed].to_vec(),
            total_clusters,
            mft_zone: (0, 0),
            free: 0,
        };
        bitmap.free = (0..total_clusters).filter(|&c| !bitmap.bit(c)).count() as u64;
        Ok(bitmap)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn total_clusters(&self) -> u64 {
        self.total_clusters
    }

    pub fn free_clusters(&self) -> u64 {
        self.free
    }

    /// Reserve `[start, end)` for MFT growth.
    pub fn set_mft_zone(&mut self, start: u64, end: u64) {
        self.mft_zone = (start.min(self.total_clusters), end.min(self.total_clusters));
    }

    fn bit(&self, lcn: u64) -> bool {
        self.bits[(lcn / 8) as usize] & (1 << (lcn % 8)) != 0
    }

    fn set_bit(&mut self, lcn: u64, used: bool) {
        let mask = 1 << (lcn % 8);
        let byte = &mut self.bits[(lcn / 8) as usize];
        if used {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }

    fn check_range(&self, lcn: u64, count: u64) -> NtfsResult<()> {
        match lcn.checked_add(count) {
            Some(end) if end <= self.total_clusters => Ok(()),
            _ => Err(NtfsError::RangeError("cluster range beyond end of volume")),
        }
    }

    pub fn is_allocated(&self, lcn: u64) -> NtfsResult<bool> {
        self.check_range(lcn, 1)?;
        Ok(self.bit(lcn))
    }

    pub fn mark_allocated(&mut self, lcn: u64, count: u64) -> NtfsResult<()> {
        self.check_range(lcn, count)?;
        for c in lcn..lcn + count {
            if !self.bit(c) {
                self.set_bit(c, true);
                self.free -= 1;
            }
        }
        Ok(())
    }

    pub fn free(&mut self, lcn: u64, count: u64) -> NtfsResult<()> {
        self.check_range(lcn, count)?;
        for c in lcn..lcn + count {
            if self.bit(c) {
                self.set_bit(c, false);
                self.free += 1;
            }
        }
        Ok(())
    }

    /// Allocate `count` clusters, possibly as several runs.
    ///
    /// The search starts at `hint` (or just past the MFT zone) and wraps around.
    /// Returns `(lcn, length)` pairs in allocation order.
    pub fn allocate(
        &mut self,
        count: u64,
        hint: Option<u64>,
        is_mft: bool,
    ) -> NtfsResult<Vec<(u64, u64)>> {
        let mut runs: Vec<(u64, u64)> = Vec::new();
        if count == 0 {
            return Ok(runs);
        }
        if count > self.free {
            return Err(NtfsError::NoSpace);
        }

        let default_start = if is_mft { self.mft_zone.0 } else { self.mft_zone.1 };
        let start = hint
            .filter(|&h| h < self.total_clusters)
            .unwrap_or(default_start)
            .min(self.total_clusters);

        let mut remaining = count;
        // First pass keeps ordinary data out of the MFT zone.
        for allow_zone in [is_mft, true] {
            for (from, to) in [(start, self.total_clusters), (0, start)] {
                let mut lcn = from;
                while lcn < to && remaining > 0 {
                    let in_zone = lcn >= self.mft_zone.0 && lcn < self.mft_zone.1;
                    if self.bit(lcn) || (in_zone && !allow_zone) {
                        lcn += 1;
                        continue;
                    }
                    self.set_bit(lcn, true);
                    self.free -= 1;
                    remaining -= 1;
                    match runs.last_mut() {
                        Some((s, l)) if *s + *l == lcn => *l += 1,
                        _ => runs.push((lcn, 1)),
                    }
                    lcn += 1;
                }
            }
            if remaining == 0 {
                break;
            }
        }

        if remaining > 0 {
            // free count said otherwise; roll back and report
            for &(lcn, len) in &runs {
                self.free(lcn, len)?;
            }
            return Err(NtfsError::NoSpace);
        }
        Ok(runs)
    }
}
