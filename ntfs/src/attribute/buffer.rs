//! Byte-addressable, read-only views of attribute values.

use alloc::vec;
use alloc::vec::Vec;

use super::record::{AttributeBody, AttributeRecord};
use super::types::AttributeFlags;
use crate::cluster_stream::{load_unit, read_runs, Compressor};
use crate::error::{NtfsError, NtfsResult};
use crate::runlist::ClusterRunList;
use crate::volume::Volume;

/// Read-only view over the clusters of a non-resident value.
pub struct NonResidentBuffer<'a> {
    volume: &'a Volume,
    runs: ClusterRunList,
    data_length: u64,
    initialized_length: u64,
    /// Compression unit in clusters, when the value may hold compressed units
    unit: Option<i64>,
    compressor: Option<&'a dyn Compressor>,
}

impl<'a> NonResidentBuffer<'a> {
    /// View over `runs`, sized by the primary extent `primary`.
    pub fn new(
        volume: &'a Volume,
        runs: ClusterRunList,
        primary: &AttributeRecord,
        compressor: Option<&'a dyn Compressor>,
    ) -> Self {
        let unit = primary
            .flags()
            .contains(AttributeFlags::COMPRESSED)
            .then(|| primary.compression_unit_clusters());
        Self {
            volume,
            runs,
            data_length: primary.data_length(),
            initialized_length: primary.initialized_length(),
            unit,
            compressor,
        }
    }

    pub fn can_write(&self) -> bool {
        false
    }

    pub fn capacity(&self) -> u64 {
        self.data_length
    }

    pub fn write_at(&mut self, _pos: u64, _data: &[u8]) -> NtfsResult<usize> {
        Err(NtfsError::UnsupportedOperation("attribute buffer is read-only"))
    }

    pub fn set_capacity(&mut self, _len: u64) -> NtfsResult<()> {
        Err(NtfsError::UnsupportedOperation("attribute buffer is read-only"))
    }

    /// Byte ranges `(offset, length)` backed by storage.
    pub fn extents(&self) -> Vec<(u64, u64)> {
        let cluster = self.volume.bytes_per_cluster() as u64;
        self.runs
            .stored_ranges()
            .into_iter()
            .filter_map(|(vcn, count)| {
                let start = vcn as u64 * cluster;
                let end = (start + count as u64 * cluster).min(self.data_length);
                (end > start).then(|| (start, end - start))
            })
            .collect()
    }

    /// Absolute volume position of byte `pos`, `None` for holes.
    pub fn map_position(&self, pos: u64) -> NtfsResult<Option<u64>> {
        let cluster = self.volume.bytes_per_cluster() as u64;
        let vcn = (pos / cluster) as i64;
        let run = self
            .runs
            .get(self.runs.find_run(vcn)?)
            .ok_or(NtfsError::NotFound)?;
        if run.is_sparse() {
            return Ok(None);
        }
        let lcn = (run.start_lcn() + (vcn - run.start_vcn())) as u64;
        Ok(Some(lcn * cluster + pos % cluster))
    }

    fn read_clusters(&self, first_vcn: i64, count: i64, out: &mut [u8]) -> NtfsResult<()> {
        let Some(unit) = self.unit else {
            return read_runs(self.volume, &self.runs, first_vcn, count, out);
        };

        let cluster = self.volume.bytes_per_cluster() as usize;
        let unit_bytes = unit as usize * cluster;
        let mut cache = vec![0u8; unit_bytes];
        let mut io = vec![0u8; unit_bytes];
        let mut done = 0;
        while done < count {
            let vcn = first_vcn + done;
            let unit_vcn = vcn - vcn % unit;
            load_unit(self.volume, &self.runs, unit, self.compressor, unit_vcn, &mut cache, &mut io)?;
            let n = (unit - (vcn - unit_vcn)).min(count - done);
            let src = (vcn - unit_vcn) as usize * cluster;
            let dst = done as usize * cluster;
            out[dst..dst + n as usize * cluster].copy_from_slice(&cache[src..src + n as usize * cluster]);
            done += n;
        }
        Ok(())
    }

    /// Read up to `buf.len()` bytes at `pos`. Bytes past the initialized
    /// length read as zero.
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> NtfsResult<usize> {
        if pos >= self.data_length {
            return Ok(0);
        }
        let len = (buf.len() as u64).min(self.data_length - pos) as usize;
        let out = &mut buf[..len];
        out.fill(0);

        let stored_end = (pos + len as u64).min(self.initialized_length);
        if stored_end <= pos {
            return Ok(len);
        }

        let cluster = self.volume.bytes_per_cluster() as u64;
        let first_vcn = pos / cluster;
        let last_vcn = (stored_end + cluster - 1) / cluster;
        let count = (last_vcn - first_vcn) as i64;
        let mut span = vec![0u8; count as usize * cluster as usize];
        self.read_clusters(first_vcn as i64, count, &mut span)?;

        let skip = (pos % cluster) as usize;
        let n = (stored_end - pos) as usize;
        out[..n].copy_from_slice(&span[skip..skip + n]);
        Ok(len)
    }
}

/// Read-only view of an attribute value, resident or not.
pub enum AttributeBuffer<'a> {
    Resident(&'a [u8]),
    NonResident(NonResidentBuffer<'a>),
}

impl AttributeBuffer<'_> {
    pub fn capacity(&self) -> u64 {
        match self {
            AttributeBuffer::Resident(data) => data.len() as u64,
            AttributeBuffer::NonResident(b) => b.capacity(),
        }
    }

    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> NtfsResult<usize> {
        match self {
            AttributeBuffer::Resident(data) => {
                if pos >= data.len() as u64 {
                    return Ok(0);
                }
                let src = &data[pos as usize..];
                let n = src.len().min(buf.len());
                buf[..n].copy_from_slice(&src[..n]);
                Ok(n)
            }
            AttributeBuffer::NonResident(b) => b.read_at(pos, buf),
        }
    }

    /// Read the whole value.
    pub fn read_all(&self) -> NtfsResult<Vec<u8>> {
        let len = usize::try_from(self.capacity())
            .map_err(|_| NtfsError::RangeError("attribute value too large"))?;
        let mut out = vec![0u8; len];
        let n = self.read_at(0, &mut out)?;
        out.truncate(n);
        Ok(out)
    }
}

impl AttributeRecord {
    /// Read-only view of this record's value. Only meaningful for records
    /// that hold the whole attribute (a single extent).
    pub fn read_only_data_buffer<'a>(&'a self, volume: &'a Volume) -> NtfsResult<AttributeBuffer<'a>> {
        match self.body() {
            AttributeBody::Resident(r) => Ok(AttributeBuffer::Resident(&r.data)),
            AttributeBody::NonResident(_) => Ok(AttributeBuffer::NonResident(NonResidentBuffer::new(
                volume,
                self.cooked_runs(0)?,
                self,
                None,
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeType;
    use crate::params::VolumeParams;
    use crate::run::DataRun;
    use crate::storage::RamDisk;
    use alloc::sync::Arc;

    fn volume() -> Volume {
        let disk = Arc::new(RamDisk::new(512, 64));
        Volume::format(disk, VolumeParams::new(512, 1, 1024, 4096).unwrap()).unwrap()
    }

    #[test]
    fn test_read_through_runs_and_holes() {
        let vol = volume();
        vol.write_clusters(10, &vec![0xAAu8; 1024]).unwrap();

        let mut rec = AttributeRecord::new_non_resident(
            AttributeType::DATA,
            None,
            0,
            AttributeFlags::empty(),
            0,
            vec![DataRun::new(10, 2, false), DataRun::sparse(2)],
            0,
        ).unwrap();
        {
            let n = rec.non_resident_mut().unwrap();
            n.allocated_length = 2048;
            n.data_length = 1800;
            n.initialized_length = 1700;
        }

        let buf = rec.read_only_data_buffer(&vol).unwrap();
        assert_eq!(buf.capacity(), 1800);

        let mut out = vec![0xFFu8; 600];
        assert_eq!(buf.read_at(1000, &mut out).unwrap(), 600);
        assert!(out[..24].iter().all(|&b| b == 0xAA));
        // hole and uninitialized tail read as zero
        assert!(out[24..].iter().all(|&b| b == 0));

        let mut out = vec![0u8; 16];
        assert_eq!(buf.read_at(1795, &mut out).unwrap(), 5);
        assert_eq!(buf.read_at(1800, &mut out).unwrap(), 0);

        let AttributeBuffer::NonResident(nr) = &buf else { panic!("expected non-resident") };
        assert_eq!(nr.extents(), vec![(0, 1024)]);
        assert_eq!(nr.map_position(513).unwrap(), Some(11 * 512 + 1));
        assert_eq!(nr.map_position(1500).unwrap(), None);
    }

    #[test]
    fn test_resident_buffer() {
        let vol = volume();
        let mut rec = AttributeRecord::new_resident(AttributeType::DATA, None, 0, false, AttributeFlags::empty()).unwrap();
        rec.resident_mut().unwrap().data = b"hello".to_vec();
        let buf = rec.read_only_data_buffer(&vol).unwrap();
        assert_eq!(buf.read_all().unwrap(), b"hello");
        let mut out = [0u8; 8];
        assert_eq!(buf.read_at(3, &mut out).unwrap(), 2);
        assert_eq!(&out[..2], b"lo");
    }

    #[test]
    fn test_writes_rejected() {
        let vol = volume();
        let rec = AttributeRecord::new_non_resident(
            AttributeType::DATA,
            None,
            0,
            AttributeFlags::empty(),
            0,
            vec![],
            0,
        ).unwrap();
        let AttributeBuffer::NonResident(mut nr) = rec.read_only_data_buffer(&vol).unwrap() else {
            panic!("expected non-resident");
        };
        assert!(!nr.can_write());
        assert!(nr.write_at(0, b"x").is_err());
        assert!(nr.set_capacity(10).is_err());
    }
}
