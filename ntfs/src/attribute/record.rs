//! Attribute record headers inside a `FILE` record.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cmp::Ordering;

use super::types::{AttributeFlags, AttributeType};
use crate::codec::{
    compare_names, read_i64, read_u16, read_u32, read_u64, read_u8, read_utf16, round_up,
    utf16_len, write_i64, write_u16, write_u32, write_u64, write_utf16,
};
use crate::error::{NtfsError, NtfsResult};
use crate::run::{decode_runs, encode_runs, runs_size, DataRun};
use crate::runlist::{ClusterRunList, ExtentId};

const RESIDENT_HEADER: usize = 0x18;
const NON_RESIDENT_HEADER: usize = 0x40;
const COMPRESSED_HEADER: usize = 0x48;

/// Resident value, stored inline in the record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResidentBody {
    pub data: Vec<u8>,
    /// Set for attributes referenced from an index (e.g. `$FILE_NAME`)
    pub indexed: bool,
}

/// Non-resident value: sizes plus the mapping pairs of one extent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NonResidentBody {
    pub start_vcn: i64,
    /// Last VCN mapped by this extent (`start_vcn - 1` when empty)
    pub last_vcn: i64,
    /// Compression unit size, log2 of clusters
    pub compression_unit: u16,
    pub allocated_length: u64,
    pub data_length: u64,
    pub initialized_length: u64,
    pub compressed_length: u64,
    pub runs: Vec<DataRun>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeBody {
    Resident(ResidentBody),
    NonResident(NonResidentBody),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRecord {
    attr_type: AttributeType,
    name: Option<String>,
    id: u16,
    flags: AttributeFlags,
    body: AttributeBody,
}

/// Length of an attribute name in UTF-16 units, which must fit the one-byte
/// length field.
pub(crate) fn name_units(name: Option<&str>) -> NtfsResult<u8> {
    let units = name.map(utf16_len).unwrap_or(0);
    u8::try_from(units).map_err(|_| NtfsError::InvalidParameter("attribute name longer than 255 units"))
}

fn normalize(name: Option<&str>) -> NtfsResult<Option<String>> {
    name_units(name)?;
    Ok(name.filter(|n| !n.is_empty()).map(ToString::to_string))
}

impl AttributeRecord {
    pub fn new_resident(
        attr_type: AttributeType,
        name: Option<&str>,
        id: u16,
        indexed: bool,
        flags: AttributeFlags,
    ) -> NtfsResult<Self> {
        Ok(Self {
            attr_type,
            name: normalize(name)?,
            id,
            flags,
            body: AttributeBody::Resident(ResidentBody { data: Vec::new(), indexed }),
        })
    }

    pub fn new_non_resident(
        attr_type: AttributeType,
        name: Option<&str>,
        id: u16,
        flags: AttributeFlags,
        start_vcn: i64,
        runs: Vec<DataRun>,
        compression_unit: u16,
    ) -> NtfsResult<Self> {
        let mapped: i64 = runs.iter().map(|r| r.length).sum();
        Ok(Self {
            attr_type,
            name: normalize(name)?,
            id,
            flags,
            body: AttributeBody::NonResident(NonResidentBody {
                start_vcn,
                last_vcn: start_vcn + mapped - 1,
                compression_unit,
                runs,
                ..Default::default()
            }),
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn attr_type(&self) -> AttributeType {
        self.attr_type
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn set_id(&mut self, id: u16) {
        self.id = id;
    }

    pub fn flags(&self) -> AttributeFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: AttributeFlags) {
        self.flags = flags;
    }

    pub fn body(&self) -> &AttributeBody {
        &self.body
    }

    pub fn is_non_resident(&self) -> bool {
        matches!(self.body, AttributeBody::NonResident(_))
    }

    pub fn resident(&self) -> Option<&ResidentBody> {
        match &self.body {
            AttributeBody::Resident(r) => Some(r),
            AttributeBody::NonResident(_) => None,
        }
    }

    pub fn resident_mut(&mut self) -> Option<&mut ResidentBody> {
        match &mut self.body {
            AttributeBody::Resident(r) => Some(r),
            AttributeBody::NonResident(_) => None,
        }
    }

    pub fn non_resident(&self) -> Option<&NonResidentBody> {
        match &self.body {
            AttributeBody::NonResident(n) => Some(n),
            AttributeBody::Resident(_) => None,
        }
    }

    pub fn non_resident_mut(&mut self) -> Option<&mut NonResidentBody> {
        match &mut self.body {
            AttributeBody::NonResident(n) => Some(n),
            AttributeBody::Resident(_) => None,
        }
    }

    pub fn start_vcn(&self) -> i64 {
        self.non_resident().map(|n| n.start_vcn).unwrap_or(0)
    }

    pub fn last_vcn(&self) -> i64 {
        self.non_resident().map(|n| n.last_vcn).unwrap_or(0)
    }

    pub fn data_length(&self) -> u64 {
        match &self.body {
            AttributeBody::Resident(r) => r.data.len() as u64,
            AttributeBody::NonResident(n) => n.data_length,
        }
    }

    pub fn allocated_length(&self) -> u64 {
        match &self.body {
            AttributeBody::Resident(r) => round_up(r.data.len(), 8) as u64,
            AttributeBody::NonResident(n) => n.allocated_length,
        }
    }

    pub fn initialized_length(&self) -> u64 {
        match &self.body {
            AttributeBody::Resident(r) => r.data.len() as u64,
            AttributeBody::NonResident(n) => n.initialized_length,
        }
    }

    /// Compression unit in clusters (1 when uncompressed).
    pub fn compression_unit_clusters(&self) -> i64 {
        self.non_resident().map(|n| 1i64 << n.compression_unit.min(16)).unwrap_or(1)
    }

    fn has_compressed_length(&self) -> bool {
        self.flags.intersects(AttributeFlags::COMPRESSED | AttributeFlags::SPARSE)
    }

    /// Resolve this extent's runs into absolute positions.
    pub fn cooked_runs(&self, extent: ExtentId) -> NtfsResult<ClusterRunList> {
        let mut list = ClusterRunList::new();
        if let Some(n) = self.non_resident() {
            list.append_extent(n.start_vcn, &n.runs, extent)?;
        }
        Ok(list)
    }

    /// `(lcn, count)` of every allocated cluster range.
    pub fn get_clusters(&self) -> NtfsResult<Vec<(i64, i64)>> {
        Ok(self.cooked_runs(0)?.clusters())
    }

    /// Ordering within a `FILE` record: type, then name, then id.
    pub fn cmp_key(&self, other: &Self) -> Ordering {
        self.attr_type
            .cmp(&other.attr_type)
            .then_with(|| compare_names(self.name(), other.name()))
            .then_with(|| self.id.cmp(&other.id))
    }

    // ------------------------------------------------------------------
    // Layout
    // ------------------------------------------------------------------

    fn name_bytes(&self) -> usize {
        self.name.as_deref().map(utf16_len).unwrap_or(0) * 2
    }

    fn header_size(&self) -> usize {
        match &self.body {
            AttributeBody::Resident(_) => RESIDENT_HEADER,
            AttributeBody::NonResident(_) if self.has_compressed_length() => COMPRESSED_HEADER,
            AttributeBody::NonResident(_) => NON_RESIDENT_HEADER,
        }
    }

    /// Offset of the value (resident) or mapping pairs (non-resident).
    fn payload_offset(&self) -> usize {
        round_up(self.header_size() + self.name_bytes(), 8)
    }

    /// Bytes the record occupies, padded to 8.
    pub fn size(&self) -> usize {
        let payload = match &self.body {
            AttributeBody::Resident(r) => r.data.len(),
            AttributeBody::NonResident(n) => runs_size(&n.runs),
        };
        round_up(self.payload_offset() + payload, 8)
    }

    /// Decode the record at the start of `buf`. `Ok(None)` at the list
    /// terminator.
    pub fn from_bytes(buf: &[u8]) -> NtfsResult<Option<(Self, usize)>> {
        let attr_type = AttributeType(read_u32(buf, 0x00)?);
        if attr_type == AttributeType::END {
            return Ok(None);
        }

        let length = read_u32(buf, 0x04)? as usize;
        let non_resident = read_u8(buf, 0x08)? != 0;
        let minimum = if non_resident { NON_RESIDENT_HEADER } else { RESIDENT_HEADER };
        if length < minimum {
            return Err(NtfsError::TruncatedRecord { declared: length, minimum });
        }
        if length > buf.len() {
            return Err(NtfsError::CorruptData("attribute record beyond end of buffer"));
        }
        let rec = &buf[..length];

        let name_len = read_u8(rec, 0x09)? as usize;
        let name_off = read_u16(rec, 0x0A)? as usize;
        let name = if name_len > 0 {
            if name_off + name_len * 2 > length {
                return Err(NtfsError::CorruptData("attribute name beyond record"));
            }
            Some(read_utf16(rec, name_off, name_len)?)
        } else {
            None
        };
        let flags = AttributeFlags::from_bits_retain(read_u16(rec, 0x0C)?);
        let id = read_u16(rec, 0x0E)?;

        let body = if non_resident {
            let runs_off = read_u16(rec, 0x20)? as usize;
            if runs_off > length {
                return Err(NtfsError::CorruptData("mapping pairs beyond record"));
            }
            let compressed = flags.intersects(AttributeFlags::COMPRESSED | AttributeFlags::SPARSE);
            if compressed && length < COMPRESSED_HEADER {
                return Err(NtfsError::TruncatedRecord { declared: length, minimum: COMPRESSED_HEADER });
            }
            AttributeBody::NonResident(NonResidentBody {
                start_vcn: read_i64(rec, 0x10)?,
                last_vcn: read_i64(rec, 0x18)?,
                compression_unit: read_u16(rec, 0x22)?,
                allocated_length: read_u64(rec, 0x28)?,
                data_length: read_u64(rec, 0x30)?,
                initialized_length: read_u64(rec, 0x38)?,
                compressed_length: if compressed { read_u64(rec, 0x40)? } else { 0 },
                runs: decode_runs(&rec[runs_off..])?,
            })
        } else {
            let value_len = read_u32(rec, 0x10)? as usize;
            let value_off = read_u16(rec, 0x14)? as usize;
            if value_off + value_len > length {
                return Err(NtfsError::CorruptData("resident value beyond record"));
            }
            AttributeBody::Resident(ResidentBody {
                data: rec[value_off..value_off + value_len].to_vec(),
                indexed: read_u8(rec, 0x16)? != 0,
            })
        };

        Ok(Some((Self { attr_type, name, id, flags, body }, length)))
    }

    /// Encode into `buf`, returning the bytes written.
    pub fn write_to(&self, buf: &mut [u8]) -> NtfsResult<usize> {
        let size = self.size();
        let name_len = name_units(self.name())?;
        if buf.len() < size {
            return Err(NtfsError::InvalidParameter("buffer too small for attribute record"));
        }
        let buf = &mut buf[..size];
        buf.fill(0);

        let header = self.header_size();
        let payload = self.payload_offset();

        write_u32(buf, 0x00, self.attr_type.0);
        write_u32(buf, 0x04, size as u32);
        buf[0x08] = self.is_non_resident() as u8;
        buf[0x09] = name_len;
        write_u16(buf, 0x0A, header as u16);
        write_u16(buf, 0x0C, self.flags.bits());
        write_u16(buf, 0x0E, self.id);
        if let Some(name) = &self.name {
            write_utf16(buf, header, name);
        }

        match &self.body {
            AttributeBody::Resident(r) => {
                write_u32(buf, 0x10, r.data.len() as u32);
                write_u16(buf, 0x14, payload as u16);
                buf[0x16] = r.indexed as u8;
                buf[payload..payload + r.data.len()].copy_from_slice(&r.data);
            }
            AttributeBody::NonResident(n) => {
                write_i64(buf, 0x10, n.start_vcn);
                write_i64(buf, 0x18, n.last_vcn);
                write_u16(buf, 0x20, payload as u16);
                write_u16(buf, 0x22, n.compression_unit);
                write_u64(buf, 0x28, n.allocated_length);
                write_u64(buf, 0x30, n.data_length);
                write_u64(buf, 0x38, n.initialized_length);
                if self.has_compressed_length() {
                    write_u64(buf, 0x40, n.compressed_length);
                }
                encode_runs(&n.runs, &mut buf[payload..]);
            }
        }
        Ok(size)
    }

    /// Absolute byte position of `offset` within the value, given the
    /// absolute position of this record. `None` for holes.
    pub fn offset_to_absolute_pos(
        &self,
        offset: u64,
        record_start: u64,
        bytes_per_cluster: u32,
    ) -> NtfsResult<Option<u64>> {
        match &self.body {
            AttributeBody::Resident(r) => {
                if offset >= r.data.len() as u64 {
                    return Err(NtfsError::RangeError("offset beyond resident value"));
                }
                Ok(Some(record_start + self.payload_offset() as u64 + offset))
            }
            AttributeBody::NonResident(_) => {
                let cluster = bytes_per_cluster as u64;
                let vcn = (offset / cluster) as i64;
                let runs = self.cooked_runs(0)?;
                let run = runs.get(runs.find_run(vcn)?).ok_or(NtfsError::NotFound)?;
                if run.is_sparse() {
                    return Ok(None);
                }
                let lcn = (run.start_lcn() + (vcn - run.start_vcn())) as u64;
                Ok(Some(lcn * cluster + offset % cluster))
            }
        }
    }

    /// Move the runs from `run_idx` on into a new extent record, which
    /// starts where this one now ends.
    pub fn split(&mut self, run_idx: usize) -> NtfsResult<AttributeRecord> {
        let cooked = self.cooked_runs(0)?;
        let n = self
            .non_resident_mut()
            .ok_or(NtfsError::UnsupportedOperation("split of a resident attribute"))?;
        if run_idx == 0 || run_idx >= n.runs.len() {
            return Err(NtfsError::InvalidParameter("split index must leave runs on both sides"));
        }

        let split_vcn = cooked.get(run_idx).map(|r| r.start_vcn()).ok_or(NtfsError::NotFound)?;
        let mut tail: Vec<DataRun> = n.runs.split_off(run_idx);
        // first run of the new extent is relative to lcn 0 again
        if let Some(first) = tail.iter_mut().find(|r| !r.is_sparse) {
            let absolute = cooked
                .iter()
                .skip(run_idx)
                .find(|r| !r.is_sparse())
                .map(|r| r.start_lcn())
                .unwrap_or(0);
            first.offset = absolute;
        }
        let old_last = n.last_vcn;
        n.last_vcn = split_vcn - 1;

        let mut extent = AttributeRecord::new_non_resident(
            self.attr_type,
            self.name(),
            0,
            self.flags,
            split_vcn,
            tail,
            self.non_resident().map(|n| n.compression_unit).unwrap_or(0),
        )?;
        if let Some(e) = extent.non_resident_mut() {
            e.last_vcn = old_last;
        }
        Ok(extent)
    }
}
