//! `FILE` records: the fixed-size MFT entries that hold a file's attributes.

use alloc::vec::Vec;
use core::cmp::Ordering;

use crate::attribute::{AttributeFlags, AttributeRecord, AttributeType};
use crate::codec::{compare_names, read_u16, read_u32, read_u64, round_up, write_u16, write_u32, write_u64};
use crate::error::{NtfsError, NtfsResult};
use crate::file_ref::FileRecordReference;
use crate::fixup::{FixupHeader, FixupRecord};
use crate::op::Operation;
use crate::run::DataRun;

// ============================================================================
// Layout
// ============================================================================

const LSN_OFFSET: usize = 0x08;
const SEQUENCE_OFFSET: usize = 0x10;
const HARD_LINKS_OFFSET: usize = 0x12;
const FIRST_ATTRIBUTE_OFFSET: usize = 0x14;
const FLAGS_OFFSET: usize = 0x16;
const REAL_SIZE_OFFSET: usize = 0x18;
const ALLOCATED_SIZE_OFFSET: usize = 0x1C;
const BASE_FILE_OFFSET: usize = 0x20;
const NEXT_ATTR_ID_OFFSET: usize = 0x28;
const INDEX_OFFSET: usize = 0x2C;
/// Update sequence array offset; also the header size (XP and later)
const USA_OFFSET: usize = 0x30;
/// End-of-attributes marker plus padding
const END_MARKER_SIZE: usize = 8;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FileRecordFlags: u16 {
        const IN_USE = 0x0001;
        const IS_DIRECTORY = 0x0002;
        const IS_META_FILE = 0x0004;
        const HAS_VIEW_INDEX = 0x0008;
    }
}

/// One MFT entry.
#[derive(Debug, Clone)]
pub struct FileRecord {
    fixup: FixupHeader,
    pub lsn: u64,
    sequence_number: u16,
    pub hard_link_count: u16,
    flags: FileRecordFlags,
    allocated_size: u32,
    base_file: FileRecordReference,
    next_attribute_id: u16,
    index: u32,
    /// Sorted by type, name, id
    attributes: Vec<AttributeRecord>,
    last_modified: Option<u64>,
}

impl FileRecord {
    pub fn new(record_size: u32, index: u32, sequence_number: u16) -> Self {
        Self {
            fixup: FixupHeader::new(Self::MAGIC, record_size as usize),
            lsn: 0,
            sequence_number,
            hard_link_count: 0,
            flags: FileRecordFlags::IN_USE,
            allocated_size: record_size,
            base_file: FileRecordReference::default(),
            next_attribute_id: 0,
            index,
            attributes: Vec::new(),
            last_modified: None,
        }
    }

    /// Reference naming this record.
    pub fn reference(&self) -> FileRecordReference {
        FileRecordReference::new(self.index as u64, self.sequence_number)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    pub fn flags(&self) -> FileRecordFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: FileRecordFlags) {
        self.flags = flags;
    }

    pub fn is_in_use(&self) -> bool {
        self.flags.contains(FileRecordFlags::IN_USE)
    }

    /// Base record of an extension record; null for base records.
    pub fn base_file(&self) -> FileRecordReference {
        self.base_file
    }

    pub fn set_base_file(&mut self, base: FileRecordReference) {
        self.base_file = base;
    }

    pub fn next_attribute_id(&self) -> u16 {
        self.next_attribute_id
    }

    pub fn allocated_size(&self) -> u32 {
        self.allocated_size
    }

    pub fn last_modified(&self) -> Option<u64> {
        self.last_modified
    }

    fn first_attribute_offset(&self) -> usize {
        round_up(USA_OFFSET + self.fixup.update_sequence_size(), 8)
    }

    /// Bytes in use once serialized.
    pub fn real_size(&self) -> usize {
        let attrs: usize = self.attributes.iter().map(AttributeRecord::size).sum();
        self.first_attribute_offset() + attrs + END_MARKER_SIZE
    }

    pub fn free_space(&self) -> usize {
        (self.allocated_size as usize).saturating_sub(self.real_size())
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    pub fn attributes(&self) -> &[AttributeRecord] {
        &self.attributes
    }

    pub fn attribute(&self, id: u16) -> Option<&AttributeRecord> {
        self.attributes.iter().find(|a| a.id() == id)
    }

    /// Mutable access to a record. Changing its type or name is not allowed,
    /// the ordering of the record depends on them.
    pub fn attribute_mut(&mut self, id: u16) -> Option<&mut AttributeRecord> {
        self.attributes.iter_mut().find(|a| a.id() == id)
    }

    /// First record of the attribute `(attr_type, name)`.
    pub fn find_attribute(&self, attr_type: AttributeType, name: Option<&str>) -> Option<&AttributeRecord> {
        self.attributes
            .iter()
            .find(|a| a.attr_type() == attr_type && compare_names(a.name(), name) == Ordering::Equal)
    }

    fn allocate_attribute_id(&mut self) -> u16 {
        loop {
            let id = self.next_attribute_id;
            self.next_attribute_id = self.next_attribute_id.wrapping_add(1);
            if self.attribute(id).is_none() {
                return id;
            }
        }
    }

    /// Insert `record` under a freshly allocated id. Fails with `NoSpace`
    /// (leaving the record unchanged) when it does not fit.
    pub fn add_attribute(&mut self, op: &Operation, mut record: AttributeRecord) -> NtfsResult<u16> {
        if record.size() > self.free_space() {
            return Err(NtfsError::NoSpace);
        }
        let id = self.allocate_attribute_id();
        record.set_id(id);

        let pos = self
            .attributes
            .partition_point(|a| a.cmp_key(&record) == Ordering::Less);
        log::trace!("ntfs: {} gains {:?} id {}", self.reference(), record.attr_type(), id);
        self.attributes.insert(pos, record);
        self.touch(op);
        Ok(id)
    }

    /// Add an empty resident attribute.
    pub fn create_attribute(
        &mut self,
        op: &Operation,
        attr_type: AttributeType,
        name: Option<&str>,
        indexed: bool,
        flags: AttributeFlags,
    ) -> NtfsResult<u16> {
        let record = AttributeRecord::new_resident(attr_type, name, 0, indexed, flags)?;
        self.add_attribute(op, record)
    }

    /// Add a non-resident extent mapping `runs` from `start_vcn`.
    #[allow(clippy::too_many_arguments)]
    pub fn create_non_resident_attribute(
        &mut self,
        op: &Operation,
        attr_type: AttributeType,
        name: Option<&str>,
        flags: AttributeFlags,
        start_vcn: i64,
        runs: Vec<DataRun>,
        compression_unit: u16,
    ) -> NtfsResult<u16> {
        let record =
            AttributeRecord::new_non_resident(attr_type, name, 0, flags, start_vcn, runs, compression_unit)?;
        self.add_attribute(op, record)
    }

    pub fn remove_attribute(&mut self, op: &Operation, id: u16) -> NtfsResult<AttributeRecord> {
        let pos = self
            .attributes
            .iter()
            .position(|a| a.id() == id)
            .ok_or(NtfsError::NotFound)?;
        self.touch(op);
        Ok(self.attributes.remove(pos))
    }

    fn touch(&mut self, op: &Operation) {
        self.last_modified = Some(op.timestamp());
    }
}

impl FixupRecord for FileRecord {
    const MAGIC: [u8; 4] = *b"FILE";
    type Context = ();

    fn fixup(&self) -> &FixupHeader {
        &self.fixup
    }

    fn fixup_mut(&mut self) -> &mut FixupHeader {
        &mut self.fixup
    }

    fn read_body(fixup: FixupHeader, buf: &[u8], _: ()) -> NtfsResult<Self> {
        if buf.len() < USA_OFFSET {
            return Err(NtfsError::TruncatedRecord { declared: buf.len(), minimum: USA_OFFSET });
        }
        // records written before XP stop the header at 0x2A and carry no index
        let index = if fixup.update_sequence_offset() as usize >= USA_OFFSET {
            read_u32(buf, INDEX_OFFSET)?
        } else {
            0
        };

        let mut record = Self {
            lsn: read_u64(buf, LSN_OFFSET)?,
            sequence_number: read_u16(buf, SEQUENCE_OFFSET)?,
            hard_link_count: read_u16(buf, HARD_LINKS_OFFSET)?,
            flags: FileRecordFlags::from_bits_retain(read_u16(buf, FLAGS_OFFSET)?),
            allocated_size: read_u32(buf, ALLOCATED_SIZE_OFFSET)?,
            base_file: FileRecordReference::read(buf, BASE_FILE_OFFSET)?,
            next_attribute_id: read_u16(buf, NEXT_ATTR_ID_OFFSET)?,
            index,
            attributes: Vec::new(),
            last_modified: None,
            fixup,
        };

        let real_size = read_u32(buf, REAL_SIZE_OFFSET)? as usize;
        if real_size > buf.len() {
            return Err(NtfsError::CorruptData("record real size beyond buffer"));
        }
        let mut pos = read_u16(buf, FIRST_ATTRIBUTE_OFFSET)? as usize;
        loop {
            if pos + 4 > buf.len() {
                log::warn!("ntfs: {} has no end-of-attributes marker", record.reference());
                return Err(NtfsError::CorruptData("attributes run past end of record"));
            }
            match AttributeRecord::from_bytes(&buf[pos..])? {
                Some((attr, len)) => {
                    record.attributes.push(attr);
                    pos += len;
                }
                None => break,
            }
        }
        Ok(record)
    }

    fn write_body(&self, buf: &mut [u8]) -> NtfsResult<u16> {
        let real_size = self.real_size();
        if real_size > buf.len() || real_size > self.allocated_size as usize {
            return Err(NtfsError::NoSpace);
        }
        buf.fill(0);

        let first = self.first_attribute_offset();
        write_u64(buf, LSN_OFFSET, self.lsn);
        write_u16(buf, SEQUENCE_OFFSET, self.sequence_number);
        write_u16(buf, HARD_LINKS_OFFSET, self.hard_link_count);
        write_u16(buf, FIRST_ATTRIBUTE_OFFSET, first as u16);
        write_u16(buf, FLAGS_OFFSET, self.flags.bits());
        write_u32(buf, REAL_SIZE_OFFSET, real_size as u32);
        write_u32(buf, ALLOCATED_SIZE_OFFSET, self.allocated_size);
        buf[BASE_FILE_OFFSET..BASE_FILE_OFFSET + 8].copy_from_slice(&self.base_file.to_bytes());
        write_u16(buf, NEXT_ATTR_ID_OFFSET, self.next_attribute_id);
        write_u32(buf, INDEX_OFFSET, self.index);

        let mut pos = first;
        for attr in &self.attributes {
            pos += attr.write_to(&mut buf[pos..])?;
        }
        write_u32(buf, pos, AttributeType::END.0);
        Ok(USA_OFFSET as u16)
    }
}
