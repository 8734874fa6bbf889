//! `INDX` records: external index nodes stored in `$INDEX_ALLOCATION`.

use super::header::IndexHeader;
use super::node::IndexNode;
use crate::codec::{read_i64, read_u64, round_up, write_i64, write_u64};
use crate::error::{NtfsError, NtfsResult};
use crate::fixup::{FixupHeader, FixupRecord};

const LSN_OFFSET: usize = 0x08;
const VCN_OFFSET: usize = 0x10;
const NODE_OFFSET: usize = 0x18;
const USA_OFFSET: usize = 0x28;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBlock {
    fixup: FixupHeader,
    pub lsn: u64,
    vcn: i64,
    node: IndexNode,
}

impl IndexBlock {
    /// Empty block of `buffer_size` bytes at `vcn`.
    pub fn new(vcn: i64, buffer_size: usize, is_file: bool) -> Self {
        Self {
            fixup: FixupHeader::new(Self::MAGIC, buffer_size),
            lsn: 0,
            vcn,
            node: IndexNode::new((buffer_size - NODE_OFFSET) as u32, is_file),
        }
    }

    pub fn vcn(&self) -> i64 {
        self.vcn
    }

    pub fn node(&self) -> &IndexNode {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut IndexNode {
        &mut self.node
    }

    /// Entry offset relative to the node header: the update sequence array
    /// sits between the header and the first entry.
    pub fn first_entry_offset(&self) -> usize {
        round_up(USA_OFFSET - NODE_OFFSET + self.fixup.update_sequence_size(), 8)
    }

    /// Room left for entries, negative when the node has overflowed.
    pub fn space_free(&self) -> isize {
        self.node.space_free(self.first_entry_offset())
    }
}

impl FixupRecord for IndexBlock {
    const MAGIC: [u8; 4] = *b"INDX";
    /// Whether the block belongs to a file-name index
    type Context = bool;

    fn fixup(&self) -> &FixupHeader {
        &self.fixup
    }

    fn fixup_mut(&mut self) -> &mut FixupHeader {
        &mut self.fixup
    }

    fn read_body(fixup: FixupHeader, buf: &[u8], is_file: bool) -> NtfsResult<Self> {
        if buf.len() < NODE_OFFSET + IndexHeader::SIZE {
            return Err(NtfsError::TruncatedRecord {
                declared: buf.len(),
                minimum: NODE_OFFSET + IndexHeader::SIZE,
            });
        }
        let node = IndexNode::read(&buf[NODE_OFFSET..], is_file)?;
        if node.allocated_size() as usize > buf.len() - NODE_OFFSET {
            return Err(NtfsError::CorruptData("index block allocation beyond buffer"));
        }
        Ok(Self {
            lsn: read_u64(buf, LSN_OFFSET)?,
            vcn: read_i64(buf, VCN_OFFSET)?,
            node,
            fixup,
        })
    }

    fn write_body(&self, buf: &mut [u8]) -> NtfsResult<u16> {
        if self.space_free() < 0 || buf.len() < NODE_OFFSET + self.node.allocated_size() as usize {
            return Err(NtfsError::NoSpace);
        }
        buf.fill(0);
        write_u64(buf, LSN_OFFSET, self.lsn);
        write_i64(buf, VCN_OFFSET, self.vcn);
        self.node
            .write_to(&mut buf[NODE_OFFSET..], self.first_entry_offset())?;
        Ok(USA_OFFSET as u16)
    }
}
