use alloc::vec;
use alloc::vec::Vec;

use super::collation::CollationRule;
use super::header::IndexHeader;
use super::node::IndexNode;
use crate::attribute::AttributeType;
use crate::codec::{read_u32, read_u8, write_u32};
use crate::error::{NtfsError, NtfsResult};

/// `$INDEX_ROOT` value: index parameters followed by the resident root node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRoot {
    /// Type of the attribute being indexed (`$FILE_NAME` for directories,
    /// zero for view indexes)
    pub attr_type: AttributeType,
    pub collation: CollationRule,
    pub index_allocation_size: u32,
    pub raw_clusters_per_index_record: i8,
    node: IndexNode,
}

impl IndexRoot {
    pub const HEADER_OFFSET: usize = 0x10;

    pub fn new(
        attr_type: AttributeType,
        collation: CollationRule,
        index_allocation_size: u32,
        raw_clusters_per_index_record: i8,
        is_file: bool,
    ) -> Self {
        let mut node = IndexNode::new(0, is_file);
        node.set_allocated_size(node.size(IndexHeader::SIZE) as u32);
        Self {
            attr_type,
            collation,
            index_allocation_size,
            raw_clusters_per_index_record,
            node,
        }
    }

    pub fn node(&self) -> &IndexNode {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut IndexNode {
        &mut self.node
    }

    /// Bytes of the serialized value.
    pub fn size(&self) -> usize {
        Self::HEADER_OFFSET + self.node.size(IndexHeader::SIZE)
    }

    pub fn read(buf: &[u8], is_file: bool) -> NtfsResult<Self> {
        if buf.len() < Self::HEADER_OFFSET + IndexHeader::SIZE {
            return Err(NtfsError::TruncatedRecord {
                declared: buf.len(),
                minimum: Self::HEADER_OFFSET + IndexHeader::SIZE,
            });
        }
        Ok(Self {
            attr_type: AttributeType(read_u32(buf, 0x00)?),
            collation: CollationRule::from_u32(read_u32(buf, 0x04)?)?,
            index_allocation_size: read_u32(buf, 0x08)?,
            raw_clusters_per_index_record: read_u8(buf, 0x0C)? as i8,
            node: IndexNode::read(&buf[Self::HEADER_OFFSET..], is_file)?,
        })
    }

    /// Serialize; the root node's allocation always matches its size.
    pub fn to_bytes(&mut self) -> NtfsResult<Vec<u8>> {
        let node_size = self.node.size(IndexHeader::SIZE);
        self.node.set_allocated_size(node_size as u32);

        let mut buf = vec![0u8; self.size()];
        write_u32(&mut buf, 0x00, self.attr_type.0);
        write_u32(&mut buf, 0x04, self.collation as u32);
        write_u32(&mut buf, 0x08, self.index_allocation_size);
        buf[0x0C] = self.raw_clusters_per_index_record as u8;
        self.node
            .write_to(&mut buf[Self::HEADER_OFFSET..], IndexHeader::SIZE)?;
        Ok(buf)
    }
}
