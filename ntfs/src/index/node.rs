use alloc::vec;
use alloc::vec::Vec;

use super::entry::IndexEntry;
use super::header::IndexHeader;
use crate::error::{NtfsError, NtfsResult};

/// Ordered entries of one node, always terminated by a single End entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNode {
    allocated_size: u32,
    entries: Vec<IndexEntry>,
}

impl IndexNode {
    pub fn new(allocated_size: u32, is_file: bool) -> Self {
        Self {
            allocated_size,
            entries: vec![IndexEntry::end(is_file)],
        }
    }

    /// Decode a node whose `IndexHeader` starts at `buf[0]`.
    pub fn read(buf: &[u8], is_file: bool) -> NtfsResult<Self> {
        let header = IndexHeader::read(buf)?;
        let total = header.total_size_of_entries as usize;
        if total > buf.len() {
            return Err(NtfsError::CorruptData("index entries beyond end of node"));
        }

        let mut entries = Vec::new();
        let mut pos = header.offset_to_first_entry as usize;
        while pos < total {
            let (entry, len) = IndexEntry::read(&buf[pos..total], is_file)?;
            let is_end = entry.is_end();
            entries.push(entry);
            if is_end {
                return Ok(Self { allocated_size: header.allocated_size_of_entries, entries });
            }
            pos += len;
        }
        log::warn!("ntfs: index node without end entry");
        Err(NtfsError::CorruptData("index node without end entry"))
    }

    pub fn allocated_size(&self) -> u32 {
        self.allocated_size
    }

    pub fn set_allocated_size(&mut self, size: u32) {
        self.allocated_size = size;
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut Vec<IndexEntry> {
        &mut self.entries
    }

    /// Entries other than the End marker.
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_children(&self) -> bool {
        self.entries.iter().any(|e| e.child_vcn().is_some())
    }

    pub fn entries_size(&self) -> usize {
        self.entries.iter().map(IndexEntry::size).sum()
    }

    /// Bytes from the header to the end of the last entry.
    pub fn size(&self, first_entry_offset: usize) -> usize {
        first_entry_offset + self.entries_size()
    }

    /// Room left in the allocation, negative when overfull.
    pub fn space_free(&self, first_entry_offset: usize) -> isize {
        self.allocated_size as isize - self.size(first_entry_offset) as isize
    }

    pub fn header(&self, first_entry_offset: usize) -> IndexHeader {
        IndexHeader {
            offset_to_first_entry: first_entry_offset as u32,
            total_size_of_entries: self.size(first_entry_offset) as u32,
            allocated_size_of_entries: self.allocated_size,
            has_children: self.has_children(),
        }
    }

    /// Encode the header and entries, returning the bytes written.
    pub fn write_to(&self, buf: &mut [u8], first_entry_offset: usize) -> NtfsResult<usize> {
        let total = self.size(first_entry_offset);
        if buf.len() < total {
            return Err(NtfsError::NoSpace);
        }
        self.header(first_entry_offset).write_to(buf);
        buf[IndexHeader::SIZE..first_entry_offset].fill(0);
        let mut pos = first_entry_offset;
        for entry in &self.entries {
            pos += entry.write_to(&mut buf[pos..])?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_node() {
        let node = IndexNode::new(0x100, false);
        assert!(node.is_empty());
        assert_eq!(node.size(IndexHeader::SIZE), 0x20);
        assert_eq!(node.space_free(IndexHeader::SIZE), 0xE0);
    }

    #[test]
    fn test_node_round_trip() {
        let mut node = IndexNode::new(0x100, false);
        node.entries_mut()
            .insert(0, IndexEntry::new(vec![5, 0, 0, 0], vec![1], false).unwrap());
        node.entries_mut()
            .insert(0, IndexEntry::new(vec![1, 0, 0, 0], vec![2], false).unwrap());

        let mut buf = vec![0u8; 0x100];
        let written = node.write_to(&mut buf, 0x28).unwrap();
        assert_eq!(written, 0x28 + 0x18 + 0x18 + 0x10);

        let back = IndexNode::read(&buf, false).unwrap();
        assert_eq!(back, node);
        assert_eq!(back.len(), 2);
        assert!(!back.has_children());
    }

    #[test]
    fn test_missing_end_is_corrupt() {
        let mut node = IndexNode::new(0x100, false);
        node.entries_mut()
            .insert(0, IndexEntry::new(vec![1, 0, 0, 0], vec![], false).unwrap());
        let mut buf = vec![0u8; 0x100];
        node.write_to(&mut buf, 0x10).unwrap();
        // cut the node before its end entry
        crate::codec::write_u32(&mut buf, 0x04, 0x10 + 0x18);
        assert!(matches!(IndexNode::read(&buf, false), Err(NtfsError::CorruptData(_))));
    }
}
