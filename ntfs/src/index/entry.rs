use alloc::vec::Vec;

use crate::codec::{read_i64, read_u16, round_up, write_i64, write_u16};
use crate::error::{NtfsError, NtfsResult};
use crate::file_ref::FileRecordReference;

const ENTRY_HEADER: usize = 0x10;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IndexEntryFlags: u16 {
        /// Entry carries a child node VCN in its last 8 bytes
        const NODE = 0x01;
        /// Last entry of a node; carries no key
        const END = 0x02;
    }
}

/// One key/value entry of an index node.
///
/// In file-name indexes (`$I30`) the value is the 8-byte file reference,
/// stored in the entry header instead of after the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    is_file: bool,
    is_end: bool,
    key: Vec<u8>,
    data: Vec<u8>,
    child: Option<i64>,
}

impl IndexEntry {
    pub fn new(key: Vec<u8>, data: Vec<u8>, is_file: bool) -> NtfsResult<Self> {
        if is_file && data.len() != FileRecordReference::SIZE {
            return Err(NtfsError::InvalidParameter("file index value must be a file reference"));
        }
        if key.len() > u16::MAX as usize || data.len() > u16::MAX as usize {
            return Err(NtfsError::InvalidParameter("index entry too large"));
        }
        Ok(Self { is_file, is_end: false, key, data, child: None })
    }

    /// Terminating entry of a node.
    pub fn end(is_file: bool) -> Self {
        Self { is_file, is_end: true, key: Vec::new(), data: Vec::new(), child: None }
    }

    pub fn is_end(&self) -> bool {
        self.is_end
    }

    pub fn flags(&self) -> IndexEntryFlags {
        let mut flags = IndexEntryFlags::empty();
        flags.set(IndexEntryFlags::END, self.is_end);
        flags.set(IndexEntryFlags::NODE, self.child.is_some());
        flags
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    pub fn child_vcn(&self) -> Option<i64> {
        self.child
    }

    pub fn set_child_vcn(&mut self, vcn: Option<i64>) {
        self.child = vcn;
    }

    pub fn size(&self) -> usize {
        let mut size = ENTRY_HEADER;
        if !self.is_end {
            size += self.key.len();
            if !self.is_file {
                size += self.data.len();
            }
        }
        size = round_up(size, 8);
        if self.child.is_some() {
            size += 8;
        }
        size
    }

    /// Decode the entry at the start of `buf`, returning it and its length.
    pub fn read(buf: &[u8], is_file: bool) -> NtfsResult<(Self, usize)> {
        let length = read_u16(buf, 0x08)? as usize;
        if length < ENTRY_HEADER {
            return Err(NtfsError::TruncatedRecord { declared: length, minimum: ENTRY_HEADER });
        }
        if length > buf.len() {
            return Err(NtfsError::CorruptData("index entry beyond end of node"));
        }
        let entry = &buf[..length];
        let key_len = read_u16(entry, 0x0A)? as usize;
        let flags = IndexEntryFlags::from_bits_retain(read_u16(entry, 0x0C)?);
        let is_end = flags.contains(IndexEntryFlags::END);

        let (child, body_end) = if flags.contains(IndexEntryFlags::NODE) {
            if length < ENTRY_HEADER + 8 {
                return Err(NtfsError::TruncatedRecord { declared: length, minimum: ENTRY_HEADER + 8 });
            }
            (Some(read_i64(entry, length - 8)?), length - 8)
        } else {
            (None, length)
        };

        let (key, data) = if is_end {
            (Vec::new(), Vec::new())
        } else {
            if ENTRY_HEADER + key_len > body_end {
                return Err(NtfsError::CorruptData("index key beyond entry"));
            }
            let key = entry[ENTRY_HEADER..ENTRY_HEADER + key_len].to_vec();
            let data = if is_file {
                entry[..FileRecordReference::SIZE].to_vec()
            } else {
                let off = read_u16(entry, 0x00)? as usize;
                let len = read_u16(entry, 0x02)? as usize;
                if off + len > body_end {
                    return Err(NtfsError::CorruptData("index data beyond entry"));
                }
                entry[off..off + len].to_vec()
            };
            (key, data)
        };

        Ok((Self { is_file, is_end, key, data, child }, length))
    }

    /// Encode into `buf`, returning the bytes written.
    pub fn write_to(&self, buf: &mut [u8]) -> NtfsResult<usize> {
        let size = self.size();
        if buf.len() < size {
            return Err(NtfsError::InvalidParameter("buffer too small for index entry"));
        }
        let buf = &mut buf[..size];
        buf.fill(0);

        let key_len = if self.is_end { 0 } else { self.key.len() };
        if !self.is_end {
            if self.is_file {
                buf[..FileRecordReference::SIZE].copy_from_slice(&self.data);
            } else {
                write_u16(buf, 0x00, (ENTRY_HEADER + key_len) as u16);
                write_u16(buf, 0x02, self.data.len() as u16);
            }
        }
        write_u16(buf, 0x08, size as u16);
        write_u16(buf, 0x0A, key_len as u16);
        write_u16(buf, 0x0C, self.flags().bits());

        if !self.is_end {
            buf[ENTRY_HEADER..ENTRY_HEADER + key_len].copy_from_slice(&self.key);
            if !self.is_file {
                let off = ENTRY_HEADER + key_len;
                buf[off..off + self.data.len()].copy_from_slice(&self.data);
            }
        }
        if let Some(vcn) = self.child {
            write_i64(buf, size - 8, vcn);
        }
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_view_entry_layout() {
        let mut e = IndexEntry::new(vec![1, 2, 3, 4], vec![9, 9], false).unwrap();
        e.set_child_vcn(Some(7));
        // 0x10 + 4 + 2 -> 0x18, plus the child vcn
        assert_eq!(e.size(), 0x20);

        let mut buf = vec![0u8; 0x20];
        e.write_to(&mut buf).unwrap();
        assert_eq!(read_u16(&buf, 0x00).unwrap(), 0x14);
        assert_eq!(read_u16(&buf, 0x0C).unwrap(), 0x01);
        assert_eq!(read_i64(&buf, 0x18).unwrap(), 7);

        let (back, len) = IndexEntry::read(&buf, false).unwrap();
        assert_eq!(len, 0x20);
        assert_eq!(back, e);
    }

    #[test]
    fn test_file_entry_keeps_reference_in_header() {
        let fref = FileRecordReference::new(12345, 7);
        let e = IndexEntry::new(vec![0xAB; 0x44], fref.to_bytes().to_vec(), true).unwrap();
        assert_eq!(e.size(), 0x58);
        let mut buf = vec![0u8; e.size()];
        e.write_to(&mut buf).unwrap();
        assert_eq!(FileRecordReference::read(&buf, 0).unwrap(), fref);

        let (back, _) = IndexEntry::read(&buf, true).unwrap();
        assert_eq!(back.data(), &fref.to_bytes());
        assert!(IndexEntry::new(vec![1], vec![1, 2], true).is_err());
    }

    #[test]
    fn test_end_entry() {
        let mut end = IndexEntry::end(false);
        assert_eq!(end.size(), 0x10);
        end.set_child_vcn(Some(3));
        assert_eq!(end.flags(), IndexEntryFlags::END | IndexEntryFlags::NODE);

        let mut buf = vec![0u8; 0x18];
        end.write_to(&mut buf).unwrap();
        let (back, len) = IndexEntry::read(&buf, false).unwrap();
        assert_eq!(len, 0x18);
        assert!(back.is_end());
        assert_eq!(back.child_vcn(), Some(3));
    }

    #[test]
    fn test_malformed_entries() {
        let e = IndexEntry::new(vec![1; 8], vec![2; 8], false).unwrap();
        let mut buf = vec![0u8; e.size()];
        e.write_to(&mut buf).unwrap();

        let mut short = buf.clone();
        write_u16(&mut short, 0x08, 0x08);
        assert_eq!(
            IndexEntry::read(&short, false),
            Err(NtfsError::TruncatedRecord { declared: 8, minimum: 0x10 })
        );

        let mut long_key = buf.clone();
        write_u16(&mut long_key, 0x0A, 0x40);
        assert!(matches!(IndexEntry::read(&long_key, false), Err(NtfsError::CorruptData(_))));
    }
}
