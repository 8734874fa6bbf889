use crate::codec::{read_u32, read_u8, write_u32};
use crate::error::{NtfsError, NtfsResult};

/// Describes the entry area of one index node. Offsets are relative to the
/// start of the header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexHeader {
    pub offset_to_first_entry: u32,
    /// End of the last entry
    pub total_size_of_entries: u32,
    pub allocated_size_of_entries: u32,
    pub has_children: bool,
}

impl IndexHeader {
    pub const SIZE: usize = 0x10;

    pub fn new(allocated_size: u32) -> Self {
        Self {
            offset_to_first_entry: Self::SIZE as u32,
            total_size_of_entries: Self::SIZE as u32,
            allocated_size_of_entries: allocated_size,
            has_children: false,
        }
    }

    pub fn read(buf: &[u8]) -> NtfsResult<Self> {
        let header = Self {
            offset_to_first_entry: read_u32(buf, 0x00)?,
            total_size_of_entries: read_u32(buf, 0x04)?,
            allocated_size_of_entries: read_u32(buf, 0x08)?,
            has_children: read_u8(buf, 0x0C)? & 0x01 != 0,
        };
        if (header.offset_to_first_entry as usize) < Self::SIZE
            || header.offset_to_first_entry > header.total_size_of_entries
        {
            return Err(NtfsError::CorruptData("index header entry offsets"));
        }
        Ok(header)
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        write_u32(buf, 0x00, self.offset_to_first_entry);
        write_u32(buf, 0x04, self.total_size_of_entries);
        write_u32(buf, 0x08, self.allocated_size_of_entries);
        buf[0x0C] = self.has_children as u8;
        buf[0x0D..0x10].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_bytes() {
        let header = IndexHeader {
            offset_to_first_entry: 0x10,
            total_size_of_entries: 0x40,
            allocated_size_of_entries: 0x40,
            has_children: false,
        };
        let mut buf = [0xAAu8; 16];
        header.write_to(&mut buf);
        assert_eq!(
            buf,
            [0x10, 0, 0, 0, 0x40, 0, 0, 0, 0x40, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(IndexHeader::read(&buf).unwrap(), header);
    }

    #[test]
    fn test_first_entry_inside_header() {
        let mut buf = [0u8; 16];
        IndexHeader::new(0x40).write_to(&mut buf);
        buf[0] = 0x08;
        assert!(IndexHeader::read(&buf).is_err());
    }
}
