//! MFT file references.

use core::fmt;

use crate::error::NtfsResult;

const INDEX_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// A 64-bit file reference: 48-bit MFT record index plus a 16-bit sequence
/// number guarding against reuse of the record.
///
/// Ordering and equality follow the raw 64-bit value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileRecordReference(u64);

impl FileRecordReference {
    pub const SIZE: usize = 8;

    pub fn new(mft_index: u64, sequence_number: u16) -> Self {
        debug_assert!(mft_index <= INDEX_MASK);
        Self((mft_index & INDEX_MASK) | ((sequence_number as u64) << 48))
    }

    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn mft_index(&self) -> u64 {
        self.0 & INDEX_MASK
    }

    pub fn sequence_number(&self) -> u16 {
        (self.0 >> 48) as u16
    }

    /// Sequence number zero never names a live record.
    pub fn is_null(&self) -> bool {
        self.sequence_number() == 0
    }

    pub fn read(buf: &[u8], off: usize) -> NtfsResult<Self> {
        Ok(Self(crate::codec::read_u64(buf, off)?))
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for FileRecordReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MFT:{} (ver: {})", self.mft_index(), self.sequence_number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_index_and_sequence() {
        let r = FileRecordReference::new(12345, 7);
        assert_eq!(r.mft_index(), 12345);
        assert_eq!(r.sequence_number(), 7);
        assert!(!r.is_null());
        assert_eq!(r.to_string(), "MFT:12345 (ver: 7)");
    }

    #[test]
    fn test_sequence_zero_is_null() {
        assert!(FileRecordReference::new(12345, 0).is_null());
        assert!(FileRecordReference::default().is_null());
    }

    #[test]
    fn test_raw_bytes() {
        let r = FileRecordReference::new(5, 5);
        let bytes = r.to_bytes();
        assert_eq!(bytes, [5, 0, 0, 0, 0, 0, 5, 0]);
        assert_eq!(FileRecordReference::read(&bytes, 0).unwrap(), r);
        assert!(FileRecordReference::read(&bytes, 1).is_err());
    }
}
