//! Update sequence (fixup) protection for multi-sector records.
//!
//! Before a record is written, the last two bytes of every 512-byte stride are
//! saved into the update sequence array and replaced by the update sequence
//! number (USN). A torn write leaves some stride with a stale USN, which the
//! reader detects before restoring the saved bytes.

use alloc::vec;
use alloc::vec::Vec;

use crate::codec::{read_u16, write_u16};
use crate::error::{NtfsError, NtfsResult};
use crate::params::FIXUP_STRIDE;

/// Common header of `FILE` and `INDX` records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixupHeader {
    magic: [u8; 4],
    usa_offset: u16,
    usn: u16,
    /// Saved tail of each stride
    array: Vec<u16>,
}

impl FixupHeader {
    pub fn new(magic: [u8; 4], record_len: usize) -> Self {
        let strides = (record_len + FIXUP_STRIDE - 1) / FIXUP_STRIDE;
        Self {
            magic,
            usa_offset: 0,
            usn: 1,
            array: vec![0; strides],
        }
    }

    pub fn magic(&self) -> [u8; 4] {
        self.magic
    }

    pub fn update_sequence_offset(&self) -> u16 {
        self.usa_offset
    }

    pub fn update_sequence_number(&self) -> u16 {
        self.usn
    }

    /// Entries in the update sequence array, the USN itself included.
    pub fn update_sequence_count(&self) -> u16 {
        (self.array.len() + 1) as u16
    }

    /// Bytes the update sequence array occupies in the record.
    pub fn update_sequence_size(&self) -> usize {
        self.update_sequence_count() as usize * 2
    }

    /// Verify and strip the fixups of `buf` in place.
    pub fn unprotect(buf: &mut [u8], magic: &[u8; 4]) -> NtfsResult<Self> {
        if buf.len() < 8 {
            return Err(NtfsError::CorruptData("record shorter than fixup header"));
        }
        if &buf[0..4] != magic {
            return Err(NtfsError::BadMagic);
        }

        let usa_offset = read_u16(buf, 0x04)?;
        let count = read_u16(buf, 0x06)? as usize;
        if count == 0 {
            return Err(NtfsError::CorruptData("empty update sequence array"));
        }
        if usa_offset as usize + count * 2 > buf.len() {
            return Err(NtfsError::CorruptData("update sequence array beyond record"));
        }
        let strides = count - 1;
        if strides * FIXUP_STRIDE > buf.len() {
            return Err(NtfsError::CorruptData("update sequence covers more than the record"));
        }

        let usn = read_u16(buf, usa_offset as usize)?;
        for i in 0..strides {
            let tail = (i + 1) * FIXUP_STRIDE - 2;
            if read_u16(buf, tail)? != usn {
                log::warn!("ntfs: fixup mismatch at sector {}", i);
                return Err(NtfsError::FixupMismatch { sector: i });
            }
        }

        let mut array = Vec::with_capacity(strides);
        for i in 0..strides {
            let saved = read_u16(buf, usa_offset as usize + 2 * (i + 1))?;
            write_u16(buf, (i + 1) * FIXUP_STRIDE - 2, saved);
            array.push(saved);
        }

        Ok(Self {
            magic: *magic,
            usa_offset,
            usn,
            array,
        })
    }

    /// Stamp a fresh USN over every stride of `buf` and write the header.
    pub fn protect(&mut self, buf: &mut [u8], usa_offset: u16) -> NtfsResult<()> {
        let strides = self.array.len();
        if strides * FIXUP_STRIDE > buf.len() {
            return Err(NtfsError::InvalidParameter("buffer shorter than the protected record"));
        }
        if usa_offset as usize + self.update_sequence_size() > buf.len().min(FIXUP_STRIDE - 2) {
            return Err(NtfsError::InvalidParameter("update sequence array overlaps first stride tail"));
        }

        self.usa_offset = usa_offset;
        self.usn = match self.usn.wrapping_add(1) {
            0 => 1,
            n => n,
        };

        for i in 0..strides {
            let tail = (i + 1) * FIXUP_STRIDE - 2;
            self.array[i] = u16::from_le_bytes([buf[tail], buf[tail + 1]]);
            write_u16(buf, tail, self.usn);
        }

        buf[0..4].copy_from_slice(&self.magic);
        write_u16(buf, 0x04, self.usa_offset);
        write_u16(buf, 0x06, self.update_sequence_count());
        let base = self.usa_offset as usize;
        write_u16(buf, base, self.usn);
        for (i, saved) in self.array.iter().enumerate() {
            write_u16(buf, base + 2 * (i + 1), *saved);
        }
        Ok(())
    }
}

/// A record protected by an update sequence array.
pub trait FixupRecord: Sized {
    const MAGIC: [u8; 4];

    /// Extra information needed to parse the body.
    type Context: Copy;

    fn fixup(&self) -> &FixupHeader;

    fn fixup_mut(&mut self) -> &mut FixupHeader;

    /// Parse the body of a record whose fixups have already been removed.
    fn read_body(fixup: FixupHeader, buf: &[u8], ctx: Self::Context) -> NtfsResult<Self>;

    /// Serialize the body. Returns the offset of the update sequence array.
    fn write_body(&self, buf: &mut [u8]) -> NtfsResult<u16>;

    fn from_bytes(buf: &[u8], ctx: Self::Context) -> NtfsResult<Self> {
        let mut plain = buf.to_vec();
        let fixup = FixupHeader::unprotect(&mut plain, &Self::MAGIC)?;
        Self::read_body(fixup, &plain, ctx)
    }

    fn to_bytes(&mut self, buf: &mut [u8]) -> NtfsResult<()> {
        let usa_offset = self.write_body(buf)?;
        self.fixup_mut().protect(buf, usa_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Blob {
        fixup: FixupHeader,
        payload: Vec<u8>,
    }

    impl FixupRecord for Blob {
        const MAGIC: [u8; 4] = *b"BLOB";
        type Context = ();

        fn fixup(&self) -> &FixupHeader {
            &self.fixup
        }

        fn fixup_mut(&mut self) -> &mut FixupHeader {
            &mut self.fixup
        }

        fn read_body(fixup: FixupHeader, buf: &[u8], _: ()) -> NtfsResult<Self> {
            Ok(Self { fixup, payload: buf[0x10..].to_vec() })
        }

        fn write_body(&self, buf: &mut [u8]) -> NtfsResult<u16> {
            buf[0x10..].copy_from_slice(&self.payload);
            Ok(0x08)
        }
    }

    fn blob() -> Blob {
        let payload = (0..1024 - 0x10).map(|i| (i * 7) as u8).collect();
        Blob { fixup: FixupHeader::new(Blob::MAGIC, 1024), payload }
    }

    #[test]
    fn test_round_trip_restores_payload() {
        let mut b = blob();
        let mut buf = vec![0u8; 1024];
        b.to_bytes(&mut buf).unwrap();
        assert_eq!(b.fixup().update_sequence_number(), 2);
        assert_eq!(b.fixup().update_sequence_count(), 3);
        // stride tails now carry the USN
        assert_eq!(read_u16(&buf, 510).unwrap(), 2);
        assert_eq!(read_u16(&buf, 1022).unwrap(), 2);

        let back = Blob::from_bytes(&buf, ()).unwrap();
        assert_eq!(back.payload, b.payload);
        assert_eq!(back.fixup().update_sequence_offset(), 0x08);
    }

    #[test]
    fn test_tampered_stride_detected() {
        let mut b = blob();
        let mut buf = vec![0u8; 1024];
        b.to_bytes(&mut buf).unwrap();
        buf[1022] ^= 0xFF;
        assert_eq!(
            Blob::from_bytes(&buf, ()).err(),
            Some(NtfsError::FixupMismatch { sector: 1 })
        );
    }

    #[test]
    fn test_bad_magic_and_header() {
        let mut b = blob();
        let mut buf = vec![0u8; 1024];
        b.to_bytes(&mut buf).unwrap();

        let mut wrong = buf.clone();
        wrong[0] = b'X';
        assert_eq!(Blob::from_bytes(&wrong, ()).err(), Some(NtfsError::BadMagic));

        let mut huge = buf.clone();
        write_u16(&mut huge, 0x06, 9);
        assert!(matches!(Blob::from_bytes(&huge, ()), Err(NtfsError::CorruptData(_))));
    }

    #[test]
    fn test_usn_increments_per_write() {
        let mut b = blob();
        let mut buf = vec![0u8; 1024];
        b.to_bytes(&mut buf).unwrap();
        b.to_bytes(&mut buf).unwrap();
        assert_eq!(b.fixup().update_sequence_number(), 3);
    }
}
