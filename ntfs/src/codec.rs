//! Little-endian field access, variable-length integers and UTF-16 names.

use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;

use crate::error::{NtfsError, NtfsResult};

// ============================================================================
// Fixed-width fields
// ============================================================================

fn field<const N: usize>(buf: &[u8], off: usize) -> NtfsResult<[u8; N]> {
    off.checked_add(N)
        .and_then(|end| buf.get(off..end))
        .and_then(|s| s.try_into().ok())
        .ok_or(NtfsError::CorruptData("field beyond end of buffer"))
}

pub fn read_u8(buf: &[u8], off: usize) -> NtfsResult<u8> {
    Ok(field::<1>(buf, off)?[0])
}

pub fn read_u16(buf: &[u8], off: usize) -> NtfsResult<u16> {
    Ok(u16::from_le_bytes(field(buf, off)?))
}

pub fn read_u32(buf: &[u8], off: usize) -> NtfsResult<u32> {
    Ok(u32::from_le_bytes(field(buf, off)?))
}

pub fn read_u64(buf: &[u8], off: usize) -> NtfsResult<u64> {
    Ok(u64::from_le_bytes(field(buf, off)?))
}

pub fn read_i64(buf: &[u8], off: usize) -> NtfsResult<i64> {
    Ok(i64::from_le_bytes(field(buf, off)?))
}

pub fn write_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

pub fn write_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

pub fn write_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

pub fn write_i64(buf: &mut [u8], off: usize, v: i64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

pub const fn round_up(v: usize, align: usize) -> usize {
    (v + align - 1) / align * align
}

// ============================================================================
// Variable-length signed integers (data run fields)
// ============================================================================

/// Minimal number of bytes needed to hold `v` in two's complement,
/// sign bit included. Zero needs none.
pub fn var_len(v: i64) -> usize {
    if v == 0 {
        return 0;
    }
    let mut len = 8;
    while len > 1 {
        let shift = (len - 1) * 8;
        let top = v >> (shift - 1);
        // the remaining high bytes plus the next sign bit are all copies of the sign
        if top != 0 && top != -1 {
            break;
        }
        len -= 1;
    }
    len
}

/// Write `v` into `buf` using exactly `len` bytes.
pub fn write_var(buf: &mut [u8], v: i64, len: usize) {
    let bytes = v.to_le_bytes();
    buf[..len].copy_from_slice(&bytes[..len]);
}

/// Decode a sign-extended little-endian integer of 0 to 8 bytes.
pub fn read_var(bytes: &[u8]) -> NtfsResult<i64> {
    match bytes.len() {
        0 => Ok(0),
        len @ 1..=8 => {
            let fill = if bytes[len - 1] & 0x80 != 0 { 0xFF } else { 0x00 };
            let mut raw = [fill; 8];
            raw[..len].copy_from_slice(bytes);
            Ok(i64::from_le_bytes(raw))
        }
        _ => Err(NtfsError::CorruptData("variable-length integer wider than 8 bytes")),
    }
}

// ============================================================================
// UTF-16 names
// ============================================================================

/// Decode `units` UTF-16LE code units at `off`. Names with unpaired
/// surrogates are rejected, since a lossy decode would not encode back to
/// the same units.
pub fn read_utf16(buf: &[u8], off: usize, units: usize) -> NtfsResult<String> {
    let end = off
        .checked_add(units * 2)
        .filter(|&e| e <= buf.len())
        .ok_or(NtfsError::CorruptData("name beyond end of buffer"))?;
    let chars: Vec<u16> = buf[off..end]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&chars).map_err(|_| {
        log::warn!("ntfs: name with unpaired surrogate at offset {:#x}", off);
        NtfsError::CorruptData("name is not valid UTF-16")
    })
}

/// Encode `s` as UTF-16LE at `off`, returning the number of bytes written.
pub fn write_utf16(buf: &mut [u8], off: usize, s: &str) -> usize {
    let mut pos = off;
    for unit in s.encode_utf16() {
        buf[pos..pos + 2].copy_from_slice(&unit.to_le_bytes());
        pos += 2;
    }
    pos - off
}

pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Ordinal case-insensitive comparison of optional names. A missing name
/// sorts before any present one.
pub fn compare_names(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let upper = |s: &str| -> Vec<u16> {
                s.encode_utf16().map(upcase_unit).collect()
            };
            upper(a).cmp(&upper(b))
        }
    }
}

/// Simple one-to-one upper-casing of a UTF-16 code unit.
pub fn upcase_unit(unit: u16) -> u16 {
    let Some(c) = char::from_u32(unit as u32) else {
        return unit;
    };
    let mut up = c.to_uppercase();
    match (up.next(), up.next()) {
        (Some(u), None) if (u as u32) <= 0xFFFF => u as u32 as u16,
        _ => unit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(v: i64) -> Vec<u8> {
        let len = var_len(v);
        let mut buf = [0u8; 8];
        write_var(&mut buf, v, len);
        buf[..len].to_vec()
    }

    #[test]
    fn test_var_len_boundaries() {
        assert_eq!(encoded(0), Vec::<u8>::new());
        assert_eq!(encoded(127), [0x7F]);
        assert_eq!(encoded(-128), [0x80]);
        assert_eq!(encoded(-1), [0xFF]);
        assert_eq!(encoded(128), [0x80, 0x00]);
        assert_eq!(encoded(-129), [0x7F, 0xFF]);
        assert_eq!(var_len(i64::MAX), 8);
        assert_eq!(var_len(i64::MIN), 8);
    }

    #[test]
    fn test_var_decode_boundaries() {
        for v in [0, 1, 127, 128, -1, -128, -129, 0x7FFF, 0x8000, i64::MAX, i64::MIN] {
            assert_eq!(read_var(&encoded(v)).unwrap(), v, "value {}", v);
        }
        assert!(read_var(&[0u8; 9]).is_err());
    }

    #[test]
    fn test_fields_bounds_checked() {
        let buf = [0x34, 0x12, 0x78, 0x56];
        assert_eq!(read_u16(&buf, 0).unwrap(), 0x1234);
        assert_eq!(read_u32(&buf, 0).unwrap(), 0x5678_1234);
        assert!(read_u32(&buf, 1).is_err());
        assert!(read_u64(&buf, usize::MAX).is_err());
    }

    #[test]
    fn test_utf16_names() {
        let mut buf = [0u8; 16];
        assert_eq!(write_utf16(&mut buf, 2, "$I30"), 8);
        assert_eq!(read_utf16(&buf, 2, 4).unwrap(), "$I30");
        assert!(read_utf16(&buf, 10, 4).is_err());
    }

    #[test]
    fn test_unpaired_surrogate_is_corrupt() {
        // "a", lone high surrogate, "b"
        let buf = [0x61, 0x00, 0x00, 0xD8, 0x62, 0x00];
        assert_eq!(
            read_utf16(&buf, 0, 3),
            Err(NtfsError::CorruptData("name is not valid UTF-16"))
        );
        // a proper pair decodes to one char
        let pair = [0x3D, 0xD8, 0x00, 0xDE];
        assert_eq!(read_utf16(&pair, 0, 2).unwrap(), "\u{1F600}");
    }

    #[test]
    fn test_compare_names_ignores_case() {
        assert_eq!(compare_names(Some("abc"), Some("ABC")), Ordering::Equal);
        assert_eq!(compare_names(Some("a"), Some("B")), Ordering::Less);
        assert_eq!(compare_names(None, Some("")), Ordering::Less);
        assert_eq!(compare_names(None, None), Ordering::Equal);
    }
}
