//! Collation rules: how index keys are ordered.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cmp::Ordering;

use crate::codec::{read_u32, read_u8, upcase_unit};
use crate::error::{NtfsError, NtfsResult};

/// Offset of the name length inside a `$FILE_NAME` key
const FILE_NAME_LENGTH: usize = 0x40;
/// Offset of the UTF-16 name inside a `$FILE_NAME` key
const FILE_NAME_CHARS: usize = 0x42;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollationRule {
    Binary = 0x00,
    Filename = 0x01,
    UnicodeString = 0x02,
    UnsignedLong = 0x10,
    Sid = 0x11,
    SecurityHash = 0x12,
    MultipleUnsignedLongs = 0x13,
}

impl CollationRule {
    pub fn from_u32(v: u32) -> NtfsResult<Self> {
        Ok(match v {
            0x00 => Self::Binary,
            0x01 => Self::Filename,
            0x02 => Self::UnicodeString,
            0x10 => Self::UnsignedLong,
            0x11 => Self::Sid,
            0x12 => Self::SecurityHash,
            0x13 => Self::MultipleUnsignedLongs,
            _ => return Err(NtfsError::CorruptData("unknown collation rule")),
        })
    }
}

// ============================================================================
// Upper-case table
// ============================================================================

/// One-to-one upper-case mapping for every UTF-16 code unit, as kept in `$UpCase`.
#[derive(Clone, PartialEq, Eq)]
pub struct UpperCase {
    table: Vec<u16>,
}

impl UpperCase {
    const UNITS: usize = 0x10000;

    /// Decode the 128 KiB `$UpCase` table.
    pub fn from_bytes(bytes: &[u8]) -> NtfsResult<Self> {
        if bytes.len() < Self::UNITS * 2 {
            return Err(NtfsError::TruncatedRecord {
                declared: bytes.len(),
                minimum: Self::UNITS * 2,
            });
        }
        let table = bytes[..Self::UNITS * 2]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(Self { table })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.table.iter().flat_map(|u| u.to_le_bytes()).collect()
    }

    pub fn upcase(&self, unit: u16) -> u16 {
        self.table[unit as usize]
    }

    /// Compare two UTF-16LE byte strings ignoring case.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let units = |s: &[u8]| -> Vec<u16> {
            s.chunks_exact(2)
                .map(|c| self.upcase(u16::from_le_bytes([c[0], c[1]])))
                .collect()
        };
        units(a).cmp(&units(b))
    }
}

impl Default for UpperCase {
    fn default() -> Self {
        Self {
            table: (0..Self::UNITS).map(|u| upcase_unit(u as u16)).collect(),
        }
    }
}

impl core::fmt::Debug for UpperCase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UpperCase").finish_non_exhaustive()
    }
}

// ============================================================================
// Collator
// ============================================================================

/// Comparer over raw key bytes for one collation rule.
#[derive(Debug, Clone)]
pub enum Collator {
    Binary,
    Filename(Arc<UpperCase>),
    UnicodeString(Arc<UpperCase>),
    UnsignedLong,
    Sid,
    SecurityHash,
    MultipleUnsignedLongs,
}

impl Collator {
    pub fn for_rule(rule: CollationRule, upcase: Arc<UpperCase>) -> Self {
        match rule {
            CollationRule::Binary => Self::Binary,
            CollationRule::Filename => Self::Filename(upcase),
            CollationRule::UnicodeString => Self::UnicodeString(upcase),
            CollationRule::UnsignedLong => Self::UnsignedLong,
            CollationRule::Sid => Self::Sid,
            CollationRule::SecurityHash => Self::SecurityHash,
            CollationRule::MultipleUnsignedLongs => Self::MultipleUnsignedLongs,
        }
    }

    pub fn compare(&self, x: &[u8], y: &[u8]) -> Ordering {
        match self {
            Self::Binary | Self::Sid => x.cmp(y),
            Self::Filename(upcase) => upcase.compare(file_name(x), file_name(y)),
            Self::UnicodeString(upcase) => upcase.compare(x, y),
            Self::UnsignedLong => u32_at(x, 0).cmp(&u32_at(y, 0)),
            Self::SecurityHash => u32_at(x, 0)
                .cmp(&u32_at(y, 0))
                .then_with(|| u32_at(x, 4).cmp(&u32_at(y, 4))),
            Self::MultipleUnsignedLongs => (0..x.len() / 4)
                .map(|i| u32_at(x, i * 4).cmp(&u32_at(y, i * 4)))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal),
        }
    }
}

fn u32_at(buf: &[u8], off: usize) -> u32 {
    read_u32(buf, off).unwrap_or(0)
}

/// Name bytes of a `$FILE_NAME` key, empty when the key is malformed.
fn file_name(key: &[u8]) -> &[u8] {
    let units = read_u8(key, FILE_NAME_LENGTH).unwrap_or(0) as usize;
    key.get(FILE_NAME_CHARS..FILE_NAME_CHARS + units * 2)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use crate::codec::write_utf16;

    fn file_name_key(name: &str) -> Vec<u8> {
        let mut key = vec![0u8; FILE_NAME_CHARS + name.len() * 2];
        key[FILE_NAME_LENGTH] = name.len() as u8;
        write_utf16(&mut key, FILE_NAME_CHARS, name);
        key
    }

    #[test]
    fn test_file_names_ignore_case() {
        let c = Collator::for_rule(CollationRule::Filename, Arc::new(UpperCase::default()));
        assert_eq!(c.compare(&file_name_key("readme.TXT"), &file_name_key("README.txt")), Ordering::Equal);
        assert_eq!(c.compare(&file_name_key("a"), &file_name_key("B")), Ordering::Less);
        assert_eq!(c.compare(&file_name_key("abc"), &file_name_key("AB")), Ordering::Greater);
    }

    #[test]
    fn test_numeric_rules() {
        let c = Collator::for_rule(CollationRule::UnsignedLong, Arc::new(UpperCase::default()));
        assert_eq!(c.compare(&256u32.to_le_bytes(), &2u32.to_le_bytes()), Ordering::Greater);

        let hash = |h: u32, id: u32| -> Vec<u8> {
            let mut k = h.to_le_bytes().to_vec();
            k.extend_from_slice(&id.to_le_bytes());
            k
        };
        let c = Collator::SecurityHash;
        assert_eq!(c.compare(&hash(1, 9), &hash(2, 0)), Ordering::Less);
        assert_eq!(c.compare(&hash(2, 9), &hash(2, 3)), Ordering::Greater);

        let c = Collator::MultipleUnsignedLongs;
        assert_eq!(c.compare(&hash(5, 1), &hash(5, 2)), Ordering::Less);
        assert_eq!(c.compare(&hash(5, 1), &hash(5, 1)), Ordering::Equal);
    }

    #[test]
    fn test_short_keys_compare_as_zero() {
        assert_eq!(Collator::UnsignedLong.compare(&[], &0u32.to_le_bytes()), Ordering::Equal);
        assert_eq!(Collator::Binary.compare(&[1], &[1, 0]), Ordering::Less);
    }

    #[test]
    fn test_upcase_table_round_trip() {
        let up = UpperCase::default();
        assert_eq!(up.upcase(b'q' as u16), b'Q' as u16);
        let back = UpperCase::from_bytes(&up.to_bytes()).unwrap();
        assert!(back == up);
        assert!(UpperCase::from_bytes(&[0; 16]).is_err());
        assert_eq!(CollationRule::from_u32(0x13).unwrap(), CollationRule::MultipleUnsignedLongs);
    }
}
