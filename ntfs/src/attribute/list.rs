//! `$ATTRIBUTE_LIST`: where each attribute extent of a file lives.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cmp::Ordering;

use super::record::{name_units, AttributeRecord};
use super::types::AttributeType;
use crate::codec::{
    compare_names, read_u16, read_u32, read_u64, read_u8, read_utf16, round_up, utf16_len,
    write_u16, write_u32, write_u64, write_utf16,
};
use crate::error::{NtfsError, NtfsResult};
use crate::file_ref::FileRecordReference;

const NAME_OFFSET: usize = 0x20;
const MIN_RECORD_LENGTH: usize = 0x18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeListRecord {
    pub attr_type: AttributeType,
    pub name: Option<String>,
    pub start_vcn: u64,
    /// Record holding the extent
    pub base_file_reference: FileRecordReference,
    pub attribute_id: u16,
}

impl AttributeListRecord {
    /// Entry describing `attr`, stored in the record `location`.
    pub fn from_attribute(attr: &AttributeRecord, location: FileRecordReference) -> Self {
        Self {
            attr_type: attr.attr_type(),
            name: attr.name().map(ToString::to_string),
            start_vcn: attr.start_vcn() as u64,
            base_file_reference: location,
            attribute_id: attr.id(),
        }
    }

    pub fn size(&self) -> usize {
        let name = self.name.as_deref().map(utf16_len).unwrap_or(0);
        round_up(NAME_OFFSET + name * 2, 8)
    }

    /// Decode one entry, returning it and its declared length.
    pub fn read(buf: &[u8]) -> NtfsResult<(Self, usize)> {
        let attr_type = AttributeType(read_u32(buf, 0x00)?);
        let length = read_u16(buf, 0x04)? as usize;
        if length < MIN_RECORD_LENGTH {
            return Err(NtfsError::TruncatedRecord { declared: length, minimum: MIN_RECORD_LENGTH });
        }
        if length > buf.len() {
            return Err(NtfsError::CorruptData("attribute list entry beyond end of list"));
        }
        let name_len = read_u8(buf, 0x06)? as usize;
        let name_off = read_u8(buf, 0x07)? as usize;
        let name = if name_len > 0 {
            if name_off + name_len * 2 > length {
                return Err(NtfsError::CorruptData("attribute list name beyond entry"));
            }
            Some(read_utf16(buf, name_off, name_len)?)
        } else {
            None
        };

        let rec = Self {
            attr_type,
            name,
            start_vcn: read_u64(buf, 0x08)?,
            base_file_reference: FileRecordReference::read(buf, 0x10)?,
            attribute_id: read_u16(buf, 0x18)?,
        };
        Ok((rec, length))
    }

    /// Encode into `buf`, returning the bytes written.
    pub fn write_to(&self, buf: &mut [u8]) -> NtfsResult<usize> {
        let size = self.size();
        let name_len = name_units(self.name.as_deref())?;
        if buf.len() < size {
            return Err(NtfsError::InvalidParameter("buffer too small for attribute list entry"));
        }
        let buf = &mut buf[..size];
        buf.fill(0);
        write_u32(buf, 0x00, self.attr_type.0);
        write_u16(buf, 0x04, size as u16);
        if let Some(name) = &self.name {
            write_utf16(buf, NAME_OFFSET, name);
        }
        buf[0x06] = name_len;
        buf[0x07] = NAME_OFFSET as u8;
        write_u64(buf, 0x08, self.start_vcn);
        buf[0x10..0x18].copy_from_slice(&self.base_file_reference.to_bytes());
        write_u16(buf, 0x18, self.attribute_id);
        Ok(size)
    }

    /// Ordering of the list: type, then name, then starting VCN.
    pub fn cmp_key(&self, other: &Self) -> Ordering {
        self.attr_type
            .cmp(&other.attr_type)
            .then_with(|| compare_names(self.name.as_deref(), other.name.as_deref()))
            .then_with(|| self.start_vcn.cmp(&other.start_vcn))
    }
}

/// The sorted sequence of entries stored in `$ATTRIBUTE_LIST`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeList {
    records: Vec<AttributeListRecord>,
}

impl AttributeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(buf: &[u8]) -> NtfsResult<Self> {
        let mut records = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            let (rec, len) = AttributeListRecord::read(&buf[pos..])?;
            records.push(rec);
            pos += len;
        }
        Ok(Self { records })
    }

    pub fn size(&self) -> usize {
        self.records.iter().map(AttributeListRecord::size).sum()
    }

    pub fn to_bytes(&self) -> NtfsResult<Vec<u8>> {
        let mut buf = alloc::vec![0u8; self.size()];
        let mut pos = 0;
        for rec in &self.records {
            pos += rec.write_to(&mut buf[pos..])?;
        }
        Ok(buf)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, AttributeListRecord> {
        self.records.iter()
    }

    /// Insert keeping the list ordered.
    pub fn insert(&mut self, rec: AttributeListRecord) {
        let pos = self
            .records
            .partition_point(|r| r.cmp_key(&rec) != Ordering::Greater);
        self.records.insert(pos, rec);
    }

    /// Remove the entry for attribute `id` stored in `location`.
    pub fn remove(&mut self, location: FileRecordReference, id: u16) -> Option<AttributeListRecord> {
        let idx = self
            .records
            .iter()
            .position(|r| r.base_file_reference == location && r.attribute_id == id)?;
        Some(self.records.remove(idx))
    }

    /// Entries for one attribute, in VCN order.
    pub fn find<'a>(
        &'a self,
        attr_type: AttributeType,
        name: Option<&'a str>,
    ) -> impl Iterator<Item = &'a AttributeListRecord> + 'a {
        self.records.iter().filter(move |r| {
            r.attr_type == attr_type && compare_names(r.name.as_deref(), name) == Ordering::Equal
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn entry(ty: AttributeType, name: Option<&str>, vcn: u64, id: u16) -> AttributeListRecord {
        AttributeListRecord {
            attr_type: ty,
            name: name.map(ToString::to_string),
            start_vcn: vcn,
            base_file_reference: FileRecordReference::new(30, 1),
            attribute_id: id,
        }
    }

    #[test]
    fn test_named_entry_size() {
        let rec = entry(AttributeType::DATA, Some("Foo"), 0, 1);
        assert_eq!(rec.size(), 40);
        let mut buf = vec![0u8; 40];
        assert_eq!(rec.write_to(&mut buf).unwrap(), 40);
        let (back, len) = AttributeListRecord::read(&buf).unwrap();
        assert_eq!(len, 40);
        assert_eq!(back, rec);
    }

    #[test]
    fn test_short_entry_is_hard_failure() {
        let rec = entry(AttributeType::DATA, None, 0, 1);
        let mut buf = vec![0u8; rec.size()];
        rec.write_to(&mut buf).unwrap();
        write_u16(&mut buf, 0x04, 0x10);
        assert_eq!(
            AttributeList::from_bytes(&buf),
            Err(NtfsError::TruncatedRecord { declared: 0x10, minimum: 0x18 })
        );
        write_u16(&mut buf, 0x04, 0x40);
        assert!(AttributeList::from_bytes(&buf).is_err());
    }

    #[test]
    fn test_list_sorted_by_type_name_vcn() {
        let mut list = AttributeList::new();
        list.insert(entry(AttributeType::DATA, None, 100, 4));
        list.insert(entry(AttributeType::STANDARD_INFORMATION, None, 0, 0));
        list.insert(entry(AttributeType::DATA, None, 0, 3));
        list.insert(entry(AttributeType::DATA, Some("ads"), 0, 5));

        let order: Vec<u16> = list.iter().map(|r| r.attribute_id).collect();
        assert_eq!(order, vec![0, 3, 4, 5]);
        assert_eq!(list.find(AttributeType::DATA, None).count(), 2);

        let bytes = list.to_bytes().unwrap();
        assert_eq!(AttributeList::from_bytes(&bytes).unwrap(), list);

        assert!(list.remove(FileRecordReference::new(30, 1), 4).is_some());
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_name_length_fits_one_byte() {
        let longest = "q".repeat(255);
        let rec = entry(AttributeType::DATA, Some(&longest), 0, 1);
        let mut buf = vec![0u8; rec.size()];
        rec.write_to(&mut buf).unwrap();
        assert_eq!(buf[0x06], 255);
        assert_eq!(AttributeListRecord::read(&buf).unwrap().0, rec);

        let too_long = entry(AttributeType::DATA, Some(&"q".repeat(256)), 0, 1);
        let mut buf = vec![0u8; too_long.size()];
        assert!(matches!(too_long.write_to(&mut buf), Err(NtfsError::InvalidParameter(_))));
    }

    #[test]
    fn test_full_width_vcn_ordering() {
        let low = entry(AttributeType::DATA, None, 1, 1);
        let high = entry(AttributeType::DATA, None, 1 << 40, 2);
        assert_eq!(low.cmp_key(&high), Ordering::Less);
    }
}
