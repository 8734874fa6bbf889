//! Where an index keeps its bytes.
//!
//! The index itself only deals in decoded nodes. A store hands it the root
//! value, whole `INDX` buffers by VCN and the block allocation bitmap, and
//! takes them back on flush.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::attribute::{AttributeRecord, AttributeType, NtfsAttribute};
use crate::error::{NtfsError, NtfsResult};
use crate::op::Operation;
use crate::volume::Volume;

/// Backing storage of one index.
pub trait IndexStore {
    /// Serialized `$INDEX_ROOT` value.
    fn read_root(&self) -> NtfsResult<Vec<u8>>;

    fn write_root(&mut self, op: &Operation, bytes: &[u8]) -> NtfsResult<()>;

    /// Largest root value the owning record can hold.
    fn root_capacity(&self) -> usize;

    /// Fill `buf` with the protected block stored at `vcn`.
    fn read_block(&self, vcn: i64, buf: &mut [u8]) -> NtfsResult<()>;

    fn write_block(&mut self, op: &Operation, vcn: i64, buf: &[u8]) -> NtfsResult<()>;

    fn read_bitmap(&self) -> NtfsResult<Vec<u8>>;

    fn write_bitmap(&mut self, op: &Operation, bytes: &[u8]) -> NtfsResult<()>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryIndexStore {
    root: Vec<u8>,
    root_capacity: usize,
    blocks: BTreeMap<i64, Vec<u8>>,
    bitmap: Vec<u8>,
}

impl MemoryIndexStore {
    pub fn new(root_capacity: usize) -> Self {
        Self { root_capacity, ..Default::default() }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Raw bytes of a stored block, for inspection.
    pub fn block_mut(&mut self, vcn: i64) -> Option<&mut Vec<u8>> {
        self.blocks.get_mut(&vcn)
    }
}

impl IndexStore for MemoryIndexStore {
    fn read_root(&self) -> NtfsResult<Vec<u8>> {
        Ok(self.root.clone())
    }

    fn write_root(&mut self, _op: &Operation, bytes: &[u8]) -> NtfsResult<()> {
        if bytes.len() > self.root_capacity {
            return Err(NtfsError::NoSpace);
        }
        self.root = bytes.to_vec();
        Ok(())
    }

    fn root_capacity(&self) -> usize {
        self.root_capacity
    }

    fn read_block(&self, vcn: i64, buf: &mut [u8]) -> NtfsResult<()> {
        let block = self.blocks.get(&vcn).ok_or(NtfsError::NotFound)?;
        if block.len() != buf.len() {
            return Err(NtfsError::CorruptData("index block size"));
        }
        buf.copy_from_slice(block);
        Ok(())
    }

    fn write_block(&mut self, _op: &Operation, vcn: i64, buf: &[u8]) -> NtfsResult<()> {
        self.blocks.insert(vcn, buf.to_vec());
        Ok(())
    }

    fn read_bitmap(&self) -> NtfsResult<Vec<u8>> {
        Ok(self.bitmap.clone())
    }

    fn write_bitmap(&mut self, _op: &Operation, bytes: &[u8]) -> NtfsResult<()> {
        self.bitmap = bytes.to_vec();
        Ok(())
    }
}

// ============================================================================
// Attribute-backed store
// ============================================================================

/// Store over the three attributes of an on-disk index: the resident
/// `$INDEX_ROOT`, the non-resident `$INDEX_ALLOCATION` holding the blocks,
/// and the `$BITMAP` of allocated block slots.
///
/// The attributes are borrowed out of their `FILE` records; `into_parts`
/// hands them back so the caller can write the records.
pub struct AttributeIndexStore<'v> {
    volume: &'v mut Volume,
    root: AttributeRecord,
    allocation: NtfsAttribute,
    bitmap: AttributeRecord,
    root_capacity: usize,
}

impl<'v> AttributeIndexStore<'v> {
    pub fn new(
        volume: &'v mut Volume,
        root: AttributeRecord,
        allocation: NtfsAttribute,
        bitmap: AttributeRecord,
        root_capacity: usize,
    ) -> NtfsResult<Self> {
        if root.attr_type() != AttributeType::INDEX_ROOT || root.resident().is_none() {
            return Err(NtfsError::InvalidParameter("index root must be a resident $INDEX_ROOT"));
        }
        if allocation.attr_type() != AttributeType::INDEX_ALLOCATION || !allocation.is_non_resident() {
            return Err(NtfsError::InvalidParameter("index blocks need a non-resident $INDEX_ALLOCATION"));
        }
        if bitmap.attr_type() != AttributeType::BITMAP || bitmap.resident().is_none() {
            return Err(NtfsError::InvalidParameter("index bitmap must be a resident $BITMAP"));
        }
        Ok(Self { volume, root, allocation, bitmap, root_capacity })
    }

    pub fn allocation(&self) -> &NtfsAttribute {
        &self.allocation
    }

    pub fn volume(&self) -> &Volume {
        &*self.volume
    }

    pub fn into_parts(self) -> (AttributeRecord, NtfsAttribute, AttributeRecord) {
        (self.root, self.allocation, self.bitmap)
    }

    fn block_position(&self, vcn: i64) -> NtfsResult<u64> {
        self.volume.params().index_vcn_to_position(vcn)
    }
}

impl IndexStore for AttributeIndexStore<'_> {
    fn read_root(&self) -> NtfsResult<Vec<u8>> {
        self.root
            .resident()
            .map(|r| r.data.clone())
            .ok_or(NtfsError::CorruptData("index root is not resident"))
    }

    fn write_root(&mut self, _op: &Operation, bytes: &[u8]) -> NtfsResult<()> {
        if bytes.len() > self.root_capacity {
            return Err(NtfsError::NoSpace);
        }
        let body = self
            .root
            .resident_mut()
            .ok_or(NtfsError::CorruptData("index root is not resident"))?;
        body.data = bytes.to_vec();
        Ok(())
    }

    fn root_capacity(&self) -> usize {
        self.root_capacity
    }

    fn read_block(&self, vcn: i64, buf: &mut [u8]) -> NtfsResult<()> {
        let pos = self.block_position(vcn)?;
        if pos + buf.len() as u64 > self.allocation.length() {
            return Err(NtfsError::NotFound);
        }
        let n = self.allocation.read(&*self.volume, pos, buf)?;
        if n != buf.len() {
            return Err(NtfsError::CorruptData("short index block read"));
        }
        Ok(())
    }

    fn write_block(&mut self, op: &Operation, vcn: i64, buf: &[u8]) -> NtfsResult<()> {
        let pos = self.block_position(vcn)?;
        log::trace!("ntfs: index block {} at byte {}", vcn, pos);
        self.allocation.write(op, &mut *self.volume, pos, buf)?;
        Ok(())
    }

    fn read_bitmap(&self) -> NtfsResult<Vec<u8>> {
        self.bitmap
            .resident()
            .map(|r| r.data.clone())
            .ok_or(NtfsError::CorruptData("index bitmap is not resident"))
    }

    fn write_bitmap(&mut self, _op: &Operation, bytes: &[u8]) -> NtfsResult<()> {
        let body = self
            .bitmap
            .resident_mut()
            .ok_or(NtfsError::CorruptData("index bitmap is not resident"))?;
        body.data = bytes.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeFlags;
    use crate::file_ref::FileRecordReference;
    use crate::params::VolumeParams;
    use crate::storage::RamDisk;
    use alloc::sync::Arc;
    use alloc::vec;

    fn volume() -> Volume {
        let disk = Arc::new(RamDisk::new(512, 512));
        Volume::format(disk, VolumeParams::new(512, 2, 1024, 1024).unwrap()).unwrap()
    }

    fn parts() -> (AttributeRecord, NtfsAttribute, AttributeRecord) {
        let name = Some("$I30");
        let root = AttributeRecord::new_resident(AttributeType::INDEX_ROOT, name, 0, false, AttributeFlags::empty()).unwrap();
        let alloc = AttributeRecord::new_non_resident(
            AttributeType::INDEX_ALLOCATION,
            name,
            1,
            AttributeFlags::empty(),
            0,
            vec![],
            0,
        ).unwrap();
        let bitmap = AttributeRecord::new_resident(AttributeType::BITMAP, name, 2, false, AttributeFlags::empty()).unwrap();
        (root, NtfsAttribute::new(FileRecordReference::new(5, 5), alloc), bitmap)
    }

    #[test]
    fn test_memory_store() {
        let op = Operation::new(1);
        let mut store = MemoryIndexStore::new(64);
        assert_eq!(store.write_root(&op, &[0; 65]), Err(NtfsError::NoSpace));
        store.write_block(&op, 2, &[7; 16]).unwrap();

        let mut buf = [0u8; 16];
        store.read_block(2, &mut buf).unwrap();
        assert_eq!(buf, [7; 16]);
        assert_eq!(store.read_block(0, &mut buf), Err(NtfsError::NotFound));
        assert_eq!(store.block_count(), 1);
    }

    #[test]
    fn test_attribute_store_blocks_land_at_vcn_offsets() {
        let op = Operation::new(3);
        let mut vol = volume();
        let (root, alloc, bitmap) = parts();
        let mut store = AttributeIndexStore::new(&mut vol, root, alloc, bitmap, 256).unwrap();

        // 1 KiB clusters, 1 KiB buffers: one vcn per block
        store.write_block(&op, 2, &[0x5A; 1024]).unwrap();
        assert_eq!(store.allocation().length(), 3 * 1024);

        let mut buf = vec![0u8; 1024];
        store.read_block(2, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x5A));
        store.read_block(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(store.read_block(3, &mut buf), Err(NtfsError::NotFound));

        store.write_root(&op, &[1, 2, 3]).unwrap();
        store.write_bitmap(&op, &[0b100]).unwrap();
        let (root, alloc, bitmap) = store.into_parts();
        assert_eq!(root.resident().unwrap().data, vec![1, 2, 3]);
        assert_eq!(bitmap.resident().unwrap().data, vec![0b100]);
        assert_eq!(alloc.last_modified(), Some(3));
    }

    #[test]
    fn test_attribute_store_rejects_wrong_attributes() {
        let mut vol = volume();
        let (_, alloc, bitmap) = parts();
        assert!(AttributeIndexStore::new(&mut vol, bitmap.clone(), alloc, bitmap, 256).is_err());
    }
}
