//! Typed view over an index of raw byte keys and values.

use alloc::vec::Vec;
use core::cmp::Ordering;
use core::marker::PhantomData;

use super::store::IndexStore;
use super::Index;
use crate::codec::{read_u32, read_u64};
use crate::error::NtfsResult;
use crate::file_ref::FileRecordReference;
use crate::op::Operation;

/// On-disk encoding of an index key or value.
pub trait IndexCodec: Sized {
    fn encode(&self) -> Vec<u8>;
    fn decode(bytes: &[u8]) -> NtfsResult<Self>;
}

impl IndexCodec for u32 {
    fn encode(&self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> NtfsResult<Self> {
        read_u32(bytes, 0)
    }
}

impl IndexCodec for u64 {
    fn encode(&self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> NtfsResult<Self> {
        read_u64(bytes, 0)
    }
}

impl IndexCodec for FileRecordReference {
    fn encode(&self) -> Vec<u8> {
        self.to_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> NtfsResult<Self> {
        FileRecordReference::read(bytes, 0)
    }
}

impl IndexCodec for Vec<u8> {
    fn encode(&self) -> Vec<u8> {
        self.clone()
    }

    fn decode(bytes: &[u8]) -> NtfsResult<Self> {
        Ok(bytes.to_vec())
    }
}

/// An [`Index`] whose keys and values are encoded with [`IndexCodec`].
pub struct TypedIndex<S: IndexStore, K, V> {
    inner: Index<S>,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<S: IndexStore, K: IndexCodec, V: IndexCodec> TypedIndex<S, K, V> {
    pub fn new(inner: Index<S>) -> Self {
        Self { inner, _types: PhantomData }
    }

    pub fn inner(&self) -> &Index<S> {
        &self.inner
    }

    pub fn into_inner(self) -> Index<S> {
        self.inner
    }

    pub fn get(&self, key: &K) -> NtfsResult<Option<V>> {
        self.inner
            .get(&key.encode())?
            .map(|v| V::decode(&v))
            .transpose()
    }

    pub fn contains_key(&self, key: &K) -> NtfsResult<bool> {
        self.inner.contains_key(&key.encode())
    }

    pub fn insert(&mut self, op: &Operation, key: &K, value: &V) -> NtfsResult<()> {
        self.inner.insert(op, &key.encode(), &value.encode())
    }

    pub fn remove(&mut self, op: &Operation, key: &K) -> NtfsResult<bool> {
        self.inner.remove(op, &key.encode())
    }

    pub fn len(&self) -> NtfsResult<usize> {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn entries(&self) -> NtfsResult<Vec<(K, V)>> {
        self.inner
            .entries()?
            .iter()
            .map(|e| Ok((K::decode(e.key())?, V::decode(e.data())?)))
            .collect()
    }

    /// Range query over decoded keys; see [`Index::find_all`]. Keys that fail
    /// to decode end the search.
    pub fn find_all<Q>(&self, query: Q) -> NtfsResult<Vec<(K, V)>>
    where
        Q: Fn(&K) -> Ordering,
    {
        self.inner
            .find_all(|raw| K::decode(raw).map(|k| query(&k)).unwrap_or(Ordering::Less))?
            .iter()
            .map(|e| Ok((K::decode(e.key())?, V::decode(e.data())?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeType;
    use crate::index::{CollationRule, MemoryIndexStore, UpperCase};
    use crate::params::VolumeParams;
    use alloc::sync::Arc;

    #[test]
    fn test_typed_security_ids() {
        let op = Operation::new(4);
        let index = Index::create(
            MemoryIndexStore::new(0x100),
            VolumeParams::default(),
            AttributeType(0),
            CollationRule::UnsignedLong,
            Arc::new(UpperCase::default()),
            &op,
        )
        .unwrap();
        let mut ids: TypedIndex<_, u32, FileRecordReference> = TypedIndex::new(index);
        for id in [0x105u32, 0x100, 0x10A] {
            ids.insert(&op, &id, &FileRecordReference::new(id as u64, 2)).unwrap();
        }

        assert_eq!(ids.get(&0x100).unwrap(), Some(FileRecordReference::new(0x100, 2)));
        assert_eq!(ids.get(&0x101).unwrap(), None);
        assert!(ids.remove(&op, &0x105).unwrap());
        assert_eq!(ids.len().unwrap(), 2);

        let keys: Vec<u32> = ids.entries().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, [0x100, 0x10A]);
        let above: Vec<u32> = ids
            .find_all(|k| if *k < 0x101 { Ordering::Greater } else { Ordering::Equal })
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(above, [0x10A]);
    }
}
