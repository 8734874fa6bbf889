//! Index B-trees (`$INDEX_ROOT` + `$INDEX_ALLOCATION`).
//!
//! An index is a tree of nodes. The root node lives resident inside the
//! owning `FILE` record; once it outgrows the room there, its entries are
//! deposed into an external `INDX` block and the root keeps a single End
//! entry pointing at it. Every node ends with an End entry; an entry with a
//! child VCN routes lookups for keys smaller than itself into that block.
//!
//! Blocks are loaded through an [`IndexStore`] and cached decoded. Mutations
//! work on the cached nodes, mark what they touch dirty, and finish with a
//! flush that rewrites each dirty block whole.

mod block;
mod collation;
mod entry;
mod header;
mod node;
mod root;
mod store;
mod typed;

pub use block::IndexBlock;
pub use collation::{CollationRule, Collator, UpperCase};
pub use entry::{IndexEntry, IndexEntryFlags};
pub use header::IndexHeader;
pub use node::IndexNode;
pub use root::IndexRoot;
pub use store::{AttributeIndexStore, IndexStore, MemoryIndexStore};
pub use typed::{IndexCodec, TypedIndex};

use alloc::borrow::Cow;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::cmp::Ordering;

use crate::attribute::AttributeType;
use crate::bitmap::Bitmap;
use crate::codec::read_u32;
use crate::error::{NtfsError, NtfsResult};
use crate::fixup::FixupRecord;
use crate::op::Operation;
use crate::params::VolumeParams;

/// Deeper trees than this are taken to be cyclic.
const MAX_DEPTH: usize = 32;

/// Root value holding nothing but an End entry with a child.
const MIN_ROOT_CAPACITY: usize = IndexRoot::HEADER_OFFSET + IndexHeader::SIZE + 0x18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeId {
    Root,
    Block(i64),
}

/// Descent through the tree: each step names a node and the entry taken in
/// it. The last step names the entry found or the insertion point.
type Path = Vec<(NodeId, usize)>;

pub struct Index<S: IndexStore> {
    store: S,
    params: VolumeParams,
    root: IndexRoot,
    is_file: bool,
    collator: Collator,
    blocks: BTreeMap<i64, IndexBlock>,
    dirty: BTreeSet<i64>,
    root_dirty: bool,
    bitmap: Bitmap,
    bitmap_dirty: bool,
    last_modified: Option<u64>,
}

impl<S: IndexStore> Index<S> {
    /// Start an empty index in `store`.
    pub fn create(
        store: S,
        params: VolumeParams,
        attr_type: AttributeType,
        collation: CollationRule,
        upcase: Arc<UpperCase>,
        op: &Operation,
    ) -> NtfsResult<Self> {
        let is_file = attr_type == AttributeType::FILE_NAME;
        let root = IndexRoot::new(
            attr_type,
            collation,
            params.index_buffer_size,
            params.raw_clusters_per_index_record(),
            is_file,
        );
        let mut index = Self::with_root(store, params, root, Bitmap::new(), upcase)?;
        index.root_dirty = true;
        index.bitmap_dirty = true;
        index.touch(op);
        index.flush(op)?;
        Ok(index)
    }

    /// Open the index already held by `store`.
    pub fn open(store: S, params: VolumeParams, upcase: Arc<UpperCase>) -> NtfsResult<Self> {
        let bytes = store.read_root()?;
        let is_file = AttributeType(read_u32(&bytes, 0)?) == AttributeType::FILE_NAME;
        let root = IndexRoot::read(&bytes, is_file)?;
        if root.index_allocation_size != params.index_buffer_size {
            log::warn!(
                "ntfs: index buffers of {} bytes, volume uses {}",
                root.index_allocation_size,
                params.index_buffer_size
            );
            return Err(NtfsError::CorruptData("index allocation size"));
        }
        let bitmap = Bitmap::from_bytes(&store.read_bitmap()?);
        Self::with_root(store, params, root, bitmap, upcase)
    }

    fn with_root(
        store: S,
        params: VolumeParams,
        root: IndexRoot,
        bitmap: Bitmap,
        upcase: Arc<UpperCase>,
    ) -> NtfsResult<Self> {
        if store.root_capacity() < MIN_ROOT_CAPACITY {
            return Err(NtfsError::InvalidParameter("index root capacity"));
        }
        let is_file = root.attr_type == AttributeType::FILE_NAME;
        Ok(Self {
            store,
            params,
            collator: Collator::for_rule(root.collation, upcase),
            root,
            is_file,
            blocks: BTreeMap::new(),
            dirty: BTreeSet::new(),
            root_dirty: false,
            bitmap,
            bitmap_dirty: false,
            last_modified: None,
        })
    }

    pub fn root(&self) -> &IndexRoot {
        &self.root
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn is_file_index(&self) -> bool {
        self.is_file
    }

    /// Timestamp of the last operation that changed the index.
    pub fn last_modified(&self) -> Option<u64> {
        self.last_modified
    }

    fn touch(&mut self, op: &Operation) {
        self.last_modified = Some(op.timestamp());
    }

    fn block_size(&self) -> usize {
        self.params.index_buffer_size as usize
    }

    /// Largest entry that still leaves room for three per block, child
    /// pointers included.
    fn max_entry_size(&self) -> usize {
        let empty = IndexBlock::new(0, self.block_size(), self.is_file);
        let room = empty.space_free() as usize + IndexEntry::end(self.is_file).size();
        room.saturating_sub(0x18) / 3
    }

    // ------------------------------------------------------------------
    // Node access
    // ------------------------------------------------------------------

    fn read_block(&self, vcn: i64) -> NtfsResult<IndexBlock> {
        let mut buf = vec![0u8; self.block_size()];
        self.store.read_block(vcn, &mut buf)?;
        let block = IndexBlock::from_bytes(&buf, self.is_file).inspect_err(|e| {
            log::warn!("ntfs: index block {} unreadable: {}", vcn, e);
        })?;
        if block.vcn() != vcn {
            log::warn!("ntfs: index block {} claims vcn {}", vcn, block.vcn());
            return Err(NtfsError::CorruptData("index block vcn mismatch"));
        }
        Ok(block)
    }

    /// Node for read-only walks: cached if loaded, otherwise decoded fresh.
    fn read_node(&self, id: NodeId) -> NtfsResult<Cow<'_, IndexNode>> {
        match id {
            NodeId::Root => Ok(Cow::Borrowed(self.root.node())),
            NodeId::Block(vcn) => match self.blocks.get(&vcn) {
                Some(block) => Ok(Cow::Borrowed(block.node())),
                None => Ok(Cow::Owned(self.read_block(vcn)?.node().clone())),
            },
        }
    }

    fn load(&mut self, id: NodeId) -> NtfsResult<()> {
        if let NodeId::Block(vcn) = id {
            if !self.blocks.contains_key(&vcn) {
                let block = self.read_block(vcn)?;
                self.blocks.insert(vcn, block);
            }
        }
        Ok(())
    }

    fn cached(&self, id: NodeId) -> NtfsResult<&IndexNode> {
        match id {
            NodeId::Root => Ok(self.root.node()),
            NodeId::Block(vcn) => self
                .blocks
                .get(&vcn)
                .map(IndexBlock::node)
                .ok_or(NtfsError::NotFound),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> NtfsResult<&mut IndexNode> {
        self.load(id)?;
        match id {
            NodeId::Root => {
                self.root_dirty = true;
                Ok(self.root.node_mut())
            }
            NodeId::Block(vcn) => {
                self.dirty.insert(vcn);
                self.blocks
                    .get_mut(&vcn)
                    .map(IndexBlock::node_mut)
                    .ok_or(NtfsError::NotFound)
            }
        }
    }

    fn block_overflows(&self, vcn: i64) -> bool {
        self.blocks.get(&vcn).is_some_and(|b| b.space_free() < 0)
    }

    fn allocate_block(&mut self) -> i64 {
        let slot = self.bitmap.allocate_first_available(0);
        self.bitmap_dirty = true;
        self.params.index_block_vcn(slot)
    }

    fn free_block(&mut self, vcn: i64) {
        self.blocks.remove(&vcn);
        self.dirty.remove(&vcn);
        let slot = vcn / self.params.index_block_vcn_stride();
        self.bitmap.mark_absent(slot as u64);
        self.bitmap_dirty = true;
        log::debug!("ntfs: freed index block {}", vcn);
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// First entry not below `key`, and whether it matches.
    fn search(&self, node: &IndexNode, key: &[u8]) -> (usize, bool) {
        for (i, entry) in node.entries().iter().enumerate() {
            if entry.is_end() {
                return (i, false);
            }
            match self.collator.compare(key, entry.key()) {
                Ordering::Equal => return (i, true),
                Ordering::Less => return (i, false),
                Ordering::Greater => {}
            }
        }
        (node.entries().len() - 1, false)
    }

    fn find_path(&mut self, key: &[u8]) -> NtfsResult<(Path, bool)> {
        let mut path = Vec::new();
        let mut id = NodeId::Root;
        loop {
            if path.len() > MAX_DEPTH {
                return Err(NtfsError::CorruptData("index tree too deep"));
            }
            self.load(id)?;
            let node = self.cached(id)?;
            let (idx, found) = self.search(node, key);
            let child = node.entries()[idx].child_vcn();
            path.push((id, idx));
            if found {
                return Ok((path, true));
            }
            match child {
                Some(vcn) => id = NodeId::Block(vcn),
                None => return Ok((path, false)),
            }
        }
    }

    /// Follow End entries from block `vcn` down to a leaf, extending `path`.
    fn descend_rightmost(&mut self, path: &mut Path, vcn: i64) -> NtfsResult<NodeId> {
        let mut id = NodeId::Block(vcn);
        loop {
            if path.len() > MAX_DEPTH {
                return Err(NtfsError::CorruptData("index tree too deep"));
            }
            self.load(id)?;
            let node = self.cached(id)?;
            let last = node.entries().len() - 1;
            let child = node.entries()[last].child_vcn();
            path.push((id, last));
            match child {
                Some(c) => id = NodeId::Block(c),
                None => return Ok(id),
            }
        }
    }

    pub fn get(&self, key: &[u8]) -> NtfsResult<Option<Vec<u8>>> {
        let mut id = NodeId::Root;
        for _ in 0..=MAX_DEPTH {
            let node = self.read_node(id)?;
            let (idx, found) = self.search(&node, key);
            let entry = &node.entries()[idx];
            if found {
                return Ok(Some(entry.data().to_vec()));
            }
            match entry.child_vcn() {
                Some(vcn) => id = NodeId::Block(vcn),
                None => return Ok(None),
            }
        }
        Err(NtfsError::CorruptData("index tree too deep"))
    }

    pub fn contains_key(&self, key: &[u8]) -> NtfsResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    fn walk<F: FnMut(&IndexEntry)>(&self, id: NodeId, depth: usize, f: &mut F) -> NtfsResult<()> {
        if depth > MAX_DEPTH {
            return Err(NtfsError::CorruptData("index tree too deep"));
        }
        let node = self.read_node(id)?;
        for entry in node.entries() {
            if let Some(vcn) = entry.child_vcn() {
                self.walk(NodeId::Block(vcn), depth + 1, f)?;
            }
            if !entry.is_end() {
                f(entry);
            }
        }
        Ok(())
    }

    /// Every entry in key order, without child pointers.
    pub fn entries(&self) -> NtfsResult<Vec<IndexEntry>> {
        let mut out = Vec::new();
        self.walk(NodeId::Root, 0, &mut |e: &IndexEntry| out.push(detached(e)))?;
        Ok(out)
    }

    pub fn len(&self) -> NtfsResult<usize> {
        let mut count = 0;
        self.walk(NodeId::Root, 0, &mut |_: &IndexEntry| count += 1)?;
        Ok(count)
    }

    pub fn is_empty(&self) -> bool {
        self.root.node().is_empty() && !self.root.node().has_children()
    }

    /// Entries matching a range query, in key order.
    ///
    /// `query` orders the wanted range against a key: `Greater` when the
    /// range lies above it, `Less` when below, `Equal` on a match.
    pub fn find_all<Q>(&self, query: Q) -> NtfsResult<Vec<IndexEntry>>
    where
        Q: Fn(&[u8]) -> Ordering,
    {
        let mut out = Vec::new();
        self.find_in(NodeId::Root, 0, &query, &mut out)?;
        Ok(out)
    }

    fn find_in<Q>(&self, id: NodeId, depth: usize, query: &Q, out: &mut Vec<IndexEntry>) -> NtfsResult<()>
    where
        Q: Fn(&[u8]) -> Ordering,
    {
        if depth > MAX_DEPTH {
            return Err(NtfsError::CorruptData("index tree too deep"));
        }
        let node = self.read_node(id)?;
        for entry in node.entries() {
            let order = if entry.is_end() { Ordering::Less } else { query(entry.key()) };
            if order != Ordering::Greater {
                if let Some(vcn) = entry.child_vcn() {
                    self.find_in(NodeId::Block(vcn), depth + 1, query, out)?;
                }
            }
            if order == Ordering::Equal && !entry.is_end() {
                out.push(detached(entry));
            }
            if order == Ordering::Less {
                break;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Add `key`, or replace the value stored under it.
    pub fn insert(&mut self, op: &Operation, key: &[u8], data: &[u8]) -> NtfsResult<()> {
        let entry = IndexEntry::new(key.to_vec(), data.to_vec(), self.is_file)?;
        if entry.size() + 8 > self.max_entry_size() {
            return Err(NtfsError::InvalidParameter("index entry too large"));
        }

        let (path, found) = self.find_path(key)?;
        if found {
            let &(id, idx) = path.last().ok_or(NtfsError::NotFound)?;
            let same_size = self.cached(id)?.entries()[idx].data().len() == data.len();
            if same_size {
                self.node_mut(id)?.entries_mut()[idx].set_data(data.to_vec());
            } else {
                self.remove_found(path)?;
                self.add_entry(entry)?;
            }
        } else {
            self.insert_at(path, entry)?;
        }

        self.touch(op);
        self.flush(op)
    }

    fn add_entry(&mut self, entry: IndexEntry) -> NtfsResult<()> {
        let (path, found) = self.find_path(entry.key())?;
        if found {
            return Err(NtfsError::AlreadyExists);
        }
        self.insert_at(path, entry)
    }

    fn insert_at(&mut self, path: Path, entry: IndexEntry) -> NtfsResult<()> {
        let &(id, idx) = path.last().ok_or(NtfsError::NotFound)?;
        self.node_mut(id)?.entries_mut().insert(idx, entry);
        self.fix_overflow(&path)
    }

    /// Split overflowing blocks from the bottom of `path` upwards.
    fn fix_overflow(&mut self, path: &[(NodeId, usize)]) -> NtfsResult<()> {
        for level in (1..path.len()).rev() {
            let NodeId::Block(vcn) = path[level].0 else {
                break;
            };
            if !self.block_overflows(vcn) {
                break;
            }
            // each split takes the lowest keys, so medians go in ascending
            let (parent, mut idx) = path[level - 1];
            while self.block_overflows(vcn) {
                let median = self.split(vcn)?;
                self.node_mut(parent)?.entries_mut().insert(idx, median);
                idx += 1;
            }
        }
        self.fix_root_overflow()
    }

    /// Move the lower half of block `vcn` into a new block and return the
    /// separating entry, now pointing at the new block.
    fn split(&mut self, vcn: i64) -> NtfsResult<IndexEntry> {
        let is_file = self.is_file;
        let entries = self.node_mut(NodeId::Block(vcn))?.entries_mut();
        let count = entries.len() - 1;
        if count < 3 {
            return Err(NtfsError::NoSpace);
        }

        let total: usize = entries[..count].iter().map(IndexEntry::size).sum();
        let mut mid = 0;
        let mut lower_size = 0;
        while mid < count && lower_size + entries[mid].size() <= total / 2 {
            lower_size += entries[mid].size();
            mid += 1;
        }
        let mid = mid.clamp(1, count - 2);
        let mut lower: Vec<IndexEntry> = entries.drain(..mid).collect();
        let mut median = entries.remove(0);

        let new_vcn = self.allocate_block();
        let mut end = IndexEntry::end(is_file);
        end.set_child_vcn(median.child_vcn());
        lower.push(end);
        median.set_child_vcn(Some(new_vcn));

        let mut block = IndexBlock::new(new_vcn, self.block_size(), is_file);
        *block.node_mut().entries_mut() = lower;
        self.blocks.insert(new_vcn, block);
        self.dirty.insert(new_vcn);
        log::debug!("ntfs: split index block {}, lower half to {}", vcn, new_vcn);
        Ok(median)
    }

    fn fix_root_overflow(&mut self) -> NtfsResult<()> {
        while self.root.size() > self.store.root_capacity() {
            if self.root.node().is_empty() {
                return Err(NtfsError::NoSpace);
            }
            let vcn = self.allocate_block();
            let mut end = IndexEntry::end(self.is_file);
            end.set_child_vcn(Some(vcn));
            let deposed = core::mem::replace(self.root.node_mut().entries_mut(), vec![end]);
            self.root_dirty = true;

            let mut block = IndexBlock::new(vcn, self.block_size(), self.is_file);
            *block.node_mut().entries_mut() = deposed;
            self.blocks.insert(vcn, block);
            self.dirty.insert(vcn);
            log::debug!("ntfs: index root deposed into block {}", vcn);

            while self.block_overflows(vcn) {
                let median = self.split(vcn)?;
                let entries = self.root.node_mut().entries_mut();
                let end = entries.len() - 1;
                entries.insert(end, median);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    /// Remove `key`. Returns whether it was present.
    pub fn remove(&mut self, op: &Operation, key: &[u8]) -> NtfsResult<bool> {
        let (path, found) = self.find_path(key)?;
        if !found {
            return Ok(false);
        }
        self.remove_found(path)?;
        self.touch(op);
        self.flush(op)?;
        Ok(true)
    }

    fn remove_found(&mut self, mut path: Path) -> NtfsResult<()> {
        let at = path.len() - 1;
        let (id, idx) = path[at];
        let child = self.cached(id)?.entries()[idx].child_vcn();
        let Some(child) = child else {
            self.node_mut(id)?.entries_mut().remove(idx);
            return self.fix_underflow(path);
        };

        // interior entry: swap in its predecessor, the largest key of the
        // subtree on its left
        let leaf = self.descend_rightmost(&mut path, child)?;
        let entries = self.node_mut(leaf)?.entries_mut();
        if entries.len() < 2 {
            return Err(NtfsError::CorruptData("empty index leaf"));
        }
        let mut pred = entries.remove(entries.len() - 2);
        let pred_key = pred.key().to_vec();

        let target = &mut self.node_mut(id)?.entries_mut()[idx];
        pred.set_child_vcn(target.child_vcn());
        *target = pred;
        self.fix_overflow(&path[..=at])?;

        // splits above may have moved the leaf's parent; look it up again
        let (mut path, found) = self.find_path(&pred_key)?;
        let &(id, idx) = path.last().ok_or(NtfsError::NotFound)?;
        let child = self.cached(id)?.entries()[idx].child_vcn();
        match (found, child) {
            (true, Some(vcn)) => {
                self.descend_rightmost(&mut path, vcn)?;
                self.fix_underflow(path)
            }
            _ => Err(NtfsError::CorruptData("index predecessor lost")),
        }
    }

    /// Free empty blocks and merge underfull ones into a sibling, from the
    /// bottom of `path` upwards, then pull a lone child block back into the
    /// root. Entries displaced on the way are added back.
    fn fix_underflow(&mut self, mut path: Path) -> NtfsResult<()> {
        let mut orphans = Vec::new();
        while path.len() >= 2 {
            let (id, _) = path[path.len() - 1];
            let NodeId::Block(vcn) = id else {
                break;
            };
            let (parent, pidx) = path[path.len() - 2];
            let node = self.cached(id)?;
            let empty = node.is_empty();
            let end_child = node.entries()[0].child_vcn();
            if !empty {
                if !self.merge_with_sibling(parent, pidx)? {
                    break;
                }
                path.pop();
                continue;
            }
            self.free_block(vcn);

            let entries = self.node_mut(parent)?.entries_mut();
            let end = entries.len() - 1;
            if let Some(c) = end_child {
                entries[pidx].set_child_vcn(Some(c));
                break;
            }
            if pidx < end {
                let mut p = entries.remove(pidx);
                p.set_child_vcn(None);
                orphans.push(p);
            } else if end > 0 {
                let mut q = entries.remove(end - 1);
                entries[end - 1].set_child_vcn(q.child_vcn());
                q.set_child_vcn(None);
                orphans.push(q);
            } else {
                entries[0].set_child_vcn(None);
            }
            path.pop();
        }

        self.collapse_root()?;
        for entry in orphans {
            self.add_entry(entry)?;
        }
        Ok(())
    }

    /// Room for entries in block `vcn`.
    fn block_room(&self, vcn: i64) -> NtfsResult<usize> {
        let block = self.blocks.get(&vcn).ok_or(NtfsError::NotFound)?;
        let room = block.space_free() + block.node().entries_size() as isize;
        Ok(room.max(0) as usize)
    }

    /// If the block under entry `pidx` of `parent` is less than half full,
    /// fold it and an adjacent sibling into one block, pulling their
    /// separator down between them. Returns whether the blocks merged.
    fn merge_with_sibling(&mut self, parent: NodeId, pidx: usize) -> NtfsResult<bool> {
        let entries = self.cached(parent)?.entries();
        let end = entries.len() - 1;
        let sep = if pidx < end {
            pidx
        } else if end > 0 {
            end - 1
        } else {
            return Ok(false);
        };
        let (Some(left), Some(right)) = (entries[sep].child_vcn(), entries[sep + 1].child_vcn())
        else {
            return Err(NtfsError::CorruptData("index separator without child"));
        };
        let this = if sep == pidx { left } else { right };
        let room = self.block_room(this)?;
        if self.cached(NodeId::Block(this))?.entries_size() * 2 >= room {
            return Ok(false);
        }

        self.load(NodeId::Block(left))?;
        self.load(NodeId::Block(right))?;
        let lower = self.cached(NodeId::Block(left))?;
        let upper = self.cached(NodeId::Block(right))?;
        // a subtree hoisted past an emptied interior block sits one level
        // higher than its neighbours
        if lower.has_children() != upper.has_children() {
            return Ok(false);
        }
        let (lower_end, lower) = lower
            .entries()
            .split_last()
            .ok_or(NtfsError::CorruptData("index node without end entry"))?;
        let mut separator = self.cached(parent)?.entries()[sep].clone();
        separator.set_child_vcn(lower_end.child_vcn());
        let size = lower.iter().map(IndexEntry::size).sum::<usize>()
            + separator.size()
            + upper.entries_size();
        if size > room {
            return Ok(false);
        }

        let mut merged = lower.to_vec();
        merged.push(separator);
        merged.extend_from_slice(upper.entries());
        *self.node_mut(NodeId::Block(right))?.entries_mut() = merged;
        self.node_mut(parent)?.entries_mut().remove(sep);
        self.free_block(left);
        log::debug!("ntfs: merged index block {} into {}", left, right);
        Ok(true)
    }

    fn collapse_root(&mut self) -> NtfsResult<()> {
        loop {
            let root = self.root.node();
            if !root.is_empty() {
                return Ok(());
            }
            let Some(vcn) = root.entries()[0].child_vcn() else {
                return Ok(());
            };
            self.load(NodeId::Block(vcn))?;
            let child = self.cached(NodeId::Block(vcn))?;
            let size = IndexRoot::HEADER_OFFSET + IndexHeader::SIZE + child.entries_size();
            if size > self.store.root_capacity() {
                return Ok(());
            }
            let entries = child.entries().to_vec();
            *self.root.node_mut().entries_mut() = entries;
            self.root_dirty = true;
            self.free_block(vcn);
            log::debug!("ntfs: index block {} pulled into root", vcn);
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write every dirty block, then the root and the block bitmap.
    pub fn flush(&mut self, op: &Operation) -> NtfsResult<()> {
        let size = self.block_size();
        while let Some(vcn) = self.dirty.first().copied() {
            if let Some(block) = self.blocks.get_mut(&vcn) {
                let mut buf = vec![0u8; size];
                block.to_bytes(&mut buf)?;
                self.store.write_block(op, vcn, &buf)?;
            }
            self.dirty.remove(&vcn);
        }
        if self.root_dirty {
            let bytes = self.root.to_bytes()?;
            self.store.write_root(op, &bytes)?;
            self.root_dirty = false;
        }
        if self.bitmap_dirty {
            self.store.write_bitmap(op, self.bitmap.as_bytes())?;
            self.bitmap_dirty = false;
        }
        Ok(())
    }
}

fn detached(entry: &IndexEntry) -> IndexEntry {
    let mut e = entry.clone();
    e.set_child_vcn(None);
    e
}
