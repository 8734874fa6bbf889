//! NTFS data-addressing and indexing core.
//!
//! This crate implements the layer of NTFS that sits between raw clusters on a
//! block device and the file/directory abstractions above it:
//!
//! - Data runs and cluster run lists (VCN -> LCN mapping, sparse holes)
//! - Cluster streams (raw and compression-unit aware)
//! - Attribute records (resident and non-resident) and attribute lists
//! - Multi-extent attributes and their byte-addressable buffers
//! - Fixup-protected records (`FILE` and `INDX`)
//! - Index B+ trees (`$INDEX_ROOT` / `$INDEX_ALLOCATION`) with collation
//!
//! Mounting, journaling, security and the directory/file layers are out of
//! scope; callers compose those on top of the types exported here.
//!
//! References:
//! - https://flatcap.github.io/linux-ntfs/ntfs/
//! - https://wiki.osdev.org/NTFS

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod attribute;
pub mod bitmap;
pub mod cluster_stream;
pub mod codec;
pub mod error;
pub mod file_record;
pub mod file_ref;
pub mod fixup;
pub mod index;
pub mod op;
pub mod params;
pub mod run;
pub mod runlist;
pub mod storage;
pub mod volume;

pub use attribute::{
    AttributeBuffer, AttributeExtent, AttributeFlags, AttributeList, AttributeListRecord,
    AttributeRecord, AttributeType, NonResidentBuffer, NtfsAttribute,
};
pub use bitmap::{Bitmap, ClusterBitmap};
pub use cluster_stream::{
    ClusterStream, CompressionResult, Compressor, RawClusterStream, SparseClusterStream,
};
pub use error::{NtfsError, NtfsResult};
pub use file_record::{FileRecord, FileRecordFlags};
pub use file_ref::FileRecordReference;
pub use fixup::{FixupHeader, FixupRecord};
pub use index::{
    AttributeIndexStore, CollationRule, Collator, Index, IndexBlock, IndexCodec, IndexEntry,
    IndexEntryFlags, IndexHeader, IndexNode, IndexRoot, IndexStore, MemoryIndexStore,
    TypedIndex, UpperCase,
};
pub use op::Operation;
pub use params::VolumeParams;
pub use run::DataRun;
pub use runlist::{ClusterRunList, CookedDataRun};
pub use storage::{BlockDevice, RamDisk};
pub use volume::Volume;
