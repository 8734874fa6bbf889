mod common;

use std::sync::Arc;

use ntfs_core::{
    AttributeFlags, AttributeIndexStore, AttributeRecord, AttributeType, CollationRule,
    FileRecordReference, Index, NtfsAttribute, NtfsError, Operation, TypedIndex, UpperCase,
    MemoryIndexStore, VolumeParams,
};

const I30: Option<&str> = Some("$I30");

fn file_name_key(name: &str) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let mut key = vec![0u8; 0x42 + units.len() * 2];
    key[0x40] = units.len() as u8;
    for (i, u) in units.iter().enumerate() {
        key[0x42 + i * 2..0x44 + i * 2].copy_from_slice(&u.to_le_bytes());
    }
    key
}

fn index_parts() -> (AttributeRecord, NtfsAttribute, AttributeRecord) {
    let root = AttributeRecord::new_resident(AttributeType::INDEX_ROOT, I30, 0, false, AttributeFlags::empty()).unwrap();
    let alloc = AttributeRecord::new_non_resident(
        AttributeType::INDEX_ALLOCATION,
        I30,
        1,
        AttributeFlags::empty(),
        0,
        vec![],
        0,
    ).unwrap();
    let bitmap = AttributeRecord::new_resident(AttributeType::BITMAP, I30, 2, false, AttributeFlags::empty()).unwrap();
    (root, NtfsAttribute::new(FileRecordReference::new(5, 5), alloc), bitmap)
}

#[test]
fn directory_index_on_disk() {
    let params = common::small_params();
    let mut vol = common::volume(params, 2048);
    let op = Operation::new(7);
    let upcase = Arc::new(UpperCase::default());

    let (root, alloc, bitmap) = index_parts();
    let store = AttributeIndexStore::new(&mut vol, root, alloc, bitmap, 0x200).unwrap();
    let mut dir = Index::create(store, params, AttributeType::FILE_NAME, CollationRule::Filename, upcase.clone(), &op)
        .unwrap();
    for i in 0..150u64 {
        let name = format!("file{:03}.dat", i);
        dir.insert(&op, &file_name_key(&name), &FileRecordReference::new(100 + i, 1).to_bytes())
            .unwrap();
    }
    for i in (0..150u64).step_by(3) {
        let name = format!("FILE{:03}.DAT", i);
        assert!(dir.remove(&op, &file_name_key(&name)).unwrap());
    }
    let (root, alloc, bitmap) = dir.into_store().into_parts();
    assert!(alloc.length() >= 4 * params.index_buffer_size as u64);
    assert_eq!(alloc.last_modified(), Some(7));

    let store = AttributeIndexStore::new(&mut vol, root, alloc, bitmap, 0x200).unwrap();
    let dir = Index::open(store, params, upcase).unwrap();
    assert!(dir.is_file_index());
    assert_eq!(dir.len().unwrap(), 100);

    let hit = dir.get(&file_name_key("File043.Dat")).unwrap().unwrap();
    assert_eq!(FileRecordReference::read(&hit, 0).unwrap(), FileRecordReference::new(143, 1));
    assert_eq!(dir.get(&file_name_key("file042.dat")).unwrap(), None);

    let names: Vec<Vec<u8>> = dir.entries().unwrap().iter().map(|e| e.key().to_vec()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[test]
fn torn_index_block_on_disk_fails_the_listing() {
    let params = common::small_params();
    let mut vol = common::volume(params, 1024);
    let op = Operation::new(8);
    let upcase = Arc::new(UpperCase::default());

    let (root, alloc, bitmap) = index_parts();
    let store = AttributeIndexStore::new(&mut vol, root, alloc, bitmap, 0x200).unwrap();
    let mut dir = Index::create(store, params, AttributeType::FILE_NAME, CollationRule::Filename, upcase.clone(), &op)
        .unwrap();
    for i in 0..60u64 {
        let name = format!("n{:02}", i);
        dir.insert(&op, &file_name_key(&name), &FileRecordReference::new(200 + i, 1).to_bytes())
            .unwrap();
    }
    let (root, alloc, bitmap) = dir.into_store().into_parts();

    // flip the last byte of the first sector of block 0
    let (lcn, _) = alloc.clusters().unwrap()[0];
    let mut cluster = vec![0u8; params.bytes_per_cluster() as usize];
    vol.read_clusters(lcn as u64, &mut cluster).unwrap();
    cluster[511] ^= 0x01;
    vol.write_clusters(lcn as u64, &cluster).unwrap();

    let store = AttributeIndexStore::new(&mut vol, root, alloc, bitmap, 0x200).unwrap();
    let dir = Index::open(store, params, upcase).unwrap();
    assert_eq!(dir.entries().err(), Some(NtfsError::FixupMismatch { sector: 0 }));
}

#[test]
fn security_id_view_with_default_geometry() {
    common::init_logging();
    let op = Operation::new(11);
    let index = Index::create(
        MemoryIndexStore::new(0x180),
        VolumeParams::default(),
        AttributeType(0),
        CollationRule::UnsignedLong,
        Arc::new(UpperCase::default()),
        &op,
    )
    .unwrap();
    let mut sii: TypedIndex<_, u32, u64> = TypedIndex::new(index);
    for id in (0x100..0x400u32).rev() {
        sii.insert(&op, &id, &(id as u64 * 0x50)).unwrap();
    }
    assert_eq!(sii.len().unwrap(), 0x300);
    assert_eq!(sii.get(&0x2FF).unwrap(), Some(0x2FF * 0x50));

    let window = sii
        .find_all(|k| {
            if *k < 0x200 {
                std::cmp::Ordering::Greater
            } else if *k > 0x20F {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Equal
            }
        })
        .unwrap();
    assert_eq!(window.len(), 16);
    assert_eq!(window[0], (0x200, 0x200 * 0x50));
}
