mod common;

use ntfs_core::{
    AttributeExtent, AttributeFlags, AttributeList, AttributeType, FileRecord, FileRecordReference,
    FixupRecord, NtfsAttribute, Operation,
};

fn pattern(len: usize, seed: u32) -> Vec<u8> {
    (0..len as u32).map(|i| ((i * 13 + seed) % 251) as u8).collect()
}

#[test]
fn data_survives_a_file_record_round_trip() {
    let params = common::small_params();
    let mut vol = common::volume(params, 512);
    let op = Operation::new(100);

    let mut rec = FileRecord::new(params.mft_record_size, 42, 3);
    let id = rec
        .create_non_resident_attribute(&op, AttributeType::DATA, None, AttributeFlags::empty(), 0, vec![], 0)
        .unwrap();
    let mut data = NtfsAttribute::new(rec.reference(), rec.attribute(id).unwrap().clone());

    let payload = pattern(5000, 1);
    data.write(&op, &mut vol, 0, &payload).unwrap();
    *rec.attribute_mut(id).unwrap() = data.primary().clone();

    let mut buf = vec![0u8; params.mft_record_size as usize];
    rec.to_bytes(&mut buf).unwrap();
    let back = FileRecord::from_bytes(&buf, ()).unwrap();
    assert_eq!(back.reference(), FileRecordReference::new(42, 3));

    let attr = back.find_attribute(AttributeType::DATA, None).unwrap().clone();
    assert_eq!(attr.data_length(), 5000);
    let data = NtfsAttribute::new(back.reference(), attr);
    let mut out = vec![0u8; 5000];
    assert_eq!(data.read(&vol, 0, &mut out).unwrap(), 5000);
    assert_eq!(out, payload);
}

#[test]
fn fragmented_attribute_spans_two_records() {
    let params = common::small_params();
    let mut vol = common::volume(params, 512);
    let op = Operation::new(5);
    let base = FileRecordReference::new(60, 1);
    let overflow = FileRecordReference::new(61, 1);

    let empty = |id| {
        ntfs_core::AttributeRecord::new_non_resident(
            AttributeType::DATA,
            None,
            id,
            AttributeFlags::empty(),
            0,
            vec![],
            0,
        ).unwrap()
    };
    let mut a = NtfsAttribute::new(base, empty(1));
    let mut b = NtfsAttribute::new(FileRecordReference::new(70, 1), empty(1));

    // interleave allocations so `a` ends up in many runs
    let payload = pattern(512 * 8, 7);
    for (i, chunk) in payload.chunks(512).enumerate() {
        a.write(&op, &mut vol, (i * 512) as u64, chunk).unwrap();
        b.write(&op, &mut vol, (i * 512) as u64, &[0xBB; 512]).unwrap();
    }
    let run_count = a.primary().non_resident().unwrap().runs.len();
    assert!(run_count >= 4, "expected a fragmented attribute, got {} runs", run_count);

    let second = a.split_extent(0, 2, overflow).unwrap();
    assert_eq!(a.extents().len(), 2);
    let split_vcn = a.extents()[second].record.start_vcn();
    assert_eq!(a.extents()[0].record.last_vcn(), split_vcn - 1);

    let mut list = AttributeList::new();
    for rec in a.to_attribute_list_records() {
        list.insert(rec);
    }
    let list = AttributeList::from_bytes(&list.to_bytes().unwrap()).unwrap();
    let found: Vec<_> = list.find(AttributeType::DATA, None).collect();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].start_vcn, 0);
    assert_eq!(found[1].start_vcn, split_vcn as u64);
    assert_eq!(found[1].base_file_reference, overflow);

    // reassemble from the two records, listed out of order
    let mut extents: Vec<AttributeExtent> = a.extents().to_vec();
    extents.reverse();
    let joined = NtfsAttribute::from_extents(extents).unwrap();
    assert_eq!(joined.length(), payload.len() as u64);
    let mut out = vec![0u8; payload.len()];
    joined.read(&vol, 0, &mut out).unwrap();
    assert_eq!(out, payload);
}

#[test]
fn growing_a_split_attribute_extends_the_last_extent() {
    let params = common::small_params();
    let mut vol = common::volume(params, 512);
    let op = Operation::new(6);
    let rec = ntfs_core::AttributeRecord::new_non_resident(
        AttributeType::DATA,
        Some("stream"),
        3,
        AttributeFlags::empty(),
        0,
        vec![],
        0,
    ).unwrap();
    let mut a = NtfsAttribute::new(FileRecordReference::new(80, 1), rec);
    let mut filler = NtfsAttribute::new(
        FileRecordReference::new(81, 1),
        ntfs_core::AttributeRecord::new_non_resident(
            AttributeType::DATA,
            None,
            1,
            AttributeFlags::empty(),
            0,
            vec![],
            0,
        ).unwrap(),
    );
    for i in 0..4u64 {
        a.write(&op, &mut vol, i * 512, &[i as u8 + 1; 512]).unwrap();
        filler.write(&op, &mut vol, i * 512, &[0; 512]).unwrap();
    }
    a.split_extent(0, 2, FileRecordReference::new(82, 1)).unwrap();

    a.write(&op, &mut vol, 4 * 512, &[9; 512]).unwrap();
    assert_eq!(a.extents().len(), 2);
    assert_eq!(a.extents()[1].record.last_vcn(), 4);
    assert_eq!(a.length(), 5 * 512);

    let mut out = vec![0u8; 5 * 512];
    a.read(&vol, 0, &mut out).unwrap();
    for (i, chunk) in out.chunks(512).enumerate() {
        let want = if i == 4 { 9 } else { i as u8 + 1 };
        assert!(chunk.iter().all(|&b| b == want), "cluster {}", i);
    }
}

#[test]
fn oversized_names_and_lengths_are_rejected() {
    let params = common::small_params();
    let mut vol = common::volume(params, 512);
    let op = Operation::new(7);
    let mut rec = FileRecord::new(params.mft_record_size, 90, 1);

    let too_long = "n".repeat(256);
    assert!(rec
        .create_non_resident_attribute(&op, AttributeType::DATA, Some(too_long.as_str()), AttributeFlags::empty(), 0, vec![], 0)
        .is_err());

    let widest = "n".repeat(255);
    let id = rec
        .create_non_resident_attribute(&op, AttributeType::DATA, Some(widest.as_str()), AttributeFlags::empty(), 0, vec![], 0)
        .unwrap();
    let mut data = NtfsAttribute::new(rec.reference(), rec.attribute(id).unwrap().clone());
    data.write(&op, &mut vol, 0, &pattern(600, 3)).unwrap();

    let free = vol.bitmap().free_clusters();
    assert!(data.write(&op, &mut vol, u64::MAX - 1, &[1, 2]).is_err());
    assert!(data.set_length(&op, &mut vol, u64::MAX).is_err());
    assert_eq!(data.length(), 600);
    assert_eq!(vol.bitmap().free_clusters(), free);

    *rec.attribute_mut(id).unwrap() = data.primary().clone();
    let mut buf = vec![0u8; params.mft_record_size as usize];
    rec.to_bytes(&mut buf).unwrap();
    let back = FileRecord::from_bytes(&buf, ()).unwrap();
    let attr = back.find_attribute(AttributeType::DATA, Some(widest.as_str())).unwrap();
    assert_eq!(attr.data_length(), 600);
}
