#![allow(dead_code)]

use std::sync::Arc;

use ntfs_core::{RamDisk, Volume, VolumeParams};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Fresh volume of `clusters` clusters on a RAM disk.
pub fn volume(params: VolumeParams, clusters: u64) -> Volume {
    init_logging();
    let sector = params.bytes_per_sector;
    let blocks = clusters * params.bytes_per_cluster() as u64 / sector as u64;
    let disk = Arc::new(RamDisk::new(sector, blocks));
    Volume::format(disk, params).unwrap()
}

/// 512-byte clusters, 1 KiB records and index buffers.
pub fn small_params() -> VolumeParams {
    VolumeParams::new(512, 1, 1024, 1024).unwrap()
}
