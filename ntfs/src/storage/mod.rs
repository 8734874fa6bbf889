pub mod block;
pub mod ramdisk;

pub use block::{check_io_args, BlockDevice};
pub use ramdisk::RamDisk;
