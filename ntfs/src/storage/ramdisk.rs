use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use super::block::{check_io_args, BlockDevice};
use crate::error::{NtfsError, NtfsResult};

/// Dispositivo de bloco em RAM (ótimo para testes do stack NTFS).
///
/// Implementação *thread-safe* via lock interno.
pub struct RamDisk {
    block_size: u32,
    data: Mutex<Vec<u8>>,
}

impl RamDisk {
    pub fn new(block_size: u32, num_blocks: u64) -> Self {
        let total = (block_size as u64 * num_blocks) as usize;
        Self {
            block_size,
            data: Mutex::new(vec![0; total]),
        }
    }

    /// Cópia do conteúdo inteiro (útil para inspecionar o disco em testes).
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn range(&self, len: usize, lba: u64, count: u32) -> NtfsResult<(usize, usize)> {
        let start = (lba as u128) * (self.block_size as u128);
        let end = start + (count as u128) * (self.block_size as u128);
        if end > len as u128 {
            return Err(NtfsError::RangeError("block beyond end of device"));
        }
        Ok((start as usize, end as usize))
    }
}

impl BlockDevice for RamDisk {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn num_blocks(&self) -> u64 {
        let g = self.data.lock();
        (g.len() as u64) / (self.block_size as u64)
    }

    fn read_blocks(&self, lba: u64, count: u32, out: &mut [u8]) -> NtfsResult<()> {
        check_io_args(self.block_size, count, out.len())?;
        let g = self.data.lock();
        let (s, e) = self.range(g.len(), lba, count)?;
        out.copy_from_slice(&g[s..e]);
        Ok(())
    }

    fn write_blocks(&self, lba: u64, count: u32, data: &[u8]) -> NtfsResult<()> {
        check_io_args(self.block_size, count, data.len())?;
        let mut g = self.data.lock();
        let (s, e) = self.range(g.len(), lba, count)?;
        g[s..e].copy_from_slice(data);
        Ok(())
    }
}
