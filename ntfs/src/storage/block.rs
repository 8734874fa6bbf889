use crate::error::{NtfsError, NtfsResult};

/// Interface genérica de dispositivo de bloco sob um volume NTFS.
pub trait BlockDevice: Send + Sync {
    /// Tamanho de bloco (normalmente 512 ou 4096).
    fn block_size(&self) -> u32;

    /// Número total de blocos.
    fn num_blocks(&self) -> u64;

    /// Lê `count` blocos a partir de `lba` para `out`.
    /// `out.len()` deve ser `count * block_size`.
    fn read_blocks(&self, lba: u64, count: u32, out: &mut [u8]) -> NtfsResult<()>;

    /// Escreve `count` blocos a partir de `lba` de `data`.
    fn write_blocks(&self, lba: u64, count: u32, data: &[u8]) -> NtfsResult<()>;

    /// Capacidade total em bytes.
    fn size_bytes(&self) -> u64 {
        self.num_blocks() * self.block_size() as u64
    }
}

pub fn check_io_args(block_size: u32, count: u32, buf_len: usize) -> NtfsResult<()> {
    let expected = (block_size as usize)
        .checked_mul(count as usize)
        .ok_or(NtfsError::InvalidParameter("block count overflow"))?;
    if expected != buf_len {
        return Err(NtfsError::InvalidParameter("buffer length is not count * block_size"));
    }
    Ok(())
}
