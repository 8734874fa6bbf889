//! Data runs (mapping pairs).
//!
//! Each run starts with a header byte: the low nibble is the size of the
//! length field, the high nibble the size of the LCN offset field. Both fields
//! are little-endian two's complement. A zero offset size marks a sparse run,
//! and a zero header byte ends the list.

use alloc::vec::Vec;

use crate::codec::{read_var, var_len, write_var};
use crate::error::{NtfsError, NtfsResult};

/// One encoded run: a length in clusters and an LCN delta against the
/// previous non-sparse run of the same list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRun {
    pub offset: i64,
    pub length: i64,
    pub is_sparse: bool,
}

impl DataRun {
    pub fn new(offset: i64, length: i64, is_sparse: bool) -> Self {
        Self { offset, length, is_sparse }
    }

    pub fn sparse(length: i64) -> Self {
        Self { offset: 0, length, is_sparse: true }
    }

    fn field_sizes(&self) -> (usize, usize) {
        let length_size = var_len(self.length);
        let offset_size = if self.is_sparse {
            0
        } else {
            // an empty offset field would read back as sparse
            var_len(self.offset).max(1)
        };
        (length_size, offset_size)
    }

    /// Encoded size in bytes, header included.
    pub fn size(&self) -> usize {
        let (l, o) = self.field_sizes();
        1 + l + o
    }

    /// Decode one run. `Ok(None)` at the list terminator or end of buffer.
    pub fn read(buf: &[u8]) -> NtfsResult<Option<(DataRun, usize)>> {
        let Some(&header) = buf.first() else {
            return Ok(None);
        };
        if header == 0 {
            return Ok(None);
        }

        let length_size = (header & 0x0F) as usize;
        let offset_size = ((header >> 4) & 0x0F) as usize;
        let total = 1 + length_size + offset_size;
        if total > buf.len() {
            log::warn!("ntfs: data run runs past end of mapping pairs");
            return Err(NtfsError::CorruptData("data run beyond end of buffer"));
        }

        let length = read_var(&buf[1..1 + length_size])?;
        if length <= 0 {
            return Err(NtfsError::CorruptData("data run with non-positive length"));
        }
        let offset = read_var(&buf[1 + length_size..total])?;

        Ok(Some((
            DataRun {
                offset,
                length,
                is_sparse: offset_size == 0,
            },
            total,
        )))
    }

    /// Encode into `buf`, returning the bytes written.
    pub fn write(&self, buf: &mut [u8]) -> usize {
        let (l, o) = self.field_sizes();
        buf[0] = ((o as u8) << 4) | l as u8;
        write_var(&mut buf[1..], self.length, l);
        if o > 0 {
            write_var(&mut buf[1 + l..], self.offset, o);
        }
        1 + l + o
    }
}

/// Decode a full run list, stopping at the terminator.
pub fn decode_runs(buf: &[u8]) -> NtfsResult<Vec<DataRun>> {
    let mut runs = Vec::new();
    let mut pos = 0;
    while let Some((run, used)) = DataRun::read(&buf[pos..])? {
        runs.push(run);
        pos += used;
    }
    Ok(runs)
}

/// Encoded size of a run list, terminator included.
pub fn runs_size(runs: &[DataRun]) -> usize {
    runs.iter().map(DataRun::size).sum::<usize>() + 1
}

/// Encode a run list plus terminator, returning the bytes written.
pub fn encode_runs(runs: &[DataRun], buf: &mut [u8]) -> usize {
    let mut pos = 0;
    for run in runs {
        pos += run.write(&mut buf[pos..]);
    }
    buf[pos] = 0;
    pos + 1
}
