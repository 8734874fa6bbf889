//! Error kinds shared by every on-disk structure in the crate.

use thiserror::Error;

/// Errors raised while decoding, mutating or persisting NTFS structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NtfsError {
    /// A structure failed an internal consistency check.
    #[error("corrupt data: {0}")]
    CorruptData(&'static str),
    /// A record declares a length below the minimum for its kind.
    #[error("truncated record: declared {declared} bytes, minimum is {minimum}")]
    TruncatedRecord { declared: usize, minimum: usize },
    /// A sector's trailing update sequence number did not match the header.
    #[error("fixup mismatch in sector {sector}")]
    FixupMismatch { sector: usize },
    #[error("bad record magic")]
    BadMagic,
    /// A computed VCN, LCN or offset fell outside its valid range.
    #[error("out of range: {0}")]
    RangeError(&'static str),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("no space left")]
    NoSpace,
    #[error("device i/o failure")]
    Io,
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
}

pub type NtfsResult<T> = core::result::Result<T, NtfsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_display_carries_context() {
        let e = NtfsError::TruncatedRecord { declared: 0x10, minimum: 0x18 };
        assert_eq!(e.to_string(), "truncated record: declared 16 bytes, minimum is 24");
        assert_eq!(NtfsError::FixupMismatch { sector: 1 }.to_string(), "fixup mismatch in sector 1");
    }
}
