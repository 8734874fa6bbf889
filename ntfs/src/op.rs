//! Operation context.

/// A caller-driven logical operation.
///
/// Every metadata update performed on behalf of the operation stamps the same
/// timestamp (NT time: 100ns ticks since 1601-01-01 UTC), so a whole mutation
/// shares one modification time regardless of how many structures it touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Operation {
    timestamp: u64,
}

impl Operation {
    pub const fn new(timestamp: u64) -> Self {
        Self { timestamp }
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}
