use serde::{Deserialize, Serialize};

use crate::ByteRange;

/// A byte range on one attached disk that must be copied
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExtentRange {
    /// Whole-disk device the range lives on
    pub disk: String,

    /// Start byte
    pub start: u64,

    /// Length in bytes
    pub length: u64,
}

impl ExtentRange {
    pub fn new(disk: impl Into<String>, start: u64, length: u64) -> Self {
        Self {
            disk: disk.into(),
            start,
            length,
        }
    }

    pub fn from_range(disk: impl Into<String>, range: ByteRange) -> Self {
        Self::new(disk, range.start, range.size())
    }

    pub fn range(&self) -> ByteRange {
        ByteRange::new(self.start, self.length)
    }

    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }
}
