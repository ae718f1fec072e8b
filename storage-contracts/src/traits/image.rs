// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use crate::StorageError;

/// Creates the destination image a thick copy is written into
pub trait ImageAllocator: Send + Sync {
    /// Create an empty image of exactly `capacity` bytes at `path`.
    fn allocate_empty_image(&self, path: &Path, capacity: u64) -> Result<(), StorageError>;
}
