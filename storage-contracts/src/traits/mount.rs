// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;
use std::path::PathBuf;

use storage_types::SourceDisk;

use crate::StorageError;

/// Exposes remote source disks as local paths
pub trait DiskMounter: Send + Sync {
    /// Mount every disk read-only. With `disk_only` set only the block
    /// structure is exposed, no filesystem inside the disk is mounted.
    fn mount_disks_readonly(
        &self,
        disks: &[SourceDisk],
        disk_only: bool,
    ) -> Result<Box<dyn MountSession>, StorageError>;
}

/// Live mounts handed out by a [`DiskMounter`]
///
/// Dropping a session without calling [`MountSession::release`] must still
/// release the mounts.
pub trait MountSession {
    /// Source identifier to local path (a block device or an image file)
    fn mounts(&self) -> &BTreeMap<String, PathBuf>;

    fn release(self: Box<Self>) -> Result<(), StorageError>;
}
