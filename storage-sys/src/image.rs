// SPDX-License-Identifier: GPL-3.0-only

//! Local image collaborators
//!
//! Standalone runs work on images and block devices already present on this
//! host: destination images are sparse files, and "mounting" a source disk
//! hands back its local path unchanged.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use storage_contracts::{DiskMounter, ImageAllocator, MountSession, StorageError, StorageErrorKind};
use storage_types::SourceDisk;
use tracing::{debug, info};

/// Allocates destination images as sparse files
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalImageAllocator;

impl ImageAllocator for LocalImageAllocator {
    fn allocate_empty_image(&self, path: &Path, capacity: u64) -> Result<(), StorageError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    StorageError::new(
                        StorageErrorKind::PermissionDenied,
                        format!("Cannot create image {}", path.display()),
                    )
                } else {
                    StorageError::from(e)
                }
            })?;
        file.set_len(capacity)?;
        file.sync_all()?;

        info!(path = %path.display(), capacity, "allocated empty image");
        Ok(())
    }
}

/// Exposes source disks that are local paths (image files or block devices)
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalImageMounter;

impl DiskMounter for LocalImageMounter {
    fn mount_disks_readonly(
        &self,
        disks: &[SourceDisk],
        disk_only: bool,
    ) -> Result<Box<dyn MountSession>, StorageError> {
        if !disk_only {
            return Err(StorageError::new(
                StorageErrorKind::Unsupported,
                "local sources can only be exposed in disk-only mode",
            ));
        }

        let mut mounts = BTreeMap::new();
        for disk in disks {
            let path = PathBuf::from(&disk.source);
            if !path.exists() {
                return Err(StorageError::not_found(format!(
                    "source disk {} does not exist",
                    disk.source
                )));
            }
            mounts.insert(disk.source.clone(), path);
        }

        debug!(count = mounts.len(), "exposed local source disks");
        Ok(Box::new(LocalMountSession { mounts }))
    }
}

struct LocalMountSession {
    mounts: BTreeMap<String, PathBuf>,
}

impl MountSession for LocalMountSession {
    fn mounts(&self) -> &BTreeMap<String, PathBuf> {
        &self.mounts
    }

    fn release(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}
