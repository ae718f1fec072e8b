//! Disk data models
//!
//! Source disks come from the caller, attached disks and block devices are
//! what the host exposes once a source disk is mounted.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ByteRange;

/// A virtual disk attached to the VM being backed up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDisk {
    /// Source identifier understood by the mount transport (e.g. a datastore path)
    pub source: String,

    /// Capacity in bytes
    pub capacity: u64,

    /// Where the empty destination image is allocated
    pub destination: PathBuf,
}

/// Every disk of one VM, processed together because volume groups can span disks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmDisks {
    pub vm_id: String,
    pub disks: Vec<SourceDisk>,
}

impl VmDisks {
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.disks.iter().map(|disk| disk.source.as_str())
    }
}

/// A block device visible on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Device path (e.g., "/dev/loop0" or "/dev/loop0p2")
    pub path: String,

    /// Size in bytes
    pub capacity: u64,

    /// Whole-disk device this partition lives on
    pub parent: Option<String>,

    /// Byte offset of this partition on its parent
    pub offset: Option<u64>,
}

impl BlockDevice {
    pub fn is_partition(&self) -> bool {
        self.parent.is_some()
    }

    /// Disk this device belongs to (itself for whole disks)
    pub fn disk(&self) -> &str {
        self.parent.as_deref().unwrap_or(&self.path)
    }

    /// Bytes this device occupies on its disk
    pub fn disk_range(&self) -> ByteRange {
        ByteRange::new(self.offset.unwrap_or(0), self.capacity)
    }
}

/// A source disk after mounting and loop attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedDisk {
    pub source: SourceDisk,

    /// Path handed back by the mount transport
    pub mount_path: PathBuf,

    /// Whole-disk block device holding the source (always a loop device)
    pub device: BlockDevice,
}

impl AttachedDisk {
    pub fn device_path(&self) -> &str {
        &self.device.path
    }
}
