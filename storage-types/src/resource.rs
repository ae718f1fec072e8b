//! Classified disk resources
//!
//! Every attached disk, and every partition on it, ends up in exactly one
//! bucket. The bucket decides how the bytes are copied.

use serde::{Deserialize, Serialize};

use crate::ByteRange;

/// How a resource is copied
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// The whole disk is an LVM physical volume
    LvmDisk,

    /// A partition holding an LVM physical volume
    LvmPartition,

    /// A partition not claimed by LVM
    RegularPartition,

    /// A disk with no partition table that is not a physical volume
    RawDisk,
}

impl ResourceKind {
    pub fn is_lvm(&self) -> bool {
        matches!(self, Self::LvmDisk | Self::LvmPartition)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LvmDisk => "lvm-disk",
            Self::LvmPartition => "lvm-partition",
            Self::RegularPartition => "regular-partition",
            Self::RawDisk => "raw-disk",
        }
    }
}

/// One classified disk or partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskResource {
    pub kind: ResourceKind,

    /// Whole-disk device the resource lives on
    pub disk: String,

    /// Device node of the resource (the disk itself for whole-disk resources)
    pub device: String,

    /// Bytes the resource spans on the disk, after clipping nested LVM partitions
    pub ranges: Vec<ByteRange>,

    /// Volume group of LVM resources
    pub vg_name: Option<String>,
}

impl DiskResource {
    pub fn size(&self) -> u64 {
        self.ranges.iter().map(ByteRange::size).sum()
    }
}

/// A disk whose partition table could not be read and that LVM does not explain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadableDisk {
    pub disk: String,
    pub error: String,
}

/// Classifier output: four disjoint buckets plus the disks that could not be classified
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub lvm_disks: Vec<DiskResource>,
    pub lvm_partitions: Vec<DiskResource>,
    pub regular_partitions: Vec<DiskResource>,
    pub raw_disks: Vec<DiskResource>,
    pub unreadable: Vec<UnreadableDisk>,
}

impl Classification {
    pub fn push(&mut self, resource: DiskResource) {
        match resource.kind {
            ResourceKind::LvmDisk => self.lvm_disks.push(resource),
            ResourceKind::LvmPartition => self.lvm_partitions.push(resource),
            ResourceKind::RegularPartition => self.regular_partitions.push(resource),
            ResourceKind::RawDisk => self.raw_disks.push(resource),
        }
    }

    /// Every classified resource, LVM buckets first
    pub fn resources(&self) -> impl Iterator<Item = &DiskResource> {
        self.lvm_disks
            .iter()
            .chain(&self.lvm_partitions)
            .chain(&self.regular_partitions)
            .chain(&self.raw_disks)
    }

    pub fn non_lvm(&self) -> impl Iterator<Item = &DiskResource> {
        self.regular_partitions.iter().chain(&self.raw_disks)
    }

    pub fn has_non_lvm(&self) -> bool {
        !self.regular_partitions.is_empty() || !self.raw_disks.is_empty()
    }
}
