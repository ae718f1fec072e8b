//! LVM (Logical Volume Manager) types
//!
//! Types for volume groups, logical volume segment maps and physical volumes,
//! as far as extent discovery needs them: every logical extent has to be
//! traced back to a byte range on one attached disk.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ByteRange;

/// Volume group information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGroupInfo {
    /// Volume group name
    pub name: String,

    /// Volume group UUID
    pub uuid: String,

    /// Physical extent size in bytes
    pub extent_size: u64,

    /// Number of physical volumes recorded in the VG metadata
    pub pv_count: u32,

    /// Number of logical volumes
    pub lv_count: u32,

    /// Physical volumes LVM itself reports as missing
    pub missing_pv_count: u32,

    /// Device paths of the physical volumes that were found
    pub members: Vec<String>,
}

impl VolumeGroupInfo {
    /// Convert an extent count to bytes
    pub fn extents_to_bytes(&self, extents: u64) -> u64 {
        extents.saturating_mul(self.extent_size)
    }
}

/// One contiguous run of a logical volume on one physical volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalSegment {
    /// First logical extent of the segment within the LV
    pub start_extent: u64,

    /// Length in extents
    pub extent_count: u64,

    /// Physical volume holding the segment
    pub pv_name: String,

    /// First physical extent on that PV
    pub pv_start_extent: u64,

    /// Segment type ("linear", "striped", "raid1", ...)
    pub segtype: String,
}

/// Logical volume information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolumeInfo {
    /// Logical volume name
    pub name: String,

    /// Parent volume group name
    pub vg_name: String,

    /// Device path (e.g., "/dev/vg0/lv0"), empty for hidden sub-volumes
    pub device_path: String,

    /// Segment map, in logical extent order
    pub segments: Vec<LogicalSegment>,
}

impl LogicalVolumeInfo {
    /// Get a display name for this logical volume
    pub fn display_name(&self) -> String {
        if !self.vg_name.is_empty() && !self.name.is_empty() {
            format!("{}/{}", self.vg_name, self.name)
        } else if let Some(stripped) = self.device_path.strip_prefix("/dev/") {
            stripped.to_string()
        } else {
            self.device_path.clone()
        }
    }

    /// Allocated extents across all segments
    pub fn extent_count(&self) -> u64 {
        self.segments.iter().map(|seg| seg.extent_count).sum()
    }
}

/// Allocation record of a physical volume (`pvs --segments`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvSegment {
    /// First physical extent
    pub start: u64,

    /// Length in extents
    pub size: u64,

    /// Owning logical volume, `None` for free space
    pub lv_name: Option<String>,
}

/// Physical volume information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalVolumeInfo {
    /// Device path (e.g., "/dev/loop0p2")
    pub device: String,

    /// Physical volume UUID
    pub uuid: String,

    /// Parent volume group name (None if not in a VG)
    pub vg_name: Option<String>,

    /// `pv_size` as LVM reports it. For a group member this is the data
    /// area only (`pe_count * extent_size`), excluding `pe_start`.
    pub size: u64,

    /// Offset of the first physical extent from the start of the PV
    pub pe_start: u64,

    /// Offset of the PV device on its disk (0 for whole-disk PVs)
    pub device_offset: u64,

    /// Whole-disk device holding the PV, once resolved to an attached disk
    pub disk: Option<String>,

    /// LVM flags the device as missing (or could not name it at all)
    pub missing: bool,

    /// Allocation map
    pub segments: Vec<PvSegment>,
}

impl PhysicalVolumeInfo {
    /// Disk byte offset of physical extent 0
    pub fn data_offset(&self) -> u64 {
        self.device_offset + self.pe_start
    }

    /// Label and metadata area at the head of the PV, in disk bytes
    pub fn metadata_range(&self) -> ByteRange {
        ByteRange::new(self.device_offset, self.pe_start)
    }

    /// Disk bytes taken by the PV: label area plus data area for group
    /// members, the reported size for orphans
    pub fn footprint(&self) -> ByteRange {
        let length = if self.vg_name.is_some() {
            self.pe_start.saturating_add(self.size)
        } else {
            self.size
        };
        ByteRange::new(self.device_offset, length)
    }

    /// Extents owned by some LV according to the PV's own allocation map
    pub fn allocated_extents(&self) -> u64 {
        self.segments
            .iter()
            .filter(|seg| seg.lv_name.is_some())
            .map(|seg| seg.size)
            .sum()
    }

    pub fn is_whole_disk(&self) -> bool {
        self.disk.as_deref() == Some(self.device.as_str())
    }
}

/// A volume group whose physical volumes are not all available
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteVolumeGroup {
    pub name: String,

    /// What made the group unusable
    pub reason: String,

    /// Attached disks carrying at least one PV of the group
    pub disks: Vec<String>,
}

/// Everything LVM reported that concerns the attached disks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvmTopology {
    /// Complete volume groups touching the attached disks
    pub volume_groups: BTreeMap<String, VolumeGroupInfo>,

    /// Logical volumes of those groups
    pub logical_volumes: Vec<LogicalVolumeInfo>,

    /// Physical volumes, keyed by device path
    pub physical_volumes: BTreeMap<String, PhysicalVolumeInfo>,

    /// Groups that touch the attached disks but cannot be reconstructed
    pub incomplete: Vec<IncompleteVolumeGroup>,

    /// Set when the reserved host group was seen and left out
    pub reserved_skipped: bool,

    /// Physical volumes of the reserved group found on attached disks, never copied
    pub reserved: BTreeMap<String, PhysicalVolumeInfo>,
}
