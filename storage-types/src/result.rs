//! Per-VM discovery outcome
//!
//! A result is either `Ready`, with an extents file per disk that has data,
//! or `Void`, in which case every disk reports zero bytes and no files. Zero
//! is the signal callers use to fall back to a full copy.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::SECTOR_SIZE;

/// Why a VM's thick copy is unavailable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VoidReason {
    /// A disk could not be mounted or its partition table parsed
    DeviceUnreadable { device: String, detail: String },

    /// A volume group references a physical volume outside the mounted disks
    IncompleteVolumeGroup { vg_name: String, detail: String },

    /// An LVM or partition utility failed
    ToolInvocationFailure { command: String, detail: String },

    /// A non-LVM resource was found while the fallback policy is active
    NonLvmPolicy { device: String },

    /// A computed range does not fit its disk or physical volume
    OutOfBounds { device: String, start: u64, length: u64 },

    /// Writing an extents file failed
    WriteFailed { path: PathBuf, detail: String },
}

impl fmt::Display for VoidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceUnreadable { device, detail } => {
                write!(f, "device {device} unreadable: {detail}")
            }
            Self::IncompleteVolumeGroup { vg_name, detail } => {
                write!(f, "volume group {vg_name} incomplete: {detail}")
            }
            Self::ToolInvocationFailure { command, detail } => {
                write!(f, "`{command}` failed: {detail}")
            }
            Self::NonLvmPolicy { device } => {
                write!(f, "{device} is not LVM and the fallback policy is active")
            }
            Self::OutOfBounds {
                device,
                start,
                length,
            } => write!(f, "range {start}+{length} is out of bounds on {device}"),
            Self::WriteFailed { path, detail } => {
                write!(f, "failed to write {}: {detail}", path.display())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ThickCopyStatus {
    Ready,
    Void(VoidReason),
}

impl ThickCopyStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Outcome for one source disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskExtents {
    /// Extents file handed to the byte-range copier, absent when there is nothing to copy
    pub extents_file: Option<PathBuf>,

    /// Bytes covered by the extents file
    pub total_bytes: u64,

    /// `total_bytes` in 512-byte blocks
    pub total_blocks: u64,

    /// Partition table and PV label ranges, copied separately
    pub metadata_file: Option<PathBuf>,

    pub metadata_bytes: u64,
}

impl DiskExtents {
    pub fn with_totals(extents_file: Option<PathBuf>, total_bytes: u64) -> Self {
        Self {
            extents_file,
            total_bytes,
            total_blocks: total_bytes.div_ceil(SECTOR_SIZE),
            metadata_file: None,
            metadata_bytes: 0,
        }
    }
}

/// Discovery outcome for every disk of one VM, keyed by source identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThickCopyResult {
    pub vm_id: String,
    pub status: ThickCopyStatus,
    pub disks: BTreeMap<String, DiskExtents>,
}

impl ThickCopyResult {
    /// Zero result for every listed disk
    pub fn void<'a>(
        vm_id: impl Into<String>,
        sources: impl IntoIterator<Item = &'a str>,
        reason: VoidReason,
    ) -> Self {
        Self {
            vm_id: vm_id.into(),
            status: ThickCopyStatus::Void(reason),
            disks: sources
                .into_iter()
                .map(|source| (source.to_string(), DiskExtents::default()))
                .collect(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    pub fn total_bytes(&self) -> u64 {
        self.disks.values().map(|disk| disk.total_bytes).sum()
    }

    pub fn total_blocks(&self, source: &str) -> u64 {
        self.disks.get(source).map_or(0, |disk| disk.total_blocks)
    }

    pub fn extents_file(&self, source: &str) -> Option<&PathBuf> {
        self.disks
            .get(source)
            .and_then(|disk| disk.extents_file.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn void_result_zeroes_every_disk() {
        let result = ThickCopyResult::void(
            "vm-1",
            ["[ds] a.vmdk", "[ds] b.vmdk"],
            VoidReason::IncompleteVolumeGroup {
                vg_name: "vg0".to_string(),
                detail: "1 missing".to_string(),
            },
        );
        assert!(!result.is_ready());
        assert_eq!(result.disks.len(), 2);
        assert_eq!(result.total_bytes(), 0);
        assert_eq!(result.total_blocks("[ds] b.vmdk"), 0);
        assert!(result.extents_file("[ds] a.vmdk").is_none());
    }

    #[test]
    fn blocks_round_up_to_sectors() {
        assert_eq!(DiskExtents::with_totals(None, 1024).total_blocks, 2);
        assert_eq!(DiskExtents::with_totals(None, 1025).total_blocks, 3);
    }

    #[test]
    fn status_serializes_with_reason() {
        let status = ThickCopyStatus::Void(VoidReason::NonLvmPolicy {
            device: "/dev/loop0".to_string(),
        });
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "void");
        assert_eq!(json["reason"]["kind"], "non_lvm_policy");
    }
}
