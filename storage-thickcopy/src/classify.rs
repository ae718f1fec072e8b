// SPDX-License-Identifier: GPL-3.0-only

//! Resource classification
//!
//! Buckets every attached disk and partition by how it is copied. A
//! partition belongs to LVM when a physical volume sits at its start offset
//! on the same disk; a whole-disk physical volume claims the disk no matter
//! what partition table remnants are found on it. Physical volumes of the
//! reserved group are left out of every bucket.

use storage_types::{
    BlockDevice, ByteRange, Classification, DiskResource, LvmTopology, PartitionTable, PhysicalVolumeInfo,
    ResourceKind, UnreadableDisk,
};
use tracing::debug;

/// An attached disk and the outcome of reading its partition table
#[derive(Debug, Clone)]
pub struct ProbedDisk {
    pub device: BlockDevice,
    pub table: Result<PartitionTable, String>,
}

impl ProbedDisk {
    pub fn path(&self) -> &str {
        &self.device.path
    }

    pub fn capacity(&self) -> u64 {
        self.device.capacity
    }
}

pub fn classify(disks: &[ProbedDisk], topology: &LvmTopology) -> Classification {
    let mut classification = Classification::default();

    for disk in disks {
        let on_disk = |pv: &&PhysicalVolumeInfo| pv.disk.as_deref() == Some(disk.path());
        let pvs: Vec<&PhysicalVolumeInfo> = topology.physical_volumes.values().filter(on_disk).collect();
        let reserved: Vec<&PhysicalVolumeInfo> = topology.reserved.values().filter(on_disk).collect();

        if reserved.iter().any(|pv| pv.is_whole_disk()) {
            debug!(disk = disk.path(), "disk belongs to the reserved volume group");
            continue;
        }

        if let Some(pv) = pvs.iter().find(|pv| pv.is_whole_disk()) {
            if disk.table.as_ref().is_ok_and(|table| !table.is_empty()) {
                debug!(disk = disk.path(), "ignoring partition table remnants on whole-disk PV");
            }
            classification.push(DiskResource {
                kind: ResourceKind::LvmDisk,
                disk: disk.path().to_string(),
                device: pv.device.clone(),
                ranges: vec![pv.footprint()],
                vg_name: pv.vg_name.clone(),
            });
            continue;
        }

        let table = match &disk.table {
            Ok(table) => table,
            Err(error) => {
                classification.unreadable.push(UnreadableDisk {
                    disk: disk.path().to_string(),
                    error: error.clone(),
                });
                continue;
            }
        };

        if table.is_empty() && pvs.is_empty() && reserved.is_empty() {
            classification.push(DiskResource {
                kind: ResourceKind::RawDisk,
                disk: disk.path().to_string(),
                device: disk.path().to_string(),
                ranges: vec![ByteRange::new(0, disk.capacity())],
                vg_name: None,
            });
            continue;
        }

        classify_partitions(disk, table, &pvs, &reserved, &mut classification);
    }

    classification
}

fn classify_partitions(
    disk: &ProbedDisk,
    table: &PartitionTable,
    pvs: &[&PhysicalVolumeInfo],
    reserved: &[&PhysicalVolumeInfo],
    classification: &mut Classification,
) {
    // Reserved PVs count as LVM space so that nothing copies them
    let mut lvm_ranges: Vec<ByteRange> = reserved
        .iter()
        .map(|pv| pv.footprint())
        .collect();
    let mut claimed = Vec::new();

    for entry in table.entries.iter().filter(|entry| !entry.is_extended()) {
        let range = entry.byte_range(table.sector_size);
        if let Some(pv) = reserved.iter().find(|pv| pv.device_offset == range.start) {
            debug!(device = %entry.device, pv = %pv.device, "skipping reserved physical volume");
            lvm_ranges.push(range);
            continue;
        }
        if let Some(pv) = pvs.iter().find(|pv| pv.device_offset == range.start) {
            lvm_ranges.push(range);
            claimed.push(pv.device.as_str());
            classification.push(DiskResource {
                kind: ResourceKind::LvmPartition,
                disk: disk.path().to_string(),
                device: entry.device.clone(),
                ranges: vec![range],
                vg_name: pv.vg_name.clone(),
            });
        }
    }

    // PVs LVM sees on this disk that the table does not list
    for pv in pvs.iter().filter(|pv| !claimed.contains(&pv.device.as_str())) {
        let range = pv.footprint();
        lvm_ranges.push(range);
        classification.push(DiskResource {
            kind: ResourceKind::LvmPartition,
            disk: disk.path().to_string(),
            device: pv.device.clone(),
            ranges: vec![range],
            vg_name: pv.vg_name.clone(),
        });
    }

    for entry in &table.entries {
        let range = entry.byte_range(table.sector_size);
        if lvm_ranges.contains(&range) && !entry.is_extended() {
            continue;
        }

        // Extended containers keep their EBR chain but not the LVM data nested in them
        let ranges = if entry.is_extended() {
            range.subtract(&lvm_ranges)
        } else {
            vec![range]
        };
        if ranges.is_empty() {
            continue;
        }

        classification.push(DiskResource {
            kind: ResourceKind::RegularPartition,
            disk: disk.path().to_string(),
            device: entry.device.clone(),
            ranges,
            vg_name: None,
        });
    }
}
