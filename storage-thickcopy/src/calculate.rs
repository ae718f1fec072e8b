// SPDX-License-Identifier: GPL-3.0-only

//! Extent calculation
//!
//! LVM resources contribute exactly the extents their logical volumes map,
//! everything else is copied whole. Any doubt about the picture voids the
//! VM: the caller gets nothing rather than a partial copy.

use std::collections::BTreeMap;

use storage_types::{
    ByteRange, Classification, ExtentRange, LvmTopology, PartitionTableType, ResourceKind, VoidReason,
};
use tracing::debug;

use crate::classify::ProbedDisk;
use crate::config::NonLvmPolicy;

/// Ranges to copy for one disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskPlan {
    /// Allocated data, counted in the totals
    pub data: Vec<ExtentRange>,

    /// Partition tables and PV labels, copied alongside but not counted
    pub metadata: Vec<ExtentRange>,
}

impl DiskPlan {
    pub fn data_ranges(&self) -> Vec<ByteRange> {
        self.data.iter().map(ExtentRange::range).collect()
    }

    pub fn metadata_ranges(&self) -> Vec<ByteRange> {
        self.metadata.iter().map(ExtentRange::range).collect()
    }
}

/// Per-disk plans keyed by whole-disk device path
pub type ExtentPlan = BTreeMap<String, DiskPlan>;

pub fn calculate(
    disks: &[ProbedDisk],
    classification: &Classification,
    topology: &LvmTopology,
    policy: NonLvmPolicy,
) -> Result<ExtentPlan, VoidReason> {
    if let Some(vg) = topology.incomplete.first() {
        return Err(VoidReason::IncompleteVolumeGroup {
            vg_name: vg.name.clone(),
            detail: vg.reason.clone(),
        });
    }
    if let Some(unreadable) = classification.unreadable.first() {
        return Err(VoidReason::DeviceUnreadable {
            device: unreadable.disk.clone(),
            detail: unreadable.error.clone(),
        });
    }
    if policy == NonLvmPolicy::Fallback
        && let Some(resource) = classification.non_lvm().next()
    {
        return Err(VoidReason::NonLvmPolicy {
            device: resource.device.clone(),
        });
    }

    let capacities: BTreeMap<&str, u64> = disks
        .iter()
        .map(|disk| (disk.path(), disk.capacity()))
        .collect();
    let mut plan: ExtentPlan = disks
        .iter()
        .map(|disk| (disk.path().to_string(), DiskPlan::default()))
        .collect();

    for extent in lvm_extents(topology)? {
        check_bounds(&capacities, &extent)?;
        push_data(&mut plan, extent);
    }

    for resource in classification.non_lvm() {
        for range in &resource.ranges {
            let extent = ExtentRange::from_range(resource.disk.clone(), *range);
            check_bounds(&capacities, &extent)?;
            push_data(&mut plan, extent);
        }
    }

    for extent in metadata_extents(disks, classification, topology) {
        if let Some(disk) = plan.get_mut(&extent.disk) {
            disk.metadata.push(extent);
        }
    }

    Ok(plan)
}

/// Disk-relative extents of every LV segment:
/// start = PV data offset + first PE * extent size, length = PE count * extent size.
pub fn lvm_extents(topology: &LvmTopology) -> Result<Vec<ExtentRange>, VoidReason> {
    let mut extents = Vec::new();

    for lv in &topology.logical_volumes {
        let vg = topology.volume_groups.get(&lv.vg_name).ok_or_else(|| {
            VoidReason::IncompleteVolumeGroup {
                vg_name: lv.vg_name.clone(),
                detail: format!("{} belongs to an unknown volume group", lv.display_name()),
            }
        })?;

        for segment in &lv.segments {
            let incomplete = |detail: String| VoidReason::IncompleteVolumeGroup {
                vg_name: vg.name.clone(),
                detail,
            };
            let pv = topology
                .physical_volumes
                .get(&segment.pv_name)
                .ok_or_else(|| incomplete(format!("{} maps to unknown PV {}", lv.display_name(), segment.pv_name)))?;
            let disk = pv
                .disk
                .as_deref()
                .ok_or_else(|| incomplete(format!("PV {} is not on an attached disk", pv.device)))?;

            let pv_start = vg.extents_to_bytes(segment.pv_start_extent);
            let length = vg.extents_to_bytes(segment.extent_count);
            let out_of_bounds = || VoidReason::OutOfBounds {
                device: pv.device.clone(),
                start: pv_start,
                length,
            };

            // pv.size is the data area, so extents are bounded by it alone
            let pv_end = pv_start.checked_add(length).ok_or_else(out_of_bounds)?;
            if pv_end > pv.size {
                return Err(out_of_bounds());
            }

            let start = pv.data_offset() + pv_start;
            debug!(
                lv = %lv.display_name(),
                disk,
                start,
                length,
                "mapped LV segment"
            );
            extents.push(ExtentRange::new(disk, start, length));
        }
    }

    Ok(extents)
}

/// Partition table areas and PV label/metadata areas per disk
fn metadata_extents(
    disks: &[ProbedDisk],
    classification: &Classification,
    topology: &LvmTopology,
) -> Vec<ExtentRange> {
    let mut extents = Vec::new();

    for disk in disks {
        let whole_disk_pv = classification
            .lvm_disks
            .iter()
            .any(|resource| resource.disk == disk.path());
        let Ok(table) = &disk.table else { continue };
        if whole_disk_pv || table.is_empty() {
            continue;
        }

        if let Some(first) = table.first_partition_start() {
            extents.push(ExtentRange::new(disk.path(), 0, first));
        }
        if table.kind == Some(PartitionTableType::Gpt)
            && let Some(last_usable) = table.last_usable_sector
        {
            let tail = (last_usable + 1) * table.sector_size;
            if tail < disk.capacity() {
                extents.push(ExtentRange::new(disk.path(), tail, disk.capacity() - tail));
            }
        }
    }

    for pv in topology.physical_volumes.values() {
        if let Some(disk) = pv.disk.as_deref() {
            extents.push(ExtentRange::from_range(disk, pv.metadata_range()));
        }
    }

    extents.retain(|extent| extent.length > 0);
    extents
}

fn check_bounds(capacities: &BTreeMap<&str, u64>, extent: &ExtentRange) -> Result<(), VoidReason> {
    let capacity = capacities.get(extent.disk.as_str()).copied().unwrap_or(0);
    let fits = extent
        .start
        .checked_add(extent.length)
        .is_some_and(|end| extent.length > 0 && end <= capacity);
    if fits {
        Ok(())
    } else {
        Err(VoidReason::OutOfBounds {
            device: extent.disk.clone(),
            start: extent.start,
            length: extent.length,
        })
    }
}

fn push_data(plan: &mut ExtentPlan, extent: ExtentRange) {
    if let Some(disk) = plan.get_mut(&extent.disk) {
        disk.data.push(extent);
    }
}

/// Bytes per resource kind, for the summary log line
pub fn bytes_by_kind(classification: &Classification) -> BTreeMap<ResourceKind, u64> {
    let mut totals = BTreeMap::new();
    for resource in classification.resources() {
        *totals.entry(resource.kind).or_default() += resource.size();
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_types::{
        BlockDevice, DiskResource, IncompleteVolumeGroup, LogicalSegment, LogicalVolumeInfo, PartitionTable,
        PhysicalVolumeInfo, VolumeGroupInfo,
    };

    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * MIB;
    const EXTENT: u64 = 4 * MIB;

    fn probed(path: &str, capacity: u64) -> ProbedDisk {
        ProbedDisk {
            device: BlockDevice {
                path: path.to_string(),
                capacity,
                parent: None,
                offset: None,
            },
            table: Ok(PartitionTable::unpartitioned(512)),
        }
    }

    fn single_pv_topology(lv_sizes: &[u64]) -> LvmTopology {
        let mut topology = LvmTopology::default();
        topology.volume_groups.insert(
            "vg0".to_string(),
            VolumeGroupInfo {
                name: "vg0".to_string(),
                uuid: String::new(),
                extent_size: EXTENT,
                pv_count: 1,
                lv_count: lv_sizes.len() as u32,
                missing_pv_count: 0,
                members: vec!["/dev/loop0".to_string()],
            },
        );
        topology.physical_volumes.insert(
            "/dev/loop0".to_string(),
            PhysicalVolumeInfo {
                device: "/dev/loop0".to_string(),
                uuid: String::new(),
                vg_name: Some("vg0".to_string()),
                // Data area only, as lvm2 reports it for group members
                size: (1024 * GIB - MIB) / EXTENT * EXTENT,
                pe_start: MIB,
                device_offset: 0,
                disk: Some("/dev/loop0".to_string()),
                missing: false,
                segments: Vec::new(),
            },
        );

        let mut next = 0;
        for (index, size) in lv_sizes.iter().enumerate() {
            let count = size / EXTENT;
            topology.logical_volumes.push(LogicalVolumeInfo {
                name: format!("lv{index}"),
                vg_name: "vg0".to_string(),
                device_path: format!("/dev/vg0/lv{index}"),
                segments: vec![LogicalSegment {
                    start_extent: 0,
                    extent_count: count,
                    pv_name: "/dev/loop0".to_string(),
                    pv_start_extent: next,
                    segtype: "linear".to_string(),
                }],
            });
            next += count;
        }
        topology
    }

    fn lvm_disk_classification() -> Classification {
        let mut classification = Classification::default();
        classification.push(DiskResource {
            kind: ResourceKind::LvmDisk,
            disk: "/dev/loop0".to_string(),
            device: "/dev/loop0".to_string(),
            ranges: vec![ByteRange::new(0, 1024 * GIB)],
            vg_name: Some("vg0".to_string()),
        });
        classification
    }

    #[test]
    fn four_lvs_total_ten_gib() {
        let topology = single_pv_topology(&[GIB, 2 * GIB, 3 * GIB, 4 * GIB]);
        let plan = calculate(
            &[probed("/dev/loop0", 1024 * GIB)],
            &lvm_disk_classification(),
            &topology,
            NonLvmPolicy::FullCopy,
        )
        .unwrap();

        let disk = &plan["/dev/loop0"];
        assert_eq!(disk.data.len(), 4);
        assert_eq!(disk.data.iter().map(|e| e.length).sum::<u64>(), 10 * GIB);
        assert_eq!(disk.data[0].start, MIB);
        assert_eq!(disk.data[1].start, MIB + GIB);
        // PV label area only, the whole-disk PV has no partition table
        assert_eq!(disk.metadata, vec![ExtentRange::new("/dev/loop0", 0, MIB)]);
    }

    #[test]
    fn incomplete_group_voids_everything() {
        let mut topology = single_pv_topology(&[GIB]);
        topology.incomplete.push(IncompleteVolumeGroup {
            name: "vg1".to_string(),
            reason: "1 of 2 physical volumes found".to_string(),
            disks: vec!["/dev/loop0".to_string()],
        });

        let error = calculate(
            &[probed("/dev/loop0", 1024 * GIB)],
            &lvm_disk_classification(),
            &topology,
            NonLvmPolicy::FullCopy,
        )
        .unwrap_err();
        assert!(matches!(error, VoidReason::IncompleteVolumeGroup { ref vg_name, .. } if vg_name == "vg1"));
    }

    #[test]
    fn segment_past_pv_end_is_out_of_bounds() {
        let mut topology = single_pv_topology(&[GIB]);
        topology.logical_volumes[0].segments[0].pv_start_extent = (1024 * GIB) / EXTENT;

        let error = lvm_extents(&topology).unwrap_err();
        assert!(matches!(error, VoidReason::OutOfBounds { .. }));
    }

    #[test]
    fn fully_allocated_pv_stays_in_bounds() {
        let mut topology = single_pv_topology(&[GIB]);
        let pv = topology.physical_volumes.get_mut("/dev/loop0").unwrap();
        pv.size = 511 * EXTENT;
        topology.logical_volumes[0].segments[0].extent_count = 511;

        let extents = lvm_extents(&topology).unwrap();
        assert_eq!(extents, vec![ExtentRange::new("/dev/loop0", MIB, 511 * EXTENT)]);

        let plan = calculate(
            &[probed("/dev/loop0", 2 * GIB)],
            &lvm_disk_classification(),
            &topology,
            NonLvmPolicy::FullCopy,
        )
        .unwrap();
        assert_eq!(plan["/dev/loop0"].data_ranges(), vec![ByteRange::new(MIB, 511 * EXTENT)]);

        topology.logical_volumes[0].segments[0].extent_count = 512;
        assert!(matches!(lvm_extents(&topology), Err(VoidReason::OutOfBounds { .. })));
    }

    #[test]
    fn raw_disk_is_copied_whole_unless_fallback() {
        let mut classification = Classification::default();
        classification.push(DiskResource {
            kind: ResourceKind::RawDisk,
            disk: "/dev/loop1".to_string(),
            device: "/dev/loop1".to_string(),
            ranges: vec![ByteRange::new(0, GIB)],
            vg_name: None,
        });
        let disks = [probed("/dev/loop1", GIB)];

        let plan = calculate(&disks, &classification, &LvmTopology::default(), NonLvmPolicy::FullCopy).unwrap();
        assert_eq!(plan["/dev/loop1"].data, vec![ExtentRange::new("/dev/loop1", 0, GIB)]);
        assert!(plan["/dev/loop1"].metadata.is_empty());

        let error = calculate(&disks, &classification, &LvmTopology::default(), NonLvmPolicy::Fallback)
            .unwrap_err();
        assert_eq!(
            error,
            VoidReason::NonLvmPolicy {
                device: "/dev/loop1".to_string()
            }
        );
    }

    #[test]
    fn partition_larger_than_disk_is_out_of_bounds() {
        let mut classification = Classification::default();
        classification.push(DiskResource {
            kind: ResourceKind::RegularPartition,
            disk: "/dev/loop1".to_string(),
            device: "/dev/loop1p1".to_string(),
            ranges: vec![ByteRange::new(MIB, GIB)],
            vg_name: None,
        });

        let error = calculate(
            &[probed("/dev/loop1", GIB)],
            &classification,
            &LvmTopology::default(),
            NonLvmPolicy::FullCopy,
        )
        .unwrap_err();
        assert!(matches!(error, VoidReason::OutOfBounds { .. }));
    }
}
