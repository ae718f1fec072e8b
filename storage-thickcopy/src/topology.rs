// SPDX-License-Identifier: GPL-3.0-only

//! LVM topology scan over the disks attached for one VM
//!
//! The scan keeps only what concerns those disks. A volume group that has
//! no physical volume on them belongs to the host and is ignored; one that
//! has some but not all of its physical volumes there is incomplete. Only
//! complete groups are activated and exposed.

use std::collections::{BTreeMap, BTreeSet};

use storage_sys::logical::lvm_tools;
use storage_sys::{CommandRunner, Sysfs};
use storage_types::{AttachedDisk, IncompleteVolumeGroup, LogicalVolumeInfo, LvmTopology, PhysicalVolumeInfo};
use tracing::{debug, info, warn};

use crate::scope::ActivationScope;

/// A physical volume together with what was learned about its placement
struct ResolvedPv {
    pv: PhysicalVolumeInfo,
    problem: Option<String>,
}

/// Scan LVM across `disks`, activating every complete volume group that
/// lives on them through `activation`.
pub fn scan_topology(
    runner: &dyn CommandRunner,
    sysfs: &Sysfs,
    disks: &[AttachedDisk],
    reserved_vg: &str,
    activation: &mut ActivationScope<'_>,
) -> storage_sys::Result<LvmTopology> {
    lvm_tools::rescan(runner)?;

    let mut topology = LvmTopology::default();
    let mut volume_groups = lvm_tools::list_volume_groups(runner)?;
    if volume_groups.iter().any(|vg| vg.name == reserved_vg) {
        info!(vg = reserved_vg, "skipping reserved volume group");
        topology.reserved_skipped = true;
        volume_groups.retain(|vg| vg.name != reserved_vg);
    }

    let attached: BTreeMap<&str, u64> = disks
        .iter()
        .map(|disk| (disk.device_path(), disk.device.capacity))
        .collect();

    let mut by_vg: BTreeMap<String, Vec<ResolvedPv>> = BTreeMap::new();
    for pv in lvm_tools::list_physical_volumes(runner)? {
        let resolved = resolve_pv(sysfs, &attached, pv);
        if resolved.pv.vg_name.as_deref() == Some(reserved_vg) {
            if resolved.pv.disk.is_some() {
                warn!(pv = %resolved.pv.device, vg = reserved_vg, "reserved volume group on an attached disk");
                topology.reserved_skipped = true;
                topology.reserved.insert(resolved.pv.device.clone(), resolved.pv);
            }
            continue;
        }
        match resolved.pv.vg_name.clone() {
            Some(vg_name) => by_vg.entry(vg_name).or_default().push(resolved),
            None if resolved.pv.disk.is_some() && resolved.problem.is_none() => {
                debug!(pv = %resolved.pv.device, "orphan physical volume on attached disk");
                topology
                    .physical_volumes
                    .insert(resolved.pv.device.clone(), resolved.pv);
            }
            None => {}
        }
    }

    for vg in volume_groups {
        let pvs = by_vg.remove(&vg.name).unwrap_or_default();
        let touched: BTreeSet<String> = pvs.iter().filter_map(|r| r.pv.disk.clone()).collect();
        if touched.is_empty() {
            debug!(vg = %vg.name, "volume group does not touch attached disks");
            continue;
        }

        if let Some(reason) = completeness_problem(&vg, &pvs) {
            warn!(vg = %vg.name, %reason, "volume group is incomplete");
            topology.incomplete.push(IncompleteVolumeGroup {
                name: vg.name,
                reason,
                disks: touched.into_iter().collect(),
            });
            continue;
        }

        activation.activate(&vg.name)?;
        let volumes = lvm_tools::list_logical_volumes(runner, &vg.name)?;
        let pvs: Vec<PhysicalVolumeInfo> = pvs.into_iter().map(|r| r.pv).collect();

        if let Some(reason) = allocation_mismatch(&pvs, &volumes) {
            warn!(vg = %vg.name, %reason, "volume group is incomplete");
            topology.incomplete.push(IncompleteVolumeGroup {
                name: vg.name,
                reason,
                disks: touched.into_iter().collect(),
            });
            continue;
        }

        let mut vg = vg;
        vg.members = pvs.iter().map(|pv| pv.device.clone()).collect();
        vg.members.sort();
        info!(
            vg = %vg.name,
            pvs = vg.members.len(),
            lvs = volumes.len(),
            extent_size = vg.extent_size,
            "volume group discovered"
        );

        for pv in pvs {
            topology.physical_volumes.insert(pv.device.clone(), pv);
        }
        topology.logical_volumes.extend(volumes);
        topology.volume_groups.insert(vg.name.clone(), vg);
    }

    Ok(topology)
}

/// Place a PV on an attached disk via the loop device geometry in sysfs.
fn resolve_pv(sysfs: &Sysfs, attached: &BTreeMap<&str, u64>, mut pv: PhysicalVolumeInfo) -> ResolvedPv {
    if pv.missing {
        let problem = Some(format!("physical volume {} ({}) is missing", pv.device, pv.uuid));
        return ResolvedPv { pv, problem };
    }

    let geometry = match sysfs.loop_geometry(&pv.device) {
        Ok(Some(geometry)) => geometry,
        Ok(None) => {
            let problem = Some(format!("physical volume {} is not on an attached disk", pv.device));
            return ResolvedPv { pv, problem };
        }
        Err(e) => {
            let problem = Some(format!("cannot resolve geometry of {}: {e}", pv.device));
            return ResolvedPv { pv, problem };
        }
    };

    let disk = geometry.disk().to_string();
    let Some(&disk_capacity) = attached.get(disk.as_str()) else {
        let problem = Some(format!("physical volume {} is on {disk}, which belongs to another VM", pv.device));
        return ResolvedPv { pv, problem };
    };

    let range = geometry.disk_range();
    pv.device_offset = range.start;
    pv.disk = Some(disk);

    let footprint = pv.footprint().size();
    let problem = if footprint > range.size() || range.end > disk_capacity {
        Some(format!(
            "physical volume {} ({} bytes) does not fit its device ({} bytes at {})",
            pv.device,
            footprint,
            range.size(),
            range.start
        ))
    } else {
        None
    };
    ResolvedPv { pv, problem }
}

fn completeness_problem(vg: &storage_types::VolumeGroupInfo, pvs: &[ResolvedPv]) -> Option<String> {
    if vg.missing_pv_count > 0 {
        return Some(format!("{} physical volume(s) reported missing", vg.missing_pv_count));
    }
    if let Some(problem) = pvs.iter().find_map(|r| r.problem.clone()) {
        return Some(problem);
    }
    if pvs.len() != vg.pv_count as usize {
        return Some(format!(
            "{} of {} physical volumes found",
            pvs.len(),
            vg.pv_count
        ));
    }
    if vg.extent_size == 0 {
        return Some("extent size is zero".to_string());
    }
    None
}

/// The LV segment maps must account for exactly the extents each PV reports as allocated.
fn allocation_mismatch(pvs: &[PhysicalVolumeInfo], volumes: &[LogicalVolumeInfo]) -> Option<String> {
    let mut mapped: BTreeMap<&str, u64> = BTreeMap::new();
    for segment in volumes.iter().flat_map(|lv| &lv.segments) {
        *mapped.entry(segment.pv_name.as_str()).or_default() += segment.extent_count;
    }

    for (pv_name, extents) in &mapped {
        if !pvs.iter().any(|pv| pv.device == *pv_name) {
            return Some(format!("{extents} extents mapped to unknown physical volume {pv_name}"));
        }
    }

    pvs.iter().find_map(|pv| {
        let from_lvs = mapped.get(pv.device.as_str()).copied().unwrap_or(0);
        let from_pv = pv.allocated_extents();
        (from_lvs != from_pv).then(|| {
            format!(
                "allocation map disagrees on {}: {from_lvs} extents in LV segments, {from_pv} allocated",
                pv.device
            )
        })
    })
}
