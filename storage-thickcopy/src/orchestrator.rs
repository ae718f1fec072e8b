// SPDX-License-Identifier: GPL-3.0-only

//! Per-VM discovery pass
//!
//! Mounting, discovering, classifying, computing and writing run once per
//! VM. Host resources are held in scope guards declared in acquisition
//! order, so they are released in reverse on every exit path.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::PathBuf;

use storage_contracts::{DiskMounter, ImageAllocator};
use storage_sys::{CommandRunner, Sysfs, SysError, loop_device, read_partition_table};
use storage_types::{
    AttachedDisk, BlockDevice, DiskExtents, ThickCopyResult, ThickCopyStatus, VmDisks, VoidReason, bytes_to_pretty,
};
use tracing::{debug, info, warn};

use crate::calculate::{ExtentPlan, bytes_by_kind, calculate};
use crate::classify::{ProbedDisk, classify};
use crate::config::ThickCopyConfig;
use crate::error::{Result, ThickCopyError};
use crate::extents_file::{DATA_SUFFIX, ExtentsSink, ExtentsWriter, METADATA_SUFFIX};
use crate::scope::{ActivationScope, LoopScope, MountScope};
use crate::topology::scan_topology;

/// Discovery engine bound to its host collaborators
pub struct ThickCopy<'a> {
    config: &'a ThickCopyConfig,
    runner: &'a dyn CommandRunner,
    mounter: &'a dyn DiskMounter,
    allocator: &'a dyn ImageAllocator,
    sysfs: Sysfs,
}

impl<'a> ThickCopy<'a> {
    pub fn new(
        config: &'a ThickCopyConfig,
        runner: &'a dyn CommandRunner,
        mounter: &'a dyn DiskMounter,
        allocator: &'a dyn ImageAllocator,
    ) -> Self {
        Self {
            config,
            runner,
            mounter,
            allocator,
            sysfs: Sysfs::new(&config.sysfs_root),
        }
    }

    /// Allocate destination images and find the ranges to copy for every disk of `vm`.
    ///
    /// Only allocation failures and malformed requests are errors. Anything
    /// that goes wrong during discovery yields a void result, with zero
    /// bytes reported for every disk.
    pub fn discover_extents(&self, vm: &VmDisks) -> Result<ThickCopyResult> {
        validate(vm)?;

        for disk in &vm.disks {
            self.allocator
                .allocate_empty_image(&disk.destination, disk.capacity)
                .map_err(|source| ThickCopyError::Allocation {
                    path: disk.destination.clone(),
                    source,
                })?;
        }

        let result = match self.discover(vm) {
            Ok(disks) => ThickCopyResult {
                vm_id: vm.vm_id.clone(),
                status: ThickCopyStatus::Ready,
                disks,
            },
            Err(reason) => ThickCopyResult::void(&vm.vm_id, vm.sources(), reason),
        };

        match &result.status {
            ThickCopyStatus::Ready => {
                for (source, disk) in &result.disks {
                    info!(
                        vm = %vm.vm_id,
                        source = %source,
                        total_bytes = disk.total_bytes,
                        total_blocks = disk.total_blocks,
                        metadata_bytes = disk.metadata_bytes,
                        "disk extents"
                    );
                }
                info!(
                    vm = %vm.vm_id,
                    total = %bytes_to_pretty(&result.total_bytes(), true),
                    "thick copy ready"
                );
            }
            ThickCopyStatus::Void(reason) => {
                warn!(vm = %vm.vm_id, %reason, "thick copy void, every disk reports 0 bytes");
            }
        }

        Ok(result)
    }

    fn discover(&self, vm: &VmDisks) -> std::result::Result<BTreeMap<String, DiskExtents>, VoidReason> {
        info!(vm = %vm.vm_id, disks = vm.disks.len(), "mounting source disks");
        let session = self
            .mounter
            .mount_disks_readonly(&vm.disks, true)
            .map_err(|e| VoidReason::DeviceUnreadable {
                device: vm.sources().collect::<Vec<_>>().join(", "),
                detail: e.to_string(),
            })?;
        let mounts = MountScope::new(session);
        let mut loops = LoopScope::new(self.runner);

        let mut attached = Vec::with_capacity(vm.disks.len());
        for disk in &vm.disks {
            let path = mounts
                .mounts()
                .get(&disk.source)
                .ok_or_else(|| VoidReason::DeviceUnreadable {
                    device: disk.source.clone(),
                    detail: "not exposed by the mount session".to_string(),
                })?
                .clone();
            let device = loops
                .attach(&path)
                .map_err(|e| unreadable(&disk.source, e))?;
            attached.push((disk, path, device));
        }

        if self.config.settle_devices
            && !loops.attached().is_empty()
            && let Err(e) = loop_device::settle(self.runner)
        {
            warn!(vm = %vm.vm_id, "udevadm settle failed: {e}");
        }

        let mut disks = Vec::with_capacity(attached.len());
        for (disk, mount_path, device) in attached {
            let device = self.whole_disk(&disk.source, disk.capacity, &device)?;
            disks.push(AttachedDisk {
                source: disk.clone(),
                mount_path,
                device,
            });
        }

        info!(vm = %vm.vm_id, "reading partition tables");
        let mut probed = Vec::with_capacity(disks.len());
        for disk in &disks {
            let table = match read_partition_table(self.runner, disk.device_path()) {
                Ok(table) => Ok(table),
                Err(e @ SysError::ToolMissing(_)) => return Err(tool_failure(e)),
                Err(e) => {
                    debug!(disk = disk.device_path(), "partition table unreadable: {e}");
                    Err(e.to_string())
                }
            };
            probed.push(ProbedDisk {
                device: disk.device.clone(),
                table,
            });
        }

        info!(vm = %vm.vm_id, "scanning LVM topology");
        let mut activation = ActivationScope::new(self.runner);
        let topology = scan_topology(
            self.runner,
            &self.sysfs,
            &disks,
            &self.config.reserved_volume_group,
            &mut activation,
        )
        .map_err(tool_failure)?;
        debug!(
            vm = %vm.vm_id,
            volume_groups = topology.volume_groups.len(),
            incomplete = topology.incomplete.len(),
            reserved_skipped = topology.reserved_skipped,
            activated = ?activation.activated(),
            "topology scanned"
        );

        info!(vm = %vm.vm_id, "classifying resources");
        let classification = classify(&probed, &topology);
        for (kind, bytes) in bytes_by_kind(&classification) {
            debug!(vm = %vm.vm_id, kind = kind.as_str(), bytes, "classified");
        }

        info!(vm = %vm.vm_id, policy = ?self.config.non_lvm_policy, "computing extents");
        let plan = calculate(&probed, &classification, &topology, self.config.non_lvm_policy)?;

        info!(vm = %vm.vm_id, "writing extents files");
        self.write_plan(&disks, &plan)
    }

    /// Geometry of the loop device backing a source. The capacity is the
    /// smaller of what the caller declared and what the kernel reports.
    fn whole_disk(
        &self,
        source: &str,
        declared: u64,
        device: &str,
    ) -> std::result::Result<BlockDevice, VoidReason> {
        let geometry = self
            .sysfs
            .loop_geometry(device)
            .map_err(|e| unreadable(source, e))?
            .filter(|geometry| !geometry.is_partition())
            .ok_or_else(|| VoidReason::DeviceUnreadable {
                device: device.to_string(),
                detail: format!("{source} is not attached as a whole loop device"),
            })?;

        if geometry.capacity != declared {
            warn!(
                source,
                device,
                declared,
                actual = geometry.capacity,
                "declared capacity differs from device size"
            );
        }

        Ok(BlockDevice {
            capacity: declared.min(geometry.capacity),
            ..geometry
        })
    }

    fn write_plan(
        &self,
        disks: &[AttachedDisk],
        plan: &ExtentPlan,
    ) -> std::result::Result<BTreeMap<String, DiskExtents>, VoidReason> {
        write_extents(&ExtentsWriter::from_config(self.config), disks, plan)
    }
}

/// Write every disk's files, removing all of them if any write fails
fn write_extents(
    sink: &dyn ExtentsSink,
    disks: &[AttachedDisk],
    plan: &ExtentPlan,
) -> std::result::Result<BTreeMap<String, DiskExtents>, VoidReason> {
    let mut written: Vec<PathBuf> = Vec::new();

    match write_disks(sink, disks, plan, &mut written) {
        Ok(results) => Ok(results),
        Err(e) => {
            for path in &written {
                if let Err(remove) = fs::remove_file(path) {
                    warn!(path = %path.display(), "failed to remove extents file: {remove}");
                }
            }
            Err(VoidReason::WriteFailed {
                path: sink.dir().to_path_buf(),
                detail: e.to_string(),
            })
        }
    }
}

/// Write data and metadata files for every disk, recording each kept file
/// in `written` as soon as it exists.
fn write_disks(
    writer: &dyn ExtentsSink,
    disks: &[AttachedDisk],
    plan: &ExtentPlan,
    written: &mut Vec<PathBuf>,
) -> io::Result<BTreeMap<String, DiskExtents>> {
    let mut results = BTreeMap::new();

    for disk in disks {
        let Some(disk_plan) = plan.get(disk.device_path()) else {
            results.insert(disk.source.source.clone(), DiskExtents::default());
            continue;
        };

        let mut extents = match writer.write(disk_plan.data_ranges(), DATA_SUFFIX)? {
            Some(file) => {
                written.push(file.path.clone());
                DiskExtents::with_totals(Some(file.path), file.total_bytes)
            }
            None => DiskExtents::default(),
        };
        if let Some(file) = writer.write(disk_plan.metadata_ranges(), METADATA_SUFFIX)? {
            written.push(file.path.clone());
            extents.metadata_file = Some(file.path);
            extents.metadata_bytes = file.total_bytes;
        }
        results.insert(disk.source.source.clone(), extents);
    }

    Ok(results)
}

fn validate(vm: &VmDisks) -> Result<()> {
    if vm.disks.is_empty() {
        return Err(ThickCopyError::InvalidRequest(format!("VM {} has no disks", vm.vm_id)));
    }

    let mut seen = BTreeSet::new();
    for disk in &vm.disks {
        if !seen.insert(disk.source.as_str()) {
            return Err(ThickCopyError::InvalidRequest(format!(
                "disk {} is listed twice",
                disk.source
            )));
        }
        if disk.capacity == 0 {
            return Err(ThickCopyError::InvalidRequest(format!(
                "disk {} has zero capacity",
                disk.source
            )));
        }
    }
    Ok(())
}

fn tool_failure(error: SysError) -> VoidReason {
    let command = match &error {
        SysError::Parse { source_name, .. } => Some(source_name.clone()),
        other => other.command().map(str::to_string),
    };
    match command {
        Some(command) => VoidReason::ToolInvocationFailure {
            command,
            detail: error.to_string(),
        },
        None => VoidReason::DeviceUnreadable {
            device: String::new(),
            detail: error.to_string(),
        },
    }
}

fn unreadable(device: &str, error: SysError) -> VoidReason {
    if error.command().is_some() {
        return tool_failure(error);
    }
    VoidReason::DeviceUnreadable {
        device: device.to_string(),
        detail: error.to_string(),
    }
}
