//! Scripted host for discovery tests
//!
//! [`FakeHost`] answers the partition, loop and LVM tools from a declared
//! layout and keeps a sysfs tree for it in a temp directory. It also stands
//! in for the mount transport and the image allocator, and logs every call
//! so tests can check what ran and in which order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use storage_contracts::{DiskMounter, ImageAllocator, MountSession, StorageError, StorageErrorKind};
use storage_sys::{CommandRunner, SysError, render};
use storage_types::{SECTOR_SIZE, SourceDisk};
use tempfile::TempDir;

use crate::errors::{Result, TestingError};

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// First usable data offset LVM picks by default
pub const DEFAULT_PE_START: u64 = MIB;

/// Sectors GPT keeps after the last usable sector for its backup table
const GPT_BACKUP_SECTORS: u64 = 33;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakePartition {
    pub index: u32,
    pub start_sector: u64,
    pub sectors: u64,
    /// MBR byte id (`83`, `8e`, `5`) or GPT code (`8300`, `8e00`)
    pub type_id: String,
}

impl FakePartition {
    pub fn new(index: u32, start_sector: u64, sectors: u64, type_id: &str) -> Self {
        Self {
            index,
            start_sector,
            sectors,
            type_id: type_id.to_string(),
        }
    }

    pub fn end_sector(&self) -> u64 {
        self.start_sector + self.sectors - 1
    }

    pub fn size(&self) -> u64 {
        self.sectors * SECTOR_SIZE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeTable {
    None,
    Mbr(Vec<FakePartition>),
    /// Shown by fdisk as a protective MBR, listed in full by sgdisk
    Gpt(Vec<FakePartition>),
    /// fdisk fails on the device
    Unreadable,
}

impl FakeTable {
    fn partitions(&self) -> &[FakePartition] {
        match self {
            Self::Mbr(partitions) | Self::Gpt(partitions) => partitions,
            Self::None | Self::Unreadable => &[],
        }
    }
}

#[derive(Debug, Clone)]
struct FakeDisk {
    image: PathBuf,
    loop_name: String,
    capacity: u64,
    table: FakeTable,
}

impl FakeDisk {
    fn device(&self) -> String {
        format!("/dev/{}", self.loop_name)
    }

    fn sectors(&self) -> u64 {
        self.capacity / SECTOR_SIZE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakePv {
    /// `None` for a PV LVM knows about but cannot find
    pub device: Option<String>,
    pub uuid: String,
    /// Size of the underlying device
    pub size: u64,
    pub pe_start: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FakeSegment {
    pv: usize,
    pv_start_extent: u64,
    extent_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FakeLv {
    name: String,
    segments: Vec<FakeSegment>,
}

/// A volume group declaration. Logical volumes are allocated linearly on
/// each PV in the order they are added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeVg {
    pub name: String,
    pub extent_size: u64,
    pvs: Vec<FakePv>,
    lvs: Vec<FakeLv>,
    next_free: Vec<u64>,
}

impl FakeVg {
    pub fn new(name: &str, extent_size: u64) -> Self {
        Self {
            name: name.to_string(),
            extent_size,
            pvs: Vec::new(),
            lvs: Vec::new(),
            next_free: Vec::new(),
        }
    }

    pub fn pv(mut self, device: &str, size: u64) -> Self {
        let index = self.pvs.len();
        self.pvs.push(FakePv {
            device: Some(device.to_string()),
            uuid: format!("{}-pv{index}", self.name),
            size,
            pe_start: DEFAULT_PE_START,
        });
        self.next_free.push(0);
        self
    }

    pub fn missing_pv(mut self, size: u64) -> Self {
        let index = self.pvs.len();
        self.pvs.push(FakePv {
            device: None,
            uuid: format!("{}-pv{index}", self.name),
            size,
            pe_start: DEFAULT_PE_START,
        });
        self.next_free.push(0);
        self
    }

    /// Add an LV made of `(pv index, bytes)` pieces, each placed at the
    /// next free extent of its PV.
    pub fn lv(mut self, name: &str, pieces: &[(usize, u64)]) -> Self {
        let mut segments = Vec::with_capacity(pieces.len());
        for &(pv, bytes) in pieces {
            let extent_count = bytes.div_ceil(self.extent_size);
            segments.push(FakeSegment {
                pv,
                pv_start_extent: self.next_free[pv],
                extent_count,
            });
            self.next_free[pv] += extent_count;
        }
        self.lvs.push(FakeLv {
            name: name.to_string(),
            segments,
        });
        self
    }

    fn pv_name(&self, index: usize) -> &str {
        self.pvs[index].device.as_deref().unwrap_or("[unknown]")
    }

    fn pe_count(&self, pv: &FakePv) -> u64 {
        pv.size.saturating_sub(pv.pe_start) / self.extent_size
    }
}

#[derive(Debug, Default)]
struct HostState {
    calls: Vec<String>,
    attached: BTreeSet<String>,
    active: BTreeSet<String>,
    failing: Vec<String>,
    fail_allocation: bool,
    fail_mount: bool,
    unexposed: BTreeSet<String>,
}

/// Scripted storage host
pub struct FakeHost {
    sysfs: TempDir,
    disks: Vec<FakeDisk>,
    volume_groups: Vec<FakeVg>,
    orphans: Vec<FakePv>,
    state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    pub fn new() -> Result<Self> {
        let sysfs = tempfile::tempdir().map_err(|e| TestingError::Fixture {
            reason: format!("cannot create sysfs tree: {e}"),
        })?;
        Ok(Self {
            sysfs,
            disks: Vec::new(),
            volume_groups: Vec::new(),
            orphans: Vec::new(),
            state: Arc::default(),
        })
    }

    pub fn sysfs_root(&self) -> &Path {
        self.sysfs.path()
    }

    /// Register a source image that attaches as the next loop device.
    /// Returns the loop device path.
    pub fn add_disk(&mut self, image: &str, capacity: u64, table: FakeTable) -> Result<String> {
        let disk = FakeDisk {
            image: PathBuf::from(image),
            loop_name: format!("loop{}", self.disks.len()),
            capacity,
            table,
        };
        self.write_sysfs(&disk)?;
        let device = disk.device();
        self.disks.push(disk);
        Ok(device)
    }

    pub fn add_volume_group(&mut self, vg: FakeVg) {
        self.volume_groups.push(vg);
    }

    pub fn add_orphan_pv(&mut self, device: &str, size: u64) {
        self.orphans.push(FakePv {
            device: Some(device.to_string()),
            uuid: format!("orphan-{}", self.orphans.len()),
            size,
            pe_start: DEFAULT_PE_START,
        });
    }

    /// Make every command starting with `prefix` fail
    pub fn fail_command(&self, prefix: &str) {
        self.lock().failing.push(prefix.to_string());
    }

    pub fn fail_allocation(&self) {
        self.lock().fail_allocation = true;
    }

    pub fn fail_mount(&self) {
        self.lock().fail_mount = true;
    }

    /// Leave `source` out of the next mount session
    pub fn hide_from_mount(&self, source: &str) {
        self.lock().unexposed.insert(source.to_string());
    }

    /// Every call so far, rendered as a command line
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    pub fn attached_loops(&self) -> BTreeSet<String> {
        self.lock().attached.clone()
    }

    pub fn active_volume_groups(&self) -> BTreeSet<String> {
        self.lock().active.clone()
    }

    /// A `SourceDisk` for an image added earlier, with its destination under `dest`
    pub fn source_disk(&self, image: &str, dest: &Path) -> Option<SourceDisk> {
        let disk = self.disks.iter().find(|disk| disk.image == Path::new(image))?;
        let name = disk.image.file_name()?;
        Some(SourceDisk {
            source: image.to_string(),
            capacity: disk.capacity,
            destination: dest.join(name),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_sysfs(&self, disk: &FakeDisk) -> Result<()> {
        let write = |path: PathBuf, value: u64| {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, format!("{value}\n"))
        };
        let fixture = |e: std::io::Error| TestingError::Fixture {
            reason: format!("cannot write sysfs entry for {}: {e}", disk.loop_name),
        };

        let disk_dir = self.sysfs.path().join("block").join(&disk.loop_name);
        write(disk_dir.join("size"), disk.sectors()).map_err(fixture)?;
        for partition in disk.table.partitions() {
            let part_dir = disk_dir.join(format!("{}p{}", disk.loop_name, partition.index));
            write(part_dir.join("start"), partition.start_sector).map_err(fixture)?;
            write(part_dir.join("size"), partition.sectors).map_err(fixture)?;
        }
        Ok(())
    }

    fn disk_by_device(&self, device: &str) -> Option<&FakeDisk> {
        self.disks.iter().find(|disk| disk.device() == device)
    }

    fn losetup(&self, args: &[&str], rendered: &str) -> storage_sys::Result<String> {
        match args {
            ["--detach", device] => {
                if self.lock().attached.remove(*device) {
                    Ok(String::new())
                } else {
                    Err(failed(rendered, "no such loop device"))
                }
            }
            ["--find", "--show", "--read-only", "--partscan", image] => {
                let disk = self
                    .disks
                    .iter()
                    .find(|disk| disk.image == Path::new(image))
                    .ok_or_else(|| failed(rendered, "cannot open image"))?;
                self.lock().attached.insert(disk.device());
                Ok(format!("{}\n", disk.device()))
            }
            _ => Err(failed(rendered, "unsupported losetup call")),
        }
    }

    fn fdisk(&self, device: &str, rendered: &str) -> storage_sys::Result<String> {
        let disk = self
            .disk_by_device(device)
            .ok_or_else(|| failed(rendered, "cannot open device"))?;

        let mut out = String::new();
        let _ = writeln!(
            out,
            "Disk {device}: {} bytes, {} sectors",
            disk.capacity,
            disk.sectors()
        );
        out.push_str("Units: sectors of 1 * 512 = 512 bytes\n");
        out.push_str("Sector size (logical/physical): 512 bytes / 512 bytes\n");
        out.push_str("I/O size (minimum/optimal): 512 bytes / 512 bytes\n");

        match &disk.table {
            FakeTable::None => {}
            FakeTable::Unreadable => return Err(failed(rendered, "unable to read partition table")),
            FakeTable::Mbr(partitions) => {
                out.push_str("Disklabel type: dos\nDisk identifier: 0x1c2d3e4f\n\n");
                out.push_str("Device       Boot   Start      End  Sectors Size Id Type\n");
                for partition in partitions {
                    let _ = writeln!(
                        out,
                        "{device}p{}      {} {} {} {}M {} {}",
                        partition.index,
                        partition.start_sector,
                        partition.end_sector(),
                        partition.sectors,
                        partition.size() / MIB,
                        partition.type_id,
                        mbr_type_name(&partition.type_id)
                    );
                }
            }
            FakeTable::Gpt(_) => {
                out.push_str("Disk identifier: 0x00000000\n\n");
                out.push_str("      Device Boot      Start         End      Blocks   Id  System\n");
                let last = disk.sectors() - 1;
                let _ = writeln!(out, "{device}p1               1  {last}  {}+  ee  GPT", last / 2);
            }
        }
        Ok(out)
    }

    fn sgdisk(&self, device: &str, rendered: &str) -> storage_sys::Result<String> {
        let disk = self
            .disk_by_device(device)
            .ok_or_else(|| failed(rendered, "cannot open device"))?;
        let FakeTable::Gpt(partitions) = &disk.table else {
            return Err(failed(rendered, "no GPT found"));
        };

        let mut out = String::new();
        let _ = writeln!(out, "Disk {device}: {} sectors, {} MiB", disk.sectors(), disk.capacity / MIB);
        out.push_str("Logical sector size: 512 bytes\n");
        out.push_str("Disk identifier (GUID): 5C3F0E5A-1B5E-4C44-8E2B-2A6A4D0F9B11\n");
        out.push_str("Partition table holds up to 128 entries\n");
        let _ = writeln!(
            out,
            "First usable sector is 34, last usable sector is {}",
            gpt_last_usable(disk.sectors())
        );
        out.push_str("Partitions will be aligned on 2048-sector boundaries\n\n");
        out.push_str("Number  Start (sector)    End (sector)  Size       Code  Name\n");
        for partition in partitions {
            let _ = writeln!(
                out,
                "   {}  {}  {}  {}.0 MiB  {}  {}",
                partition.index,
                partition.start_sector,
                partition.end_sector(),
                partition.size() / MIB,
                partition.type_id.to_ascii_uppercase(),
                gpt_type_name(&partition.type_id)
            );
        }
        Ok(out)
    }

    fn vgs(&self) -> String {
        let mut out = String::new();
        for vg in &self.volume_groups {
            let missing = vg.pvs.iter().filter(|pv| pv.device.is_none()).count();
            let _ = writeln!(
                out,
                "  LVM2_VG_NAME='{}' LVM2_VG_UUID='{}-uuid' LVM2_VG_EXTENT_SIZE='{}' LVM2_PV_COUNT='{}' LVM2_LV_COUNT='{}' LVM2_VG_MISSING_PV_COUNT='{missing}'",
                vg.name,
                vg.name,
                vg.extent_size,
                vg.pvs.len(),
                vg.lvs.len()
            );
        }
        out
    }

    fn pvs(&self) -> String {
        let mut out = String::new();
        // lvm2 reports a member's pv_size as its data area, pe_count * extent_size
        let rows = self
            .volume_groups
            .iter()
            .flat_map(|vg| {
                vg.pvs
                    .iter()
                    .map(move |pv| (vg.name.as_str(), pv, vg.pe_count(pv) * vg.extent_size))
            })
            .chain(self.orphans.iter().map(|pv| ("", pv, pv.size)));
        for (vg_name, pv, pv_size) in rows {
            let (name, attr) = match &pv.device {
                Some(device) => (device.as_str(), "a--"),
                None => ("[unknown]", "a-m"),
            };
            let _ = writeln!(
                out,
                "  LVM2_PV_NAME='{name}' LVM2_PV_UUID='{}' LVM2_VG_NAME='{vg_name}' LVM2_PV_SIZE='{}' LVM2_PE_START='{}' LVM2_PV_ATTR='{attr}'",
                pv.uuid, pv_size, pv.pe_start
            );
        }
        out
    }

    fn pv_segments(&self) -> String {
        let mut out = String::new();
        for vg in &self.volume_groups {
            for (index, pv) in vg.pvs.iter().enumerate() {
                let name = vg.pv_name(index);
                let mut used: Vec<(u64, u64, &str)> = vg
                    .lvs
                    .iter()
                    .flat_map(|lv| {
                        lv.segments
                            .iter()
                            .filter(move |seg| seg.pv == index)
                            .map(move |seg| (seg.pv_start_extent, seg.extent_count, lv.name.as_str()))
                    })
                    .collect();
                used.sort();

                let mut cursor = 0;
                for (start, size, lv) in used {
                    let _ = writeln!(
                        out,
                        "  LVM2_PV_NAME='{name}' LVM2_VG_NAME='{}' LVM2_PVSEG_START='{start}' LVM2_PVSEG_SIZE='{size}' LVM2_LV_NAME='{lv}'",
                        vg.name
                    );
                    cursor = start + size;
                }
                let total = vg.pe_count(pv);
                if cursor < total {
                    let _ = writeln!(
                        out,
                        "  LVM2_PV_NAME='{name}' LVM2_VG_NAME='{}' LVM2_PVSEG_START='{cursor}' LVM2_PVSEG_SIZE='{}' LVM2_LV_NAME=''",
                        vg.name,
                        total - cursor
                    );
                }
            }
        }
        out
    }

    fn lv_segments(&self, vg_name: &str, rendered: &str) -> storage_sys::Result<String> {
        let vg = self
            .volume_groups
            .iter()
            .find(|vg| vg.name == vg_name)
            .ok_or_else(|| failed(rendered, "volume group not found"))?;

        let mut out = String::new();
        for lv in &vg.lvs {
            let mut start = 0;
            for seg in &lv.segments {
                let _ = writeln!(
                    out,
                    "  LVM2_VG_NAME='{}' LVM2_LV_NAME='{}' LVM2_LV_PATH='/dev/{}/{}' LVM2_SEGTYPE='linear' LVM2_SEG_START_PE='{start}' LVM2_SEG_SIZE_PE='{}' LVM2_SEG_PE_RANGES='{}:{}-{}'",
                    vg.name,
                    lv.name,
                    vg.name,
                    lv.name,
                    seg.extent_count,
                    vg.pv_name(seg.pv),
                    seg.pv_start_extent,
                    seg.pv_start_extent + seg.extent_count - 1
                );
                start += seg.extent_count;
            }
        }
        Ok(out)
    }

    fn vgchange(&self, args: &[&str], rendered: &str) -> storage_sys::Result<String> {
        let (flag, vg_name) = match args {
            ["--activate", flag, vg_name] => (*flag, *vg_name),
            _ => return Err(failed(rendered, "unsupported vgchange call")),
        };
        if !self.volume_groups.iter().any(|vg| vg.name == vg_name) {
            return Err(failed(rendered, "volume group not found"));
        }
        let mut state = self.lock();
        if flag == "y" {
            state.active.insert(vg_name.to_string());
        } else {
            state.active.remove(vg_name);
        }
        Ok(String::new())
    }
}

impl CommandRunner for FakeHost {
    fn run(&self, program: &str, args: &[&str]) -> storage_sys::Result<String> {
        let rendered = render(program, args);
        {
            let mut state = self.lock();
            state.calls.push(rendered.clone());
            if state.failing.iter().any(|prefix| rendered.starts_with(prefix.as_str())) {
                return Err(failed(&rendered, "injected failure"));
            }
        }

        match program {
            "losetup" => self.losetup(args, &rendered),
            "udevadm" | "pvscan" | "vgscan" => Ok(String::new()),
            "fdisk" => self.fdisk(args.last().copied().unwrap_or_default(), &rendered),
            "sgdisk" => self.sgdisk(args.last().copied().unwrap_or_default(), &rendered),
            "vgs" => Ok(self.vgs()),
            "pvs" if args.contains(&"--segments") => Ok(self.pv_segments()),
            "pvs" => Ok(self.pvs()),
            "lvs" => self.lv_segments(args.last().copied().unwrap_or_default(), &rendered),
            "vgchange" => self.vgchange(args, &rendered),
            _ => Err(SysError::ToolMissing(program.to_string())),
        }
    }
}

impl DiskMounter for FakeHost {
    fn mount_disks_readonly(
        &self,
        disks: &[SourceDisk],
        disk_only: bool,
    ) -> std::result::Result<Box<dyn MountSession>, StorageError> {
        let mut state = self.lock();
        state.calls.push(format!("mount disk_only={disk_only} count={}", disks.len()));
        if state.fail_mount {
            return Err(StorageError::new(StorageErrorKind::Unavailable, "mount transport unavailable"));
        }

        let mounts = disks
            .iter()
            .filter(|disk| !state.unexposed.contains(&disk.source))
            .map(|disk| (disk.source.clone(), PathBuf::from(&disk.source)))
            .collect();
        Ok(Box::new(FakeSession {
            mounts,
            state: Arc::clone(&self.state),
        }))
    }
}

impl ImageAllocator for FakeHost {
    fn allocate_empty_image(&self, path: &Path, capacity: u64) -> std::result::Result<(), StorageError> {
        let mut state = self.lock();
        state.calls.push(format!("allocate {} {capacity}", path.display()));
        if state.fail_allocation {
            return Err(StorageError::new(StorageErrorKind::PermissionDenied, "destination is read-only"));
        }
        Ok(())
    }
}

struct FakeSession {
    mounts: BTreeMap<String, PathBuf>,
    state: Arc<Mutex<HostState>>,
}

impl FakeSession {
    fn record_release(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.calls.push("release mounts".to_string());
        }
    }
}

impl MountSession for FakeSession {
    fn mounts(&self) -> &BTreeMap<String, PathBuf> {
        &self.mounts
    }

    fn release(self: Box<Self>) -> std::result::Result<(), StorageError> {
        self.record_release();
        Ok(())
    }
}

fn failed(command: &str, stderr: &str) -> SysError {
    SysError::CommandFailed {
        command: command.to_string(),
        stderr: stderr.to_string(),
    }
}

/// Last sector GPT leaves usable on a disk of `sectors`
pub fn gpt_last_usable(sectors: u64) -> u64 {
    sectors - GPT_BACKUP_SECTORS - 1
}

fn mbr_type_name(type_id: &str) -> &'static str {
    match type_id {
        "83" => "Linux",
        "82" => "Linux swap / Solaris",
        "8e" => "Linux LVM",
        "5" | "f" | "85" => "Extended",
        "7" => "HPFS/NTFS/exFAT",
        _ => "Unknown",
    }
}

fn gpt_type_name(code: &str) -> &'static str {
    match code {
        "8e00" => "Linux LVM",
        "ef00" => "EFI system partition",
        "8200" => "Linux swap",
        _ => "Linux filesystem",
    }
}
