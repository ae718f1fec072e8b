// SPDX-License-Identifier: GPL-3.0-only

//! Loop device attachment and kernel-exposed geometry

use std::fs;
use std::path::{Path, PathBuf};

use storage_types::{BlockDevice, SECTOR_SIZE};
use tracing::debug;

use crate::{CommandRunner, Result, SysError};

/// Attach `image` read-only on the first free loop device, with partition
/// scanning so `loopNpM` nodes appear. Returns the loop device path.
pub fn attach(runner: &dyn CommandRunner, image: &Path) -> Result<String> {
    let image = image.to_string_lossy();
    let output = runner.run(
        "losetup",
        &["--find", "--show", "--read-only", "--partscan", image.as_ref()],
    )?;
    let device = output.trim();
    if !device.starts_with("/dev/loop") {
        return Err(SysError::parse(
            "losetup",
            format!("expected a loop device for {image}, got `{device}`"),
        ));
    }
    debug!(%image, device, "attached loop device");
    Ok(device.to_string())
}

pub fn detach(runner: &dyn CommandRunner, device: &str) -> Result<()> {
    runner.run("losetup", &["--detach", device])?;
    debug!(device, "detached loop device");
    Ok(())
}

/// Wait for udev to finish creating device nodes.
pub fn settle(runner: &dyn CommandRunner) -> Result<()> {
    runner.run("udevadm", &["settle"])?;
    Ok(())
}

/// Split `/dev/loop3p2` into `("loop3", Some("loop3p2"))`, `/dev/loop3`
/// into `("loop3", None)`. Anything else is not a loop device.
pub fn split_loop_name(device: &str) -> Option<(&str, Option<&str>)> {
    let name = device.strip_prefix("/dev/")?;
    let number = name.strip_prefix("loop")?;
    let digits = number.len() - number.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }

    let disk = &name[..4 + digits];
    let rest = &number[digits..];
    if rest.is_empty() {
        return Some((disk, None));
    }
    let partition = rest.strip_prefix('p')?;
    if partition.is_empty() || !partition.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((disk, Some(name)))
}

/// Read access to `/sys/block` (rooted elsewhere in tests)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sysfs {
    root: PathBuf,
}

impl Default for Sysfs {
    fn default() -> Self {
        Self::new("/sys")
    }
}

impl Sysfs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Geometry of a loop device or loop partition.
    ///
    /// Partitions report their byte offset on the parent loop device; whole
    /// devices have no parent. `Ok(None)` means the device is not a loop
    /// device and cannot be placed on an attached disk.
    pub fn loop_geometry(&self, device: &str) -> Result<Option<BlockDevice>> {
        let Some((disk, partition)) = split_loop_name(device) else {
            return Ok(None);
        };

        let disk_dir = self.root.join("block").join(disk);
        let block = match partition {
            None => BlockDevice {
                path: device.to_string(),
                capacity: read_sectors(&disk_dir.join("size"))? * SECTOR_SIZE,
                parent: None,
                offset: None,
            },
            Some(partition) => {
                let part_dir = disk_dir.join(partition);
                BlockDevice {
                    path: device.to_string(),
                    capacity: read_sectors(&part_dir.join("size"))? * SECTOR_SIZE,
                    parent: Some(format!("/dev/{disk}")),
                    offset: Some(read_sectors(&part_dir.join("start"))? * SECTOR_SIZE),
                }
            }
        };

        Ok(Some(block))
    }
}

fn read_sectors(path: &Path) -> Result<u64> {
    let raw = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SysError::DeviceNotFound(path.display().to_string())
        } else {
            SysError::Io(e)
        }
    })?;
    raw.trim()
        .parse()
        .map_err(|_| SysError::parse("sysfs", format!("{}: `{}`", path.display(), raw.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_loop_names() {
        assert_eq!(split_loop_name("/dev/loop3"), Some(("loop3", None)));
        assert_eq!(split_loop_name("/dev/loop12p5"), Some(("loop12", Some("loop12p5"))));
        assert_eq!(split_loop_name("/dev/sda1"), None);
        assert_eq!(split_loop_name("/dev/loop"), None);
        assert_eq!(split_loop_name("/dev/loop1p"), None);
        assert_eq!(split_loop_name("/dev/mapper/vg0-root"), None);
    }

    #[test]
    fn reads_partition_geometry_from_sysfs() {
        let root = tempfile::tempdir().unwrap();
        let part_dir = root.path().join("block/loop0/loop0p2");
        fs::create_dir_all(&part_dir).unwrap();
        fs::write(root.path().join("block/loop0/size"), "41943040\n").unwrap();
        fs::write(part_dir.join("start"), "1050624\n").unwrap();
        fs::write(part_dir.join("size"), "40892416\n").unwrap();

        let sysfs = Sysfs::new(root.path());
        let part = sysfs.loop_geometry("/dev/loop0p2").unwrap().unwrap();
        assert_eq!(part.parent.as_deref(), Some("/dev/loop0"));
        assert_eq!(part.offset, Some(1050624 * 512));
        assert_eq!(part.capacity, 40892416 * 512);

        let disk = sysfs.loop_geometry("/dev/loop0").unwrap().unwrap();
        assert_eq!(disk.capacity, 41943040 * 512);
        assert!(!disk.is_partition());

        assert!(sysfs.loop_geometry("/dev/sdb").unwrap().is_none());
        assert!(matches!(
            sysfs.loop_geometry("/dev/loop7"),
            Err(SysError::DeviceNotFound(_))
        ));
    }
}
