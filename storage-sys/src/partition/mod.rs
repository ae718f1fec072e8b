// SPDX-License-Identifier: GPL-3.0-only

//! Partition table reader
//!
//! The MBR view is read first. A GPT disk shows up there either as a single
//! protective entry or, with current util-linux, as a `gpt` disklabel; both
//! cases are re-read through `sgdisk` so that callers always see the same
//! entry shape.

mod fdisk;
mod sgdisk;

use storage_types::{PartitionTable, PartitionTableType};
use tracing::debug;

use crate::{CommandRunner, Result};

pub use fdisk::parse_fdisk;
pub use sgdisk::parse_sgdisk;

/// Read the partition table of `device`. Unpartitioned devices yield an empty table.
pub fn read_partition_table(runner: &dyn CommandRunner, device: &str) -> Result<PartitionTable> {
    let listing = runner.run("fdisk", &["-l", "-u", device])?;
    let table = parse_fdisk(&listing, device)?;

    if table.is_protective_mbr() || table.kind == Some(PartitionTableType::Gpt) {
        debug!(device, "GPT label detected, re-reading with sgdisk");
        let listing = runner.run("sgdisk", &["-p", device])?;
        return parse_sgdisk(&listing, device);
    }

    debug!(
        device,
        entries = table.entries.len(),
        label = table.kind.map(|kind| kind.as_str()).unwrap_or("none"),
        "partition table read"
    );
    Ok(table)
}

/// Kernel naming of partition `number` on `disk` (`loop0` -> `loop0p1`, `sda` -> `sda1`)
pub fn partition_device(disk: &str, number: u32) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{disk}p{number}")
    } else {
        format!("{disk}{number}")
    }
}

/// Parse the value of a `Sector size (logical/physical): 512 bytes / 4096 bytes`
/// style line, as printed by fdisk and sgdisk.
fn parse_logical_sector_size(output: &str) -> Option<u64> {
    output.lines().find_map(|line| {
        let line = line.trim();
        let rest = line
            .strip_prefix("Sector size (logical/physical):")
            .or_else(|| line.strip_prefix("Logical sector size:"))?;
        let digits: String = rest
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SysError;
    use std::collections::BTreeMap;

    struct Scripted(BTreeMap<String, String>);

    impl CommandRunner for Scripted {
        fn run(&self, program: &str, args: &[&str]) -> Result<String> {
            let rendered = crate::render(program, args);
            self.0
                .get(&rendered)
                .cloned()
                .ok_or(SysError::CommandFailed {
                    command: rendered,
                    stderr: "unscripted".to_string(),
                })
        }
    }

    const PROTECTIVE: &str = "\
Disk /dev/loop3: 10.7 GB, 10737418240 bytes
256 heads, 63 sectors/track, 1300 cylinders, total 20971520 sectors
Units = sectors of 1 * 512 = 512 bytes
Sector size (logical/physical): 512 bytes / 512 bytes

      Device Boot      Start         End      Blocks   Id  System
/dev/loop3p1               1    20971519    10485759+  ee  GPT
";

    const SGDISK: &str = "\
Disk /dev/loop3: 20971520 sectors, 10.0 GiB
Sector size (logical/physical): 512/512 bytes
Partition table holds up to 128 entries
First usable sector is 34, last usable sector is 20971486

Number  Start (sector)    End (sector)  Size       Code  Name
   1            2048         1050623   512.0 MiB   8300  Linux filesystem
   2         1050624        20971486   9.5 GiB     8E00  Linux LVM
";

    #[test]
    fn protective_entry_routes_to_gpt_reader() {
        let runner = Scripted(BTreeMap::from([
            ("fdisk -l -u /dev/loop3".to_string(), PROTECTIVE.to_string()),
            ("sgdisk -p /dev/loop3".to_string(), SGDISK.to_string()),
        ]));

        let table = read_partition_table(&runner, "/dev/loop3").unwrap();
        assert_eq!(table.kind, Some(PartitionTableType::Gpt));
        assert_eq!(table.entries.len(), 2);
        assert_eq!(table.entries[1].device, "/dev/loop3p2");
        assert_eq!(table.entries[1].type_id, "8e00");
        assert_eq!(table.last_usable_sector, Some(20971486));
    }

    #[test]
    fn tool_failure_is_an_error() {
        let runner = Scripted(BTreeMap::new());
        let error = read_partition_table(&runner, "/dev/loop9").unwrap_err();
        assert_eq!(error.command(), Some("fdisk -l -u /dev/loop9"));
    }

    #[test]
    fn partition_device_follows_kernel_naming() {
        assert_eq!(partition_device("/dev/loop0", 2), "/dev/loop0p2");
        assert_eq!(partition_device("/dev/sda", 1), "/dev/sda1");
        assert_eq!(partition_device("/dev/nvme0n1", 3), "/dev/nvme0n1p3");
    }

    #[test]
    fn reads_both_sector_size_spellings() {
        assert_eq!(
            parse_logical_sector_size("Sector size (logical/physical): 4096 bytes / 4096 bytes"),
            Some(4096)
        );
        assert_eq!(
            parse_logical_sector_size("Sector size (logical/physical): 512/4096 bytes"),
            Some(512)
        );
        assert_eq!(parse_logical_sector_size("Logical sector size: 512 bytes"), Some(512));
        assert_eq!(parse_logical_sector_size("nothing here"), None);
    }
}
