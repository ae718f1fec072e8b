// SPDX-License-Identifier: GPL-3.0-only

use storage_types::{
    PartitionTable, PartitionTableEntry, PartitionTableType, SECTOR_SIZE, normalize_type_id,
};

use super::{parse_logical_sector_size, partition_device};
use crate::{Result, SysError};

/// Parse `sgdisk -p` output for one device.
///
/// Rows look like `1  2048  1050623  512.0 MiB  8300  Linux filesystem`;
/// the partition name may be empty.
pub fn parse_sgdisk(output: &str, device: &str) -> Result<PartitionTable> {
    let sector_size = parse_logical_sector_size(output).unwrap_or(SECTOR_SIZE);
    let mut table = PartitionTable::unpartitioned(sector_size);
    table.kind = Some(PartitionTableType::Gpt);
    table.last_usable_sector = output.lines().find_map(parse_last_usable);

    let mut in_table = false;
    for line in output.lines() {
        let line = line.trim();
        if line.starts_with("Number") && line.contains("Start") {
            in_table = true;
            continue;
        }
        if !in_table || line.is_empty() {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 6 {
            return Err(SysError::parse(
                "sgdisk",
                format!("{device}: short row `{line}`"),
            ));
        }
        let number = |index: usize| {
            tokens[index].parse::<u64>().map_err(|_| {
                SysError::parse(
                    "sgdisk",
                    format!("{device}: invalid number `{}` in `{line}`", tokens[index]),
                )
            })
        };

        let index = u32::try_from(number(0)?).map_err(|_| {
            SysError::parse(
                "sgdisk",
                format!("{device}: partition number out of range in `{line}`"),
            )
        })?;
        let start_sector = number(1)?;
        let end_sector = number(2)?;
        if end_sector < start_sector {
            return Err(SysError::parse(
                "sgdisk",
                format!("{device}: end before start in `{line}`"),
            ));
        }

        table.entries.push(PartitionTableEntry {
            index,
            device: partition_device(device, index),
            start_sector,
            end_sector,
            blocks: (end_sector - start_sector + 1) * sector_size / 1024,
            type_id: normalize_type_id(tokens[5]),
            system: tokens[6..].join(" "),
            boot: false,
        });
    }

    Ok(table)
}

/// `First usable sector is 34, last usable sector is 20971486`
fn parse_last_usable(line: &str) -> Option<u64> {
    let (_, rest) = line.split_once("last usable sector is")?;
    rest.trim().trim_end_matches('.').parse().ok()
}
