// SPDX-License-Identifier: GPL-3.0-only

use storage_types::{
    PartitionTable, PartitionTableEntry, PartitionTableType, SECTOR_SIZE, normalize_type_id,
};

use super::parse_logical_sector_size;
use crate::{Result, SysError};

/// Table columns fdisk prints, in whatever order the header names them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Start,
    End,
    Blocks,
    Sectors,
    Size,
    Id,
    Other,
}

impl Column {
    fn from_header(name: &str) -> Self {
        match name {
            "Start" => Self::Start,
            "End" => Self::End,
            "Blocks" => Self::Blocks,
            "Sectors" => Self::Sectors,
            "Size" => Self::Size,
            "Id" => Self::Id,
            _ => Self::Other,
        }
    }
}

/// Parse `fdisk -l -u` output for one device.
///
/// Both the legacy layout (`Device Boot Start End Blocks Id System`) and the
/// util-linux 2.2x one (`Device Boot Start End Sectors Size Id Type`) are
/// understood. A table without an `Id` column is a GPT listing and is
/// reported as such with no entries.
pub fn parse_fdisk(output: &str, device: &str) -> Result<PartitionTable> {
    let sector_size = parse_logical_sector_size(output).unwrap_or(SECTOR_SIZE);
    let mut table = PartitionTable::unpartitioned(sector_size);
    table.kind = output.lines().find_map(|line| {
        line.trim()
            .strip_prefix("Disklabel type:")
            .and_then(PartitionTableType::parse)
    });

    let mut columns: Option<Vec<Column>> = None;
    for line in output.lines() {
        let line = line.trim();
        if line.starts_with("Device") && line.contains("Start") && line.contains("End") {
            let header: Vec<Column> = line
                .split_whitespace()
                .filter(|name| *name != "Device" && *name != "Boot")
                .map(Column::from_header)
                .collect();
            if !header.contains(&Column::Id) {
                table.kind = Some(PartitionTableType::Gpt);
                return Ok(table);
            }
            if table.kind.is_none() {
                table.kind = Some(PartitionTableType::Mbr);
            }
            columns = Some(header);
            continue;
        }

        let Some(columns) = columns.as_deref() else {
            continue;
        };
        if !line.starts_with('/') {
            continue;
        }
        table
            .entries
            .push(parse_row(line, columns, sector_size).map_err(|detail| {
                SysError::parse("fdisk", format!("{device}: {detail} in `{line}`"))
            })?);
    }

    Ok(table)
}

fn parse_row(
    line: &str,
    columns: &[Column],
    sector_size: u64,
) -> std::result::Result<PartitionTableEntry, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let device = tokens[0];
    let boot = tokens.get(1) == Some(&"*");
    let values = &tokens[if boot { 2 } else { 1 }..];

    // Last header column is the free-text system/type name
    let fixed = columns.len().saturating_sub(1);
    if values.len() < fixed {
        return Err(format!("expected {} columns, found {}", fixed, values.len()));
    }

    let mut start_sector = None;
    let mut end_sector = None;
    let mut blocks = None;
    let mut sectors = None;
    let mut type_id = None;
    for (column, value) in columns[..fixed].iter().zip(values) {
        match column {
            Column::Start => start_sector = Some(parse_count(value)?),
            Column::End => end_sector = Some(parse_count(value)?),
            Column::Blocks => blocks = Some(parse_count(value)?),
            Column::Sectors => sectors = Some(parse_count(value)?),
            Column::Id => type_id = Some(normalize_type_id(value)),
            Column::Size | Column::Other => {}
        }
    }

    let start_sector = start_sector.ok_or("missing start sector")?;
    let end_sector = end_sector.ok_or("missing end sector")?;
    if end_sector < start_sector {
        return Err(format!("end sector {end_sector} before start {start_sector}"));
    }
    let blocks = blocks.unwrap_or_else(|| {
        sectors.unwrap_or(end_sector - start_sector + 1) * sector_size / 1024
    });

    Ok(PartitionTableEntry {
        index: partition_number(device).ok_or("device has no partition number")?,
        device: device.to_string(),
        start_sector,
        end_sector,
        blocks,
        type_id: type_id.ok_or("missing type id")?,
        system: values[fixed..].join(" "),
        boot,
    })
}

/// fdisk marks odd-sized partitions with a trailing `+` (and occasionally `-`)
fn parse_count(value: &str) -> std::result::Result<u64, String> {
    value
        .trim_end_matches(['+', '-'])
        .parse()
        .map_err(|_| format!("invalid number `{value}`"))
}

fn partition_number(device: &str) -> Option<u32> {
    let digits = device.len() - device.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    device[device.len() - digits..].parse().ok()
}
