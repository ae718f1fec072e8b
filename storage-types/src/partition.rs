//! Partition table models
//!
//! A `PartitionTable` is what the partition reader produced for one disk. MBR
//! and GPT tables share the same entry shape so the classifier never has to
//! care which one it is looking at.

use serde::{Deserialize, Serialize};

use crate::ByteRange;

/// MBR type id written into the single protective entry of a GPT disk
pub const GPT_PROTECTIVE_TYPE_ID: &str = "ee";

/// MBR type ids of extended partition containers (CHS, LBA, Linux)
pub const EXTENDED_TYPE_IDS: &[&str] = &["5", "f", "85"];

/// Partition table type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionTableType {
    /// GPT (GUID Partition Table)
    Gpt,

    /// MBR/DOS (Master Boot Record)
    Mbr,
}

impl PartitionTableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Mbr => "dos",
        }
    }

    /// Parse from the label names used by fdisk/sgdisk
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpt" => Some(Self::Gpt),
            "dos" | "mbr" => Some(Self::Mbr),
            _ => None,
        }
    }
}

/// One row of a partition table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionTableEntry {
    /// Partition number (1-based, logical MBR partitions start at 5)
    pub index: u32,

    /// Device node of the partition (e.g., "/dev/loop0p1")
    pub device: String,

    /// First sector (inclusive)
    pub start_sector: u64,

    /// Last sector (inclusive)
    pub end_sector: u64,

    /// Size in 1 KiB blocks, as reported by fdisk
    pub blocks: u64,

    /// Normalized type id ("83", "8e", "ee", "8300", ...)
    pub type_id: String,

    /// Human readable system/name column
    pub system: String,

    /// Boot flag
    pub boot: bool,
}

impl PartitionTableEntry {
    pub fn sectors(&self) -> u64 {
        self.end_sector.saturating_sub(self.start_sector) + 1
    }

    pub fn start_bytes(&self, sector_size: u64) -> u64 {
        self.start_sector * sector_size
    }

    pub fn length_bytes(&self, sector_size: u64) -> u64 {
        self.sectors() * sector_size
    }

    /// Bytes covered on the disk
    pub fn byte_range(&self, sector_size: u64) -> ByteRange {
        ByteRange::new(
            self.start_bytes(sector_size),
            self.length_bytes(sector_size),
        )
    }

    pub fn is_extended(&self) -> bool {
        EXTENDED_TYPE_IDS.contains(&self.type_id.as_str())
    }

    pub fn is_gpt_protective(&self) -> bool {
        self.type_id == GPT_PROTECTIVE_TYPE_ID
    }
}

/// Partition layout of one disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionTable {
    /// Table type, `None` when the disk has no recognizable table
    pub kind: Option<PartitionTableType>,

    /// Logical sector size in bytes
    pub sector_size: u64,

    /// Entries in table order
    pub entries: Vec<PartitionTableEntry>,

    /// GPT only: sectors after this one hold the backup table
    pub last_usable_sector: Option<u64>,
}

impl PartitionTable {
    pub fn unpartitioned(sector_size: u64) -> Self {
        Self {
            kind: None,
            sector_size,
            entries: Vec::new(),
            last_usable_sector: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Start byte of the lowest partition, i.e. the end of the table area
    pub fn first_partition_start(&self) -> Option<u64> {
        self.entries
            .iter()
            .map(|entry| entry.start_bytes(self.sector_size))
            .min()
    }

    /// Single protective entry left by a GPT disk when read as MBR
    pub fn is_protective_mbr(&self) -> bool {
        self.entries.len() == 1 && self.entries[0].is_gpt_protective()
    }
}

/// Normalize a partition type id: lower case, and MBR byte ids without leading zeros.
pub fn normalize_type_id(raw: &str) -> String {
    let lowered = raw.trim().trim_start_matches("0x").to_ascii_lowercase();
    if lowered.len() <= 2 && u8::from_str_radix(&lowered, 16).is_ok() {
        let trimmed = lowered.trim_start_matches('0');
        if trimmed.is_empty() {
            return "0".to_string();
        }
        return trimmed.to_string();
    }
    lowered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u32, start: u64, end: u64, type_id: &str) -> PartitionTableEntry {
        PartitionTableEntry {
            index,
            device: format!("/dev/loop0p{index}"),
            start_sector: start,
            end_sector: end,
            blocks: (end - start + 1) / 2,
            type_id: type_id.to_string(),
            system: String::new(),
            boot: false,
        }
    }

    #[test]
    fn normalizes_type_ids() {
        assert_eq!(normalize_type_id("05"), "5");
        assert_eq!(normalize_type_id("0x0F"), "f");
        assert_eq!(normalize_type_id("EE"), "ee");
        assert_eq!(normalize_type_id("8E00"), "8e00");
        assert_eq!(normalize_type_id("00"), "0");
    }

    #[test]
    fn entry_geometry_is_inclusive_of_end_sector() {
        let e = entry(1, 2048, 206847, "83");
        assert_eq!(e.sectors(), 204800);
        assert_eq!(e.byte_range(512), ByteRange::new(2048 * 512, 204800 * 512));
    }

    #[test]
    fn detects_protective_mbr_and_extended_containers() {
        let table = PartitionTable {
            kind: Some(PartitionTableType::Mbr),
            sector_size: 512,
            entries: vec![entry(1, 1, 2147483647, "ee")],
            last_usable_sector: None,
        };
        assert!(table.is_protective_mbr());
        assert!(entry(4, 100, 200, "5").is_extended());
        assert!(!entry(1, 100, 200, "83").is_extended());
    }

    #[test]
    fn first_partition_start_uses_lowest_entry() {
        let table = PartitionTable {
            kind: Some(PartitionTableType::Mbr),
            sector_size: 512,
            entries: vec![entry(2, 4096, 8191, "83"), entry(1, 2048, 4095, "83")],
            last_usable_sector: None,
        };
        assert_eq!(table.first_partition_start(), Some(2048 * 512));
        assert_eq!(PartitionTable::unpartitioned(512).first_partition_start(), None);
    }
}
