// SPDX-License-Identifier: GPL-3.0-only

//! Extents files
//!
//! One `start,length` pair per line, decimal bytes, ascending and
//! non-overlapping. This is all the byte-range copier gets to see.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use storage_types::{ByteRange, coalesce};
use tracing::debug;

use crate::config::ThickCopyConfig;
use crate::error::{Result, ThickCopyError};

pub const DATA_SUFFIX: &str = ".extents";
pub const METADATA_SUFFIX: &str = ".metadata";

/// A file kept on disk by [`ExtentsWriter::write`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub ranges: usize,
    pub total_bytes: u64,
}

/// Destination for extents files
pub trait ExtentsSink {
    /// Directory the files land in
    fn dir(&self) -> &Path;

    /// Persist `ranges`, returning `None` when there is nothing to write
    fn write(&self, ranges: Vec<ByteRange>, suffix: &str) -> io::Result<Option<WrittenFile>>;
}

#[derive(Debug, Clone)]
pub struct ExtentsWriter {
    dir: PathBuf,
    prefix: String,
    merge_adjacent: bool,
}

impl ExtentsWriter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, merge_adjacent: bool) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            merge_adjacent,
        }
    }

    pub fn from_config(config: &ThickCopyConfig) -> Self {
        Self::new(&config.extents_dir, &config.extents_prefix, config.merge_adjacent)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `ranges` to a fresh uniquely named file. Nothing is written
    /// for an empty list. The file only survives once fully flushed.
    pub fn write(&self, ranges: Vec<ByteRange>, suffix: &str) -> io::Result<Option<WrittenFile>> {
        let ranges = coalesce(ranges, self.merge_adjacent);
        if ranges.is_empty() {
            return Ok(None);
        }

        fs::create_dir_all(&self.dir)?;
        let mut file = tempfile::Builder::new()
            .prefix(&self.prefix)
            .suffix(suffix)
            .tempfile_in(&self.dir)?;

        {
            let mut writer = BufWriter::new(file.as_file_mut());
            writer.write_all(format_extents(&ranges).as_bytes())?;
            writer.flush()?;
        }
        file.as_file().sync_all()?;

        let (_, path) = file.keep().map_err(|e| e.error)?;
        let total_bytes = ranges.iter().map(ByteRange::size).sum();
        debug!(path = %path.display(), ranges = ranges.len(), total_bytes, "wrote extents file");

        Ok(Some(WrittenFile {
            path,
            ranges: ranges.len(),
            total_bytes,
        }))
    }
}

impl ExtentsSink for ExtentsWriter {
    fn dir(&self) -> &Path {
        ExtentsWriter::dir(self)
    }

    fn write(&self, ranges: Vec<ByteRange>, suffix: &str) -> io::Result<Option<WrittenFile>> {
        ExtentsWriter::write(self, ranges, suffix)
    }
}

pub fn format_extents(ranges: &[ByteRange]) -> String {
    ranges
        .iter()
        .map(|range| format!("{},{}\n", range.start, range.size()))
        .collect()
}

/// Parse extents text, rejecting anything the copier could misread.
pub fn parse_extents(text: &str) -> std::result::Result<Vec<ByteRange>, String> {
    let mut ranges: Vec<ByteRange> = Vec::new();

    for (number, line) in text.lines().enumerate() {
        let number = number + 1;
        let (start, length) = line
            .split_once(',')
            .ok_or_else(|| format!("line {number}: expected `start,length`"))?;
        let start: u64 = start
            .parse()
            .map_err(|_| format!("line {number}: invalid start {start:?}"))?;
        let length: u64 = length
            .parse()
            .map_err(|_| format!("line {number}: invalid length {length:?}"))?;

        if length == 0 {
            return Err(format!("line {number}: empty range"));
        }
        let end = start
            .checked_add(length)
            .ok_or_else(|| format!("line {number}: range overflows"))?;

        if let Some(previous) = ranges.last() {
            if start < previous.start {
                return Err(format!("line {number}: ranges are not sorted"));
            }
            if start < previous.end {
                return Err(format!("line {number}: overlaps the previous range"));
            }
        }
        ranges.push(ByteRange { start, end });
    }

    Ok(ranges)
}

pub fn read_extents_file(path: &Path) -> Result<Vec<ByteRange>> {
    let text = fs::read_to_string(path).map_err(|e| ThickCopyError::ExtentsFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_extents(&text).map_err(|reason| ThickCopyError::ExtentsFile {
        path: path.to_path_buf(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_sorted_merged_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ExtentsWriter::new(dir.path(), "vm-1-", true);

        let written = writer
            .write(
                vec![
                    ByteRange::new(4096, 1024),
                    ByteRange::new(0, 1024),
                    ByteRange::new(1024, 1024),
                    ByteRange::new(4500, 100),
                ],
                DATA_SUFFIX,
            )
            .unwrap()
            .unwrap();

        assert_eq!(written.ranges, 2);
        assert_eq!(written.total_bytes, 3072);
        let name = written.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("vm-1-") && name.ends_with(DATA_SUFFIX));
        assert_eq!(fs::read_to_string(&written.path).unwrap(), "0,2048\n4096,1024\n");
        assert_eq!(
            read_extents_file(&written.path).unwrap(),
            vec![ByteRange::new(0, 2048), ByteRange::new(4096, 1024)]
        );
    }

    #[test]
    fn adjacent_ranges_stay_split_without_merging() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ExtentsWriter::new(dir.path(), "x-", false);
        let written = writer
            .write(vec![ByteRange::new(0, 512), ByteRange::new(512, 512)], DATA_SUFFIX)
            .unwrap()
            .unwrap();
        assert_eq!(fs::read_to_string(&written.path).unwrap(), "0,512\n512,512\n");
    }

    #[test]
    fn empty_list_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ExtentsWriter::new(dir.path().join("nested"), "x-", true);
        assert_eq!(writer.write(Vec::new(), DATA_SUFFIX).unwrap(), None);
        assert!(!dir.path().join("nested").exists());
    }

    #[test]
    fn parser_rejects_bad_files() {
        assert!(parse_extents("0,10\n10,10\n").is_ok());
        assert!(parse_extents("").unwrap().is_empty());
        assert!(parse_extents("0;10\n").unwrap_err().contains("line 1"));
        assert!(parse_extents("20,10\n0,10\n").unwrap_err().contains("not sorted"));
        assert!(parse_extents("0,10\n5,10\n").unwrap_err().contains("overlaps"));
        assert!(parse_extents("0,0\n").unwrap_err().contains("empty"));
        assert!(parse_extents("-1,10\n").is_err());
    }
}
