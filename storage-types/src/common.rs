//! Common utility types shared across models

use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

/// Unit of kernel-exposed geometry (`/sys/block/*/size`, `start`)
pub const SECTOR_SIZE: u64 = 512;

/// A byte range representing a contiguous region of a disk
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    /// Start byte (inclusive)
    pub start: u64,

    /// End byte (exclusive)
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, length: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(length),
        }
    }

    /// Get the size of this range in bytes
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Remove every region covered by `holes`, returning what is left in ascending order.
    pub fn subtract(&self, holes: &[ByteRange]) -> Vec<ByteRange> {
        let mut holes: Vec<ByteRange> = holes
            .iter()
            .filter(|hole| hole.overlaps(self))
            .copied()
            .collect();
        holes.sort();

        let mut remaining = Vec::new();
        let mut cursor = self.start;
        for hole in holes {
            if hole.start > cursor {
                remaining.push(ByteRange {
                    start: cursor,
                    end: hole.start.min(self.end),
                });
            }
            cursor = cursor.max(hole.end);
            if cursor >= self.end {
                break;
            }
        }
        if cursor < self.end {
            remaining.push(ByteRange {
                start: cursor,
                end: self.end,
            });
        }

        remaining
    }
}

/// Sort ranges and merge overlaps. Touching ranges are merged only when
/// `merge_adjacent` is set; empty ranges are dropped.
pub fn coalesce(mut ranges: Vec<ByteRange>, merge_adjacent: bool) -> Vec<ByteRange> {
    ranges.retain(|range| !range.is_empty());
    ranges.sort();

    let mut merged: Vec<ByteRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last)
                if range.start < last.end || (merge_adjacent && range.start == last.end) =>
            {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }

    merged
}

/// Convert bytes to human-readable format (e.g., "1.50 GB")
pub fn bytes_to_pretty(bytes: &u64, add_bytes: bool) -> String {
    let mut steps = 0;
    let mut val: f64 = *bytes as f64;

    while val > 1024. && steps <= 8 {
        val /= 1024.;
        steps += 1;
    }

    let unit = match steps {
        0 => "B",
        1 => "KB",
        2 => "MB",
        3 => "GB",
        4 => "TB",
        5 => "PB",
        6 => "EB",
        7 => "ZB",
        8 => "YB",
        _ => "Not Supported",
    };

    if add_bytes {
        let bytes_str = bytes.to_formatted_string(&Locale::en);
        format!("{:.2} {} ({} bytes)", val, unit, bytes_str)
    } else {
        format!("{:.2} {}", val, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtract_leaves_gaps_around_holes() {
        let outer = ByteRange { start: 0, end: 100 };
        let rest = outer.subtract(&[
            ByteRange { start: 60, end: 80 },
            ByteRange { start: 10, end: 20 },
            ByteRange { start: 200, end: 300 },
        ]);
        assert_eq!(
            rest,
            vec![
                ByteRange { start: 0, end: 10 },
                ByteRange { start: 20, end: 60 },
                ByteRange { start: 80, end: 100 },
            ]
        );
    }

    #[test]
    fn subtract_whole_range_leaves_nothing() {
        let outer = ByteRange { start: 10, end: 20 };
        assert!(outer.subtract(&[ByteRange { start: 0, end: 30 }]).is_empty());
    }

    #[test]
    fn coalesce_merges_overlaps_and_optionally_adjacent() {
        let ranges = vec![
            ByteRange { start: 50, end: 60 },
            ByteRange { start: 0, end: 10 },
            ByteRange { start: 5, end: 20 },
            ByteRange { start: 20, end: 30 },
            ByteRange { start: 70, end: 70 },
        ];

        assert_eq!(
            coalesce(ranges.clone(), false),
            vec![
                ByteRange { start: 0, end: 20 },
                ByteRange { start: 20, end: 30 },
                ByteRange { start: 50, end: 60 },
            ]
        );
        assert_eq!(
            coalesce(ranges, true),
            vec![
                ByteRange { start: 0, end: 30 },
                ByteRange { start: 50, end: 60 },
            ]
        );
    }

    #[test]
    fn pretty_prints_gibibytes() {
        assert_eq!(bytes_to_pretty(&(10 * 1024 * 1024 * 1024), false), "10.00 GB");
    }
}
