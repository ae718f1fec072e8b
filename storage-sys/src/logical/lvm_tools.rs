// SPDX-License-Identifier: GPL-3.0-only

//! LVM reporting and activation through the lvm2 command line tools
//!
//! Reports are requested with `--nameprefixes`, so every row is a list of
//! `LVM2_KEY='value'` pairs. Values are quoted and may contain spaces.

use std::collections::BTreeMap;

use storage_types::{LogicalSegment, LogicalVolumeInfo, PhysicalVolumeInfo, PvSegment, VolumeGroupInfo};
use tracing::debug;

use crate::{CommandRunner, Result, SysError};

const REPORT_FLAGS: [&str; 5] = ["--noheadings", "--nameprefixes", "--units", "b", "--nosuffix"];

const VG_FIELDS: &str = "vg_name,vg_uuid,vg_extent_size,pv_count,lv_count,vg_missing_pv_count";
const PV_FIELDS: &str = "pv_name,pv_uuid,vg_name,pv_size,pe_start,pv_attr";
const PVSEG_FIELDS: &str = "pv_name,vg_name,pvseg_start,pvseg_size,lv_name";
const LVSEG_FIELDS: &str =
    "vg_name,lv_name,lv_path,segtype,seg_start_pe,seg_size_pe,seg_pe_ranges";

/// PV name LVM prints for a PV whose device it cannot find
pub const UNKNOWN_DEVICE: &str = "[unknown]";

#[derive(Debug, Clone, PartialEq, Eq)]
struct VgRow {
    name: String,
    uuid: String,
    extent_size: u64,
    pv_count: u32,
    lv_count: u32,
    missing_pv_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PvRow {
    pv_name: String,
    uuid: String,
    vg_name: Option<String>,
    size: u64,
    pe_start: u64,
    attr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PvSegRow {
    pv_name: String,
    start: u64,
    size: u64,
    lv_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LvSegRow {
    vg_name: String,
    lv_name: String,
    lv_path: String,
    segtype: String,
    start_pe: u64,
    pe_ranges: String,
}

/// Split one `--nameprefixes` row into lower-cased field names and values.
fn parse_prefixed_line(line: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    let mut rest = line.trim();

    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim();
        let key = key.strip_prefix("LVM2_").unwrap_or(key).to_ascii_lowercase();
        let after = &rest[eq + 1..];

        let (value, remaining) = match after.chars().next() {
            Some(quote @ ('\'' | '"')) => {
                let body = &after[1..];
                match body.find(quote) {
                    Some(end) => (&body[..end], &body[end + 1..]),
                    None => (body, ""),
                }
            }
            _ => match after.find(char::is_whitespace) {
                Some(end) => (&after[..end], &after[end..]),
                None => (after, ""),
            },
        };

        fields.insert(key, value.to_string());
        rest = remaining.trim_start();
    }

    fields
}

fn rows(output: &str) -> impl Iterator<Item = BTreeMap<String, String>> + '_ {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_prefixed_line)
}

fn field<'a>(row: &'a BTreeMap<String, String>, name: &str, report: &str) -> Result<&'a str> {
    row.get(name)
        .map(|value| value.trim())
        .ok_or_else(|| SysError::parse(report, format!("missing field {name}")))
}

fn number<T: std::str::FromStr>(row: &BTreeMap<String, String>, name: &str, report: &str) -> Result<T> {
    let value = field(row, name, report)?;
    value
        .parse()
        .map_err(|_| SysError::parse(report, format!("field {name} is not a number: `{value}`")))
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Hidden LVs are reported in brackets (`[root_rimage_0]`).
fn strip_brackets(name: &str) -> &str {
    name.strip_prefix('[')
        .and_then(|name| name.strip_suffix(']'))
        .unwrap_or(name)
}

fn parse_vgs(output: &str) -> Result<Vec<VgRow>> {
    rows(output)
        .map(|row| {
            Ok(VgRow {
                name: field(&row, "vg_name", "vgs")?.to_string(),
                uuid: field(&row, "vg_uuid", "vgs")?.to_string(),
                extent_size: number(&row, "vg_extent_size", "vgs")?,
                pv_count: number(&row, "pv_count", "vgs")?,
                lv_count: number(&row, "lv_count", "vgs")?,
                missing_pv_count: number(&row, "vg_missing_pv_count", "vgs")?,
            })
        })
        .collect()
}

fn parse_pvs(output: &str) -> Result<Vec<PvRow>> {
    rows(output)
        .map(|row| {
            Ok(PvRow {
                pv_name: field(&row, "pv_name", "pvs")?.to_string(),
                uuid: field(&row, "pv_uuid", "pvs")?.to_string(),
                vg_name: optional(field(&row, "vg_name", "pvs")?),
                size: number(&row, "pv_size", "pvs")?,
                pe_start: number(&row, "pe_start", "pvs")?,
                attr: field(&row, "pv_attr", "pvs")?.to_string(),
            })
        })
        .collect()
}

fn parse_pv_segments(output: &str) -> Result<Vec<PvSegRow>> {
    rows(output)
        .map(|row| {
            Ok(PvSegRow {
                pv_name: field(&row, "pv_name", "pvs --segments")?.to_string(),
                start: number(&row, "pvseg_start", "pvs --segments")?,
                size: number(&row, "pvseg_size", "pvs --segments")?,
                lv_name: optional(strip_brackets(field(&row, "lv_name", "pvs --segments")?)),
            })
        })
        .collect()
}

fn parse_lv_segments(output: &str) -> Result<Vec<LvSegRow>> {
    rows(output)
        .map(|row| {
            Ok(LvSegRow {
                vg_name: field(&row, "vg_name", "lvs")?.to_string(),
                lv_name: strip_brackets(field(&row, "lv_name", "lvs")?).to_string(),
                lv_path: row.get("lv_path").cloned().unwrap_or_default(),
                segtype: field(&row, "segtype", "lvs")?.to_string(),
                start_pe: number(&row, "seg_start_pe", "lvs")?,
                pe_ranges: row.get("seg_pe_ranges").cloned().unwrap_or_default(),
            })
        })
        .collect()
}

/// Split `seg_pe_ranges` (`/dev/loop0:0-255 /dev/loop1:0-255`) into
/// `(pv, first, last)` triples. Ranges on hidden sub-LVs are skipped; those
/// LVs are reported with their own PV ranges.
fn parse_pe_ranges(ranges: &str) -> Result<Vec<(String, u64, u64)>> {
    let mut parsed = Vec::new();
    for range in ranges.split(|c: char| c.is_whitespace() || c == ',') {
        if !range.starts_with("/dev/") {
            continue;
        }
        let invalid = || SysError::parse("lvs", format!("invalid PE range `{range}`"));
        let (pv, extents) = range.rsplit_once(':').ok_or_else(invalid)?;
        let (first, last) = extents.split_once('-').ok_or_else(invalid)?;
        let first: u64 = first.parse().map_err(|_| invalid())?;
        let last: u64 = last.parse().map_err(|_| invalid())?;
        if last < first {
            return Err(invalid());
        }
        parsed.push((pv.to_string(), first, last));
    }
    Ok(parsed)
}

fn run_report(
    runner: &dyn CommandRunner,
    command: &str,
    leading: &[&str],
    fields: &str,
    trailing: &[&str],
) -> Result<String> {
    let mut args: Vec<&str> = leading.to_vec();
    args.extend(REPORT_FLAGS);
    args.extend(["-o", fields]);
    args.extend(trailing);
    runner.run(command, &args)
}

/// Rescan block devices so that PVs on freshly attached disks are known.
pub fn rescan(runner: &dyn CommandRunner) -> Result<()> {
    runner.run("pvscan", &[])?;
    runner.run("vgscan", &[])?;
    Ok(())
}

pub fn set_volume_group_active(runner: &dyn CommandRunner, vg_name: &str, active: bool) -> Result<()> {
    let flag = if active { "y" } else { "n" };
    debug!(vg = vg_name, active, "changing volume group activation");
    runner.run("vgchange", &["--activate", flag, vg_name])?;
    Ok(())
}

/// Every volume group the host sees. `members` is left for the caller to fill.
pub fn list_volume_groups(runner: &dyn CommandRunner) -> Result<Vec<VolumeGroupInfo>> {
    let output = run_report(runner, "vgs", &[], VG_FIELDS, &[])?;
    Ok(parse_vgs(&output)?
        .into_iter()
        .map(|vg| VolumeGroupInfo {
            name: vg.name,
            uuid: vg.uuid,
            extent_size: vg.extent_size,
            pv_count: vg.pv_count,
            lv_count: vg.lv_count,
            missing_pv_count: vg.missing_pv_count,
            members: Vec::new(),
        })
        .collect())
}

/// Every physical volume the host sees, with its allocation map.
///
/// Disk placement (`device_offset`, `disk`) is not known here and is left
/// unresolved.
pub fn list_physical_volumes(runner: &dyn CommandRunner) -> Result<Vec<PhysicalVolumeInfo>> {
    let pvs = parse_pvs(&run_report(runner, "pvs", &[], PV_FIELDS, &[])?)?;
    let segments = parse_pv_segments(&run_report(runner, "pvs", &["--segments"], PVSEG_FIELDS, &[])?)?;
    Ok(physical_volumes_from_rows(pvs, segments))
}

fn physical_volumes_from_rows(pvs: Vec<PvRow>, segments: Vec<PvSegRow>) -> Vec<PhysicalVolumeInfo> {
    pvs.into_iter()
        .map(|pv| {
            let mut pv_segments: Vec<PvSegment> = segments
                .iter()
                .filter(|seg| seg.pv_name == pv.pv_name)
                .map(|seg| PvSegment {
                    start: seg.start,
                    size: seg.size,
                    lv_name: seg.lv_name.clone(),
                })
                .collect();
            pv_segments.sort_by_key(|seg| seg.start);

            let missing = pv.pv_name == UNKNOWN_DEVICE || pv.attr.chars().nth(2) == Some('m');
            PhysicalVolumeInfo {
                device: pv.pv_name,
                uuid: pv.uuid,
                vg_name: pv.vg_name,
                size: pv.size,
                pe_start: pv.pe_start,
                device_offset: 0,
                disk: None,
                missing,
                segments: pv_segments,
            }
        })
        .collect()
}

/// Logical volumes of one volume group, including hidden sub-volumes, with
/// their segment maps.
pub fn list_logical_volumes(runner: &dyn CommandRunner, vg_name: &str) -> Result<Vec<LogicalVolumeInfo>> {
    let output = run_report(runner, "lvs", &["-a", "--segments"], LVSEG_FIELDS, &[vg_name])?;
    let rows: Vec<LvSegRow> = parse_lv_segments(&output)?
        .into_iter()
        .filter(|row| row.vg_name == vg_name)
        .collect();
    logical_volumes_from_rows(rows)
}

fn logical_volumes_from_rows(rows: Vec<LvSegRow>) -> Result<Vec<LogicalVolumeInfo>> {
    let mut volumes: Vec<LogicalVolumeInfo> = Vec::new();

    for row in rows {
        let ranges = parse_pe_ranges(&row.pe_ranges)?;
        let index = match volumes
            .iter()
            .position(|lv| lv.vg_name == row.vg_name && lv.name == row.lv_name)
        {
            Some(index) => index,
            None => {
                volumes.push(LogicalVolumeInfo {
                    name: row.lv_name.clone(),
                    vg_name: row.vg_name.clone(),
                    device_path: row.lv_path.clone(),
                    segments: Vec::new(),
                });
                volumes.len() - 1
            }
        };

        for (pv_name, first, last) in ranges {
            volumes[index].segments.push(LogicalSegment {
                start_extent: row.start_pe,
                extent_count: last - first + 1,
                pv_name,
                pv_start_extent: first,
                segtype: row.segtype.clone(),
            });
        }
    }

    for volume in &mut volumes {
        volume.segments.sort_by_key(|seg| (seg.start_extent, seg.pv_start_extent));
    }
    Ok(volumes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_prefixed_pairs_with_spaces() {
        let row = parse_prefixed_line(
            "  LVM2_VG_NAME='vg data' LVM2_PV_COUNT='2' LVM2_LV_PATH='' LVM2_SEGTYPE=linear",
        );
        assert_eq!(row["vg_name"], "vg data");
        assert_eq!(row["pv_count"], "2");
        assert_eq!(row["lv_path"], "");
        assert_eq!(row["segtype"], "linear");
    }

    #[test]
    fn parses_lvm_outputs() {
        let vgs = parse_vgs(
            "  LVM2_VG_NAME='vg0' LVM2_VG_UUID='abc' LVM2_VG_EXTENT_SIZE='4194304' LVM2_PV_COUNT='1' LVM2_LV_COUNT='2' LVM2_VG_MISSING_PV_COUNT='0'\n",
        )
        .unwrap();
        let pvs = parse_pvs(
            "  LVM2_PV_NAME='/dev/loop0' LVM2_PV_UUID='pv1' LVM2_VG_NAME='vg0' LVM2_PV_SIZE='1099507433472' LVM2_PE_START='1048576' LVM2_PV_ATTR='a--'\n  LVM2_PV_NAME='[unknown]' LVM2_PV_UUID='pv2' LVM2_VG_NAME='vg1' LVM2_PV_SIZE='1073741824' LVM2_PE_START='1048576' LVM2_PV_ATTR='a-m'\n",
        )
        .unwrap();

        assert_eq!(vgs.len(), 1);
        assert_eq!(vgs[0].name, "vg0");
        assert_eq!(vgs[0].extent_size, 4 * 1024 * 1024);
        assert_eq!(pvs.len(), 2);
        assert_eq!(pvs[0].vg_name.as_deref(), Some("vg0"));

        let volumes = physical_volumes_from_rows(pvs, Vec::new());
        assert!(!volumes[0].missing);
        assert!(volumes[1].missing);
    }

    #[test]
    fn missing_field_is_a_parse_error() {
        let error = parse_vgs("  LVM2_VG_NAME='vg0'\n").unwrap_err();
        assert!(matches!(error, SysError::Parse { .. }));
    }

    #[test]
    fn pv_segments_attach_to_their_pv() {
        let pvs = parse_pvs(
            "  LVM2_PV_NAME='/dev/loop0p2' LVM2_PV_UUID='pv1' LVM2_VG_NAME='vg0' LVM2_PV_SIZE='2147483648' LVM2_PE_START='1048576' LVM2_PV_ATTR='a--'\n",
        )
        .unwrap();
        let segments = parse_pv_segments(
            "  LVM2_PV_NAME='/dev/loop0p2' LVM2_VG_NAME='vg0' LVM2_PVSEG_START='256' LVM2_PVSEG_SIZE='255' LVM2_LV_NAME=''\n  LVM2_PV_NAME='/dev/loop0p2' LVM2_VG_NAME='vg0' LVM2_PVSEG_START='0' LVM2_PVSEG_SIZE='256' LVM2_LV_NAME='root'\n",
        )
        .unwrap();

        let volumes = physical_volumes_from_rows(pvs, segments);
        assert_eq!(volumes[0].segments.len(), 2);
        assert_eq!(volumes[0].segments[0].lv_name.as_deref(), Some("root"));
        assert_eq!(volumes[0].allocated_extents(), 256);
    }

    #[test]
    fn builds_segment_maps_from_rows() {
        let rows = parse_lv_segments(
            "  LVM2_VG_NAME='vg0' LVM2_LV_NAME='data' LVM2_LV_PATH='/dev/vg0/data' LVM2_SEGTYPE='linear' LVM2_SEG_START_PE='0' LVM2_SEG_SIZE_PE='256' LVM2_SEG_PE_RANGES='/dev/loop0:0-255'\n\
  LVM2_VG_NAME='vg0' LVM2_LV_NAME='data' LVM2_LV_PATH='/dev/vg0/data' LVM2_SEGTYPE='linear' LVM2_SEG_START_PE='256' LVM2_SEG_SIZE_PE='128' LVM2_SEG_PE_RANGES='/dev/loop1:0-127'\n\
  LVM2_VG_NAME='vg0' LVM2_LV_NAME='mirror' LVM2_LV_PATH='/dev/vg0/mirror' LVM2_SEGTYPE='raid1' LVM2_SEG_START_PE='0' LVM2_SEG_SIZE_PE='16' LVM2_SEG_PE_RANGES='mirror_rimage_0:0-15 mirror_rimage_1:0-15'\n\
  LVM2_VG_NAME='vg0' LVM2_LV_NAME='[mirror_rimage_0]' LVM2_LV_PATH='' LVM2_SEGTYPE='linear' LVM2_SEG_START_PE='0' LVM2_SEG_SIZE_PE='16' LVM2_SEG_PE_RANGES='/dev/loop0:300-315'\n",
        )
        .unwrap();

        let volumes = logical_volumes_from_rows(rows).unwrap();
        assert_eq!(volumes.len(), 3);

        let data = &volumes[0];
        assert_eq!(data.display_name(), "vg0/data");
        assert_eq!(data.segments.len(), 2);
        assert_eq!(data.segments[1].pv_name, "/dev/loop1");
        assert_eq!(data.segments[1].start_extent, 256);
        assert_eq!(data.extent_count(), 384);

        assert!(volumes[1].segments.is_empty());
        assert_eq!(volumes[2].name, "mirror_rimage_0");
        assert_eq!(volumes[2].segments[0].pv_start_extent, 300);
    }

    #[test]
    fn striped_ranges_become_one_segment_per_pv() {
        let ranges = parse_pe_ranges("/dev/loop0:0-63 /dev/loop1:0-63").unwrap();
        assert_eq!(
            ranges,
            vec![
                ("/dev/loop0".to_string(), 0, 63),
                ("/dev/loop1".to_string(), 0, 63),
            ]
        );
        assert!(parse_pe_ranges("/dev/loop0:9-3").is_err());
        assert!(parse_pe_ranges("").unwrap().is_empty());
    }
}
