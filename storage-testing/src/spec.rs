use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TestingError};

/// A loop-backed fixture: sparse images, their partitions, and the LVM
/// layout built on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabSpec {
    pub name: String,
    pub artifacts_root: Option<String>,
    pub disks: Vec<DiskSpec>,
    #[serde(default)]
    pub volume_groups: Vec<VolumeGroupSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskSpec {
    pub file_name: String,
    pub size_bytes: u64,
    /// `gpt` or `msdos`; no table when absent
    pub partition_table: Option<String>,
    #[serde(default)]
    pub partitions: Vec<PartitionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionSpec {
    pub index: u32,
    /// parted part-type: `primary`, `extended` or `logical` (a name on GPT)
    pub part_type: String,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub lvm: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeGroupSpec {
    pub name: String,
    /// Members as `disk<N>` or `disk<N>p<M>`
    pub physical_volumes: Vec<String>,
    #[serde(default)]
    pub logical_volumes: Vec<LogicalVolumeSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogicalVolumeSpec {
    pub name: String,
    /// lvcreate `-L` size, e.g. `1G`
    pub size: String,
}

impl LabSpec {
    pub fn disk_binding(index: usize) -> String {
        format!("disk{index}")
    }
}

pub fn workspace_root() -> PathBuf {
    if let Ok(value) = std::env::var("STORAGE_TESTING_WORKSPACE_ROOT") {
        return PathBuf::from(value);
    }

    if let Ok(current_dir) = std::env::current_dir()
        && current_dir.join("resources/lab-specs").exists()
    {
        return current_dir;
    }

    let manifest_root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    if manifest_root.join("resources/lab-specs").exists() {
        return manifest_root;
    }

    PathBuf::from(".")
}

pub fn specs_root() -> PathBuf {
    workspace_root().join("resources/lab-specs")
}

pub fn spec_path_for_name(spec_name: &str) -> PathBuf {
    specs_root().join(format!("{}.toml", spec_name))
}

pub fn load_by_name(spec_name: &str) -> Result<LabSpec> {
    let path = spec_path_for_name(spec_name);
    if !path.exists() {
        return Err(TestingError::SpecNotFound {
            spec_name: spec_name.to_string(),
        });
    }

    let raw = fs::read_to_string(&path).map_err(|error| TestingError::SpecInvalid {
        spec_name: spec_name.to_string(),
        reason: error.to_string(),
    })?;

    let spec: LabSpec = toml::from_str(&raw).map_err(|error| TestingError::SpecInvalid {
        spec_name: spec_name.to_string(),
        reason: error.to_string(),
    })?;

    validate(&spec)?;
    Ok(spec)
}

pub fn validate(spec: &LabSpec) -> Result<()> {
    let invalid = |reason: String| TestingError::SpecInvalid {
        spec_name: if spec.name.is_empty() {
            "<unknown>".to_string()
        } else {
            spec.name.clone()
        },
        reason,
    };

    if spec.name.is_empty() {
        return Err(invalid("name must not be empty".to_string()));
    }
    if spec.disks.is_empty() {
        return Err(invalid("disks must not be empty".to_string()));
    }

    let mut members = BTreeSet::new();
    for (index, disk) in spec.disks.iter().enumerate() {
        members.insert(LabSpec::disk_binding(index));
        match disk.partition_table.as_deref() {
            None if !disk.partitions.is_empty() => {
                return Err(invalid(format!("{} has partitions but no partition_table", disk.file_name)));
            }
            None | Some("gpt") | Some("msdos") => {}
            Some(other) => {
                return Err(invalid(format!("partition_table must be 'gpt' or 'msdos', got '{other}'")));
            }
        }
        for partition in &disk.partitions {
            members.insert(format!("{}p{}", LabSpec::disk_binding(index), partition.index));
        }
    }

    for vg in &spec.volume_groups {
        if vg.physical_volumes.is_empty() {
            return Err(invalid(format!("volume group {} has no physical volumes", vg.name)));
        }
        if let Some(unknown) = vg.physical_volumes.iter().find(|pv| !members.contains(*pv)) {
            return Err(invalid(format!("volume group {} names unknown device {unknown}", vg.name)));
        }
    }

    Ok(())
}

pub fn artifacts_root(spec: &LabSpec) -> PathBuf {
    match &spec.artifacts_root {
        Some(value) => workspace_root().join(value),
        None => workspace_root().join(format!("target/storage-testing/images/{}", spec.name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_spec_name_without_extension() {
        let spec = load_by_name("lvm-single-disk").unwrap();
        assert_eq!(spec.name, "lvm-single-disk");
        assert_eq!(spec.volume_groups[0].logical_volumes.len(), 4);
    }

    #[test]
    fn rejects_unknown_members() {
        let spec: LabSpec = toml::from_str(
            r#"
name = "broken"

[[disks]]
file_name = "disk0.img"
size_bytes = 1073741824

[[volume_groups]]
name = "vg0"
physical_volumes = ["disk0p1"]
"#,
        )
        .unwrap();
        let error = validate(&spec).unwrap_err();
        assert!(error.to_string().contains("disk0p1"));
    }
}
