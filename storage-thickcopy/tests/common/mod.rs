#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use storage_testing::fakes::FakeHost;
use storage_thickcopy::{ThickCopy, ThickCopyConfig};
use storage_types::{ThickCopyResult, VmDisks};
use tempfile::TempDir;

/// Scratch directories for one discovery run
pub struct Workspace {
    pub extents: TempDir,
    pub dest: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            extents: tempfile::tempdir().unwrap(),
            dest: tempfile::tempdir().unwrap(),
        }
    }

    pub fn config(&self, host: &FakeHost) -> ThickCopyConfig {
        ThickCopyConfig {
            extents_dir: self.extents.path().to_path_buf(),
            sysfs_root: host.sysfs_root().to_path_buf(),
            ..ThickCopyConfig::default()
        }
    }

    pub fn vm(&self, host: &FakeHost, images: &[&str]) -> VmDisks {
        VmDisks {
            vm_id: "vm-1".to_string(),
            disks: images
                .iter()
                .map(|image| host.source_disk(image, self.dest.path()).unwrap())
                .collect(),
        }
    }

    pub fn extents_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(self.extents.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        files.sort();
        files
    }
}

pub fn run(host: &FakeHost, config: &ThickCopyConfig, vm: &VmDisks) -> ThickCopyResult {
    ThickCopy::new(config, host, host, host)
        .discover_extents(vm)
        .unwrap()
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

pub fn data_file(result: &ThickCopyResult, image: &str) -> String {
    read(result.disks[image].extents_file.as_ref().unwrap())
}
