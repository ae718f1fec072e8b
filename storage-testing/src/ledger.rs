use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TestingError};
use crate::spec::workspace_root;

/// What a lab setup left attached on the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabState {
    pub spec_name: String,
    pub image_paths: Vec<String>,
    /// `disk<N>` binding to loop device
    pub loop_devices: BTreeMap<String, String>,
    pub volume_groups: Vec<String>,
    pub updated_at: u64,
}

impl LabState {
    pub fn new(spec_name: &str) -> Self {
        Self {
            spec_name: spec_name.to_string(),
            image_paths: Vec::new(),
            loop_devices: BTreeMap::new(),
            volume_groups: Vec::new(),
            updated_at: unix_timestamp(),
        }
    }
}

fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}

pub fn base_dir() -> PathBuf {
    workspace_root().join("target/storage-testing/lab-state")
}

pub fn state_path(spec_name: &str) -> PathBuf {
    base_dir().join(format!("{}.json", spec_name))
}

pub fn exists(spec_name: &str) -> bool {
    state_path(spec_name).exists()
}

pub fn load(spec_name: &str) -> Result<LabState> {
    let path = state_path(spec_name);
    let raw = fs::read_to_string(&path).map_err(|error| TestingError::LedgerIo {
        path: path.clone(),
        reason: error.to_string(),
    })?;

    serde_json::from_str(&raw).map_err(|error| TestingError::LedgerIo {
        path,
        reason: error.to_string(),
    })
}

pub fn save(state: &LabState) -> Result<PathBuf> {
    let dir = base_dir();
    fs::create_dir_all(&dir).map_err(|error| TestingError::LedgerIo {
        path: dir.clone(),
        reason: error.to_string(),
    })?;

    let path = state_path(&state.spec_name);
    let content = serde_json::to_string_pretty(state).map_err(|error| TestingError::LedgerIo {
        path: path.clone(),
        reason: error.to_string(),
    })?;

    fs::write(&path, content).map_err(|error| TestingError::LedgerIo {
        path: path.clone(),
        reason: error.to_string(),
    })?;

    Ok(path)
}

pub fn remove(spec_name: &str) -> Result<()> {
    let path = state_path(spec_name);
    if path.exists() {
        fs::remove_file(&path).map_err(|error| TestingError::LedgerIo {
            path,
            reason: error.to_string(),
        })?;
    }
    Ok(())
}
