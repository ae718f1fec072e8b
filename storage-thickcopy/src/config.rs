// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ThickCopyError};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "THICKCOPY_CONFIG";

/// What to do with partitions and disks LVM does not describe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NonLvmPolicy {
    /// Copy the whole partition or disk
    #[default]
    FullCopy,

    /// Void the VM so the caller falls back to its own full-disk method
    Fallback,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: LoggingLevel,

    /// Daily rolling log files are written here when set
    pub directory: Option<PathBuf>,

    pub keep_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LoggingLevel::Info,
            directory: None,
            keep_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThickCopyConfig {
    /// Volume group holding the appliance's own storage, never scanned or copied
    pub reserved_volume_group: String,

    pub extents_dir: PathBuf,
    pub extents_prefix: String,
    pub non_lvm_policy: NonLvmPolicy,

    /// Merge ranges that touch but do not overlap
    pub merge_adjacent: bool,

    pub sysfs_root: PathBuf,

    /// Run `udevadm settle` after attaching loop devices
    pub settle_devices: bool,

    pub logging: LoggingConfig,
}

impl Default for ThickCopyConfig {
    fn default() -> Self {
        Self {
            reserved_volume_group: "appliance-vg".to_string(),
            extents_dir: std::env::temp_dir(),
            extents_prefix: "thickcopy-".to_string(),
            non_lvm_policy: NonLvmPolicy::FullCopy,
            merge_adjacent: true,
            sysfs_root: PathBuf::from("/sys"),
            settle_devices: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl ThickCopyConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|error| ThickCopyError::Config {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;
        let config = Self::from_toml_str(&raw).map_err(|reason| ThickCopyError::Config {
            path: path.to_path_buf(),
            reason,
        })?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> std::result::Result<Self, String> {
        let config: Self = toml::from_str(raw).map_err(|error| error.to_string())?;
        if config.reserved_volume_group.trim().is_empty() {
            return Err("reserved_volume_group must not be empty".to_string());
        }
        if config.extents_prefix.contains('/') {
            return Err("extents_prefix must not contain '/'".to_string());
        }
        Ok(config)
    }

    /// Load from `explicit`, else from `$THICKCOPY_CONFIG`, else defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }
}
