// SPDX-License-Identifier: GPL-3.0-only

//! Thick-copy extent discovery
//!
//! Given the virtual disks of one VM, works out which byte ranges hold
//! allocated data by reconciling partition tables with the LVM layer on
//! top of them, and writes those ranges to extents files for the copier.
//! When the picture is incomplete the whole VM is void and every disk
//! reports zero bytes, so the caller falls back to a full copy.

pub mod calculate;
pub mod classify;
pub mod config;
pub mod error;
pub mod extents_file;
pub mod logging;
pub mod orchestrator;
pub mod scope;
pub mod topology;

pub use calculate::{DiskPlan, ExtentPlan, calculate, lvm_extents};
pub use classify::{ProbedDisk, classify};
pub use config::{CONFIG_ENV, LoggingConfig, LoggingLevel, NonLvmPolicy, ThickCopyConfig};
pub use error::{Result, ThickCopyError};
pub use extents_file::{ExtentsWriter, WrittenFile, read_extents_file};
pub use orchestrator::ThickCopy;
pub use scope::{ActivationScope, LoopScope, MountScope};
pub use topology::scan_topology;
