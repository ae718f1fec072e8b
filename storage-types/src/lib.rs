// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for thick-copy extent discovery
//!
//! This crate defines the single source of truth for the types that flow
//! through the discovery pipeline:
//!
//! - **storage-sys**: parses tool output straight into these types
//! - **storage-thickcopy**: classifies resources and computes extents over them
//! - **storage-testing**: renders fake tool output from them
//!
//! ## Architecture
//!
//! ### Probed state (rediscovered on every invocation)
//! - `BlockDevice` → an attached disk or one of its partitions
//! - `PartitionTable` / `PartitionTableEntry` → MBR or GPT layout of a disk
//! - `LvmTopology` → volume groups, logical volume segment maps, physical volumes
//!
//! ### Derived state
//! - `Classification` → every disk/partition bucketed by how it is copied
//! - `ExtentRange` → disk-relative byte ranges to copy
//! - `ThickCopyResult` → per-disk outcome handed back to the caller

pub mod common;
pub mod disk;
pub mod extent;
pub mod lvm;
pub mod partition;
pub mod resource;
pub mod result;

pub use common::{ByteRange, SECTOR_SIZE, bytes_to_pretty, coalesce};
pub use disk::{AttachedDisk, BlockDevice, SourceDisk, VmDisks};
pub use extent::ExtentRange;
pub use lvm::{
    IncompleteVolumeGroup, LogicalSegment, LogicalVolumeInfo, LvmTopology, PhysicalVolumeInfo,
    PvSegment, VolumeGroupInfo,
};
pub use partition::{
    EXTENDED_TYPE_IDS, GPT_PROTECTIVE_TYPE_ID, PartitionTable, PartitionTableEntry,
    PartitionTableType, normalize_type_id,
};
pub use resource::{Classification, DiskResource, ResourceKind, UnreadableDisk};
pub use result::{DiskExtents, ThickCopyResult, ThickCopyStatus, VoidReason};
