// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for extent discovery
//!
//! This crate wraps the host tools and kernel interfaces the discovery
//! engine inspects, and parses their output into `storage-types` models at
//! the boundary:
//! - Partition tables (`fdisk`, `sgdisk`)
//! - LVM reports and activation (`pvs`, `vgs`, `lvs`, `vgchange`)
//! - Loop device attachment (`losetup`) and sysfs geometry
//! - Local image allocation and mounting for standalone use
//!
//! Every tool call goes through a [`CommandRunner`], so callers can swap in
//! a scripted host.

pub mod cmd;
pub mod error;
pub mod image;
pub mod logical;
pub mod loop_device;
pub mod partition;

pub use cmd::{CommandRunner, SystemCommandRunner, render};
pub use error::{Result, SysError};
pub use image::{LocalImageAllocator, LocalImageMounter};
pub use loop_device::Sysfs;
pub use partition::read_partition_table;
