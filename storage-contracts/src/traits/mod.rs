// SPDX-License-Identifier: GPL-3.0-only

pub mod image;
pub mod mount;

pub use image::ImageAllocator;
pub use mount::{DiskMounter, MountSession};
