// SPDX-License-Identifier: GPL-3.0-only

//! Contracts between the extent discovery engine and the collaborators it
//! drives but does not own: the destination image allocator and the remote
//! disk mount transport.

pub mod error;
pub mod traits;

pub use error::{StorageError, StorageErrorKind};
pub use traits::{DiskMounter, ImageAllocator, MountSession};
