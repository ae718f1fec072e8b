// SPDX-License-Identifier: GPL-3.0-only

#[cfg(feature = "lvm-tools")]
pub mod lvm_tools;
