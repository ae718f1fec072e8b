//! Test support for the storage workspace
//!
//! [`fakes`] simulates a host for the discovery engine: loop devices,
//! partition tables and LVM reports answered from an in-memory model.
//! [`image_lab`] builds real loop-backed fixtures from the specs under
//! `resources/lab-specs` and needs root.

pub mod cmd;
pub mod errors;
pub mod fakes;
pub mod image_lab;
pub mod ledger;
pub mod spec;
