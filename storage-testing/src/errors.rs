use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TestingError {
    #[error("privilege required: run as root for loop devices and LVM")]
    PrivilegeRequired,
    #[error("spec not found for '{spec_name}' in resources/lab-specs")]
    SpecNotFound { spec_name: String },
    #[error("invalid spec '{spec_name}': {reason}")]
    SpecInvalid { spec_name: String, reason: String },
    #[error("command failed: {command}; stderr: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("unbound placeholder {{{name}}} in `{step}`")]
    UnboundPlaceholder { name: String, step: String },
    #[error("ledger io error for {path:?}: {reason}")]
    LedgerIo { path: PathBuf, reason: String },
    #[error("fixture setup failed: {reason}")]
    Fixture { reason: String },
}

pub type Result<T> = std::result::Result<T, TestingError>;
