// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Required tool not found in PATH: {0}")]
    ToolMissing(String),

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Unexpected {source_name} output: {detail}")]
    Parse { source_name: String, detail: String },
}

impl SysError {
    pub fn parse(source_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            detail: detail.into(),
        }
    }

    /// Command line of the failing tool, when the error came from one
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { command, .. } => Some(command),
            Self::ToolMissing(tool) => Some(tool),
            _ => None,
        }
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
