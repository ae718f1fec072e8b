// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use storage_contracts::StorageError;
use storage_sys::SysError;
use thiserror::Error;

/// Errors surfaced to callers of the discovery engine.
///
/// Discovery problems never show up here: they turn into a void result.
/// What remains are failures there is no fallback for.
#[derive(Debug, Error)]
pub enum ThickCopyError {
    #[error("failed to allocate destination image {path:?}: {source}")]
    Allocation {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    #[error("invalid configuration {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("extents file {path:?}: {reason}")]
    ExtentsFile { path: PathBuf, reason: String },

    #[error(transparent)]
    Sys(#[from] SysError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ThickCopyError>;
