// SPDX-License-Identifier: GPL-3.0-only

use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_PREFIX: &str = "thickcopy.log";

/// Install the global subscriber: stderr always, plus a daily rolling file
/// when a log directory is configured. `RUST_LOG` overrides the level.
pub fn init(config: &LoggingConfig) {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let registry = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(stderr_layer);

    let Some(dir) = config.directory.as_deref() else {
        let _ = registry.try_init();
        return;
    };

    match file_writer(dir, config.keep_days) {
        Ok((writer, guard)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false);
            if registry.with(file_layer).try_init().is_ok() {
                let _ = LOG_GUARD.set(guard);
            }
        }
        Err(e) => {
            eprintln!("thickcopy: failed to initialize file logging: {e:#}");
            let _ = registry.try_init();
        }
    }
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = config.level.as_directive();
        EnvFilter::new(format!(
            "warn,storage_thickcopy={level},storage_sys={level},thickcopy_extents={level}"
        ))
    })
}

fn file_writer(
    dir: &Path,
    keep_days: u64,
) -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    fs::create_dir_all(dir)
        .map_err(|e| anyhow::anyhow!("create log directory failed: {} ({})", dir.display(), e))?;

    let prefix = OsString::from(LOG_PREFIX);
    cleanup_old_logs(dir, &prefix, keep_days);

    let appender = tracing_appender::rolling::daily(dir, &prefix);
    Ok(tracing_appender::non_blocking(appender))
}

fn cleanup_old_logs(dir: &Path, prefix: &OsString, keep_days: u64) {
    let retention = Duration::from_secs(keep_days.saturating_mul(24 * 60 * 60));
    let Some(cutoff) = SystemTime::now().checked_sub(retention) else {
        return;
    };

    let prefix = prefix.to_string_lossy();

    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        // Only files from the rolling appender
        if !entry.file_name().to_string_lossy().starts_with(prefix.as_ref()) {
            continue;
        }

        let Ok(modified) = entry.metadata().and_then(|metadata| metadata.modified()) else {
            continue;
        };
        if modified >= cutoff {
            continue;
        }

        let _ = fs::remove_file(entry.path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_keeps_foreign_and_recent_files() {
        let dir = tempfile::tempdir().unwrap();
        let recent = dir.path().join("thickcopy.log.2026-10-15");
        let foreign = dir.path().join("other.log");
        fs::write(&recent, "x").unwrap();
        fs::write(&foreign, "x").unwrap();

        cleanup_old_logs(dir.path(), &OsString::from(LOG_PREFIX), 7);
        assert!(recent.exists());
        assert!(foreign.exists());

        // A zero-day window expires everything the appender wrote
        std::thread::sleep(Duration::from_millis(20));
        cleanup_old_logs(dir.path(), &OsString::from(LOG_PREFIX), 0);
        assert!(!recent.exists());
        assert!(foreign.exists());
    }

    #[test]
    fn huge_retention_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("thickcopy.log.2026-10-15");
        fs::write(&log, "x").unwrap();

        cleanup_old_logs(dir.path(), &OsString::from(LOG_PREFIX), u64::MAX);
        assert!(log.exists());
    }
}
