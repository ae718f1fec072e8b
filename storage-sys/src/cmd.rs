// SPDX-License-Identifier: GPL-3.0-only

//! Host tool invocation

use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, trace};

use crate::{Result, SysError};

/// Runs a host tool and hands back its stdout.
///
/// A non-zero exit status is an error carrying the rendered command line and
/// stderr.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<String>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        (**self).run(program, args)
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<T> {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        (**self).run(program, args)
    }
}

/// Runs tools on the local host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let rendered = render(program, args);
        let path = locate_tool(program)?;
        debug!(command = %rendered, "running host tool");

        let output = Command::new(path)
            .args(args)
            .env("LC_ALL", "C")
            .output()
            .map_err(|error| SysError::CommandFailed {
                command: rendered.clone(),
                stderr: error.to_string(),
            })?;

        if !output.status.success() {
            return Err(SysError::CommandFailed {
                command: rendered,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        trace!(command = %rendered, bytes = stdout.len(), "host tool finished");
        Ok(stdout)
    }
}

/// Resolve a tool through `PATH`.
pub fn locate_tool(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|_| SysError::ToolMissing(program.to_string()))
}

pub fn render(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_command_context() {
        let rendered = render("losetup", &["--find", "--show", "disk.img"]);
        assert_eq!(rendered, "losetup --find --show disk.img");
        assert_eq!(render("pvscan", &[]), "pvscan");
    }

    #[test]
    fn missing_tool_is_reported_by_name() {
        let error = SystemCommandRunner
            .run("definitely-not-a-real-tool-4f1c", &[])
            .unwrap_err();
        assert!(matches!(error, SysError::ToolMissing(ref tool) if tool == "definitely-not-a-real-tool-4f1c"));
    }
}
