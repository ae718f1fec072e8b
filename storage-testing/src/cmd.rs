use std::collections::BTreeMap;
use std::fmt;
use std::process::Command;

use crate::errors::{Result, TestingError};

/// One host command of a lab plan. Arguments may name earlier outputs as
/// `{name}`; a step with `binds` stores its trimmed stdout under that name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub program: String,
    pub args: Vec<String>,
    pub binds: Option<String>,
}

impl Step {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            binds: None,
        }
    }

    pub fn binding(mut self, name: &str) -> Self {
        self.binds = Some(name.to_string());
        self
    }

    /// Arguments with every `{name}` replaced from `bindings`
    pub fn resolve(&self, bindings: &BTreeMap<String, String>) -> Result<Vec<String>> {
        self.args
            .iter()
            .map(|arg| substitute(arg, bindings).map_err(|name| TestingError::UnboundPlaceholder {
                name,
                step: self.to_string(),
            }))
            .collect()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(&self.program, &self.args))
    }
}

fn substitute(arg: &str, bindings: &BTreeMap<String, String>) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else { break };
        let name = &rest[open + 1..open + close];
        let value = bindings.get(name).ok_or_else(|| name.to_string())?;
        out.push_str(&rest[..open]);
        out.push_str(value);
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub executed: bool,
}

pub fn render(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

pub fn run(command: &str, args: &[String], dry_run: bool) -> Result<CommandOutcome> {
    let rendered = render(command, args);
    if dry_run {
        return Ok(CommandOutcome {
            command: rendered,
            stdout: String::new(),
            stderr: String::new(),
            executed: false,
        });
    }

    let output = Command::new(command)
        .args(args)
        .env("LC_ALL", "C")
        .output()
        .map_err(|error| TestingError::CommandFailed {
            command: rendered.clone(),
            stderr: error.to_string(),
        })?;

    if !output.status.success() {
        return Err(TestingError::CommandFailed {
            command: rendered,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(CommandOutcome {
        command: rendered,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        executed: true,
    })
}
