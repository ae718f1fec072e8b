//! Loop-backed LVM fixtures
//!
//! A lab spec is turned into a plan of host commands that builds sparse
//! images, partitions them, attaches them and lays LVM on top. Setup
//! records the attached loop devices in the ledger so teardown can find
//! them again.

use std::collections::BTreeMap;
use std::fs;

use crate::cmd::{CommandOutcome, Step, run};
use crate::errors::{Result, TestingError};
use crate::ledger::{self, LabState};
use crate::spec::{LabSpec, artifacts_root, load_by_name};

#[derive(Debug, Clone)]
pub struct Plan {
    pub dry_run: bool,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn rendered(&self) -> Vec<String> {
        self.steps.iter().map(ToString::to_string).collect()
    }
}

/// Result of executing a plan
#[derive(Debug, Clone, Default)]
pub struct Execution {
    pub outcomes: Vec<CommandOutcome>,
    pub bindings: BTreeMap<String, String>,
}

pub fn plan_setup(spec_name: &str, dry_run: bool) -> Result<Plan> {
    let spec = load_by_name(spec_name)?;
    Ok(Plan {
        dry_run,
        steps: setup_steps(&spec),
    })
}

fn setup_steps(spec: &LabSpec) -> Vec<Step> {
    let root = artifacts_root(spec);
    let mut steps = vec![Step::new("mkdir", ["-p".to_string(), root.display().to_string()])];

    for (index, disk) in spec.disks.iter().enumerate() {
        let path = root.join(&disk.file_name).display().to_string();
        steps.push(Step::new("truncate", ["-s".to_string(), disk.size_bytes.to_string(), path.clone()]));

        if let Some(label) = &disk.partition_table {
            steps.push(Step::new("parted", ["-s", &path, "mklabel", label]));
            for partition in &disk.partitions {
                steps.push(Step::new(
                    "parted",
                    ["-s", &path, "mkpart", &partition.part_type, &partition.start, &partition.end],
                ));
                if partition.lvm {
                    let number = partition.index.to_string();
                    steps.push(Step::new("parted", ["-s", &path, "set", &number, "lvm", "on"]));
                }
            }
        }

        steps.push(
            Step::new("losetup", ["--find", "--show", "--partscan", &path])
                .binding(&LabSpec::disk_binding(index)),
        );
    }

    if spec.volume_groups.is_empty() {
        return steps;
    }
    steps.push(Step::new("udevadm", ["settle"]));

    for vg in &spec.volume_groups {
        let members: Vec<String> = vg.physical_volumes.iter().map(|pv| member_device(pv)).collect();
        for member in &members {
            steps.push(Step::new("pvcreate", ["-ff", "-y", member.as_str()]));
        }
        let mut args = vec![vg.name.clone()];
        args.extend(members);
        steps.push(Step::new("vgcreate", args));

        for lv in &vg.logical_volumes {
            steps.push(Step::new("lvcreate", ["-y", "-L", &lv.size, "-n", &lv.name, &vg.name]));
        }
        steps.push(Step::new("vgchange", ["--activate", "n", &vg.name]));
    }

    steps
}

/// `disk0p2` -> `{disk0}p2`, `disk1` -> `{disk1}`
fn member_device(member: &str) -> String {
    match member.split_once('p') {
        Some((disk, partition)) if disk.starts_with("disk") => format!("{{{disk}}}p{partition}"),
        _ => format!("{{{member}}}"),
    }
}

pub fn plan_teardown(spec_name: &str, dry_run: bool) -> Result<Plan> {
    let spec = load_by_name(spec_name)?;
    let state = if ledger::exists(spec_name) {
        Some(ledger::load(spec_name)?)
    } else {
        None
    };

    let mut steps: Vec<Step> = spec
        .volume_groups
        .iter()
        .map(|vg| Step::new("vgchange", ["--activate", "n", &vg.name]))
        .collect();
    if let Some(state) = &state {
        for device in state.loop_devices.values() {
            steps.push(Step::new("losetup", ["--detach", device.as_str()]));
        }
    }

    let root = artifacts_root(&spec);
    for disk in &spec.disks {
        steps.push(Step::new("rm", ["-f".to_string(), root.join(&disk.file_name).display().to_string()]));
    }

    Ok(Plan { dry_run, steps })
}

pub fn execute_plan(plan: &Plan) -> Result<Execution> {
    let mut execution = Execution::default();

    for step in &plan.steps {
        let args = if plan.dry_run {
            step.args.clone()
        } else {
            step.resolve(&execution.bindings)?
        };

        if step.program == "mkdir" && !plan.dry_run {
            if let Some(path) = args.last() {
                fs::create_dir_all(path).map_err(|error| TestingError::CommandFailed {
                    command: step.to_string(),
                    stderr: error.to_string(),
                })?;
            }
            execution.outcomes.push(CommandOutcome {
                command: step.to_string(),
                stdout: String::new(),
                stderr: String::new(),
                executed: true,
            });
            continue;
        }

        let outcome = run(&step.program, &args, plan.dry_run)?;
        if let Some(name) = &step.binds
            && outcome.executed
        {
            execution
                .bindings
                .insert(name.clone(), outcome.stdout.trim().to_string());
        }
        execution.outcomes.push(outcome);
    }

    Ok(execution)
}

/// Host storage changes need root
pub fn require_root() -> Result<()> {
    let outcome = run("id", &["-u".to_string()], false)?;
    if outcome.stdout.trim() == "0" {
        Ok(())
    } else {
        Err(TestingError::PrivilegeRequired)
    }
}

/// Make sure every program of `plan` can be found before touching the host
pub fn require_tools(plan: &Plan) -> Result<()> {
    for step in &plan.steps {
        if step.program == "mkdir" {
            continue;
        }
        which::which(&step.program).map_err(|_| TestingError::CommandFailed {
            command: step.to_string(),
            stderr: format!("{} not found in PATH", step.program),
        })?;
    }
    Ok(())
}

pub fn setup(spec_name: &str, dry_run: bool) -> Result<Execution> {
    let plan = plan_setup(spec_name, dry_run)?;
    if !dry_run {
        require_root()?;
        require_tools(&plan)?;
    }

    let execution = execute_plan(&plan)?;
    if !dry_run {
        record_setup_state(spec_name, &execution)?;
    }
    Ok(execution)
}

pub fn teardown(spec_name: &str, dry_run: bool) -> Result<Execution> {
    let plan = plan_teardown(spec_name, dry_run)?;
    if dry_run {
        return execute_plan(&plan);
    }
    require_root()?;

    // Keep going past failures so that as much as possible is released
    let mut execution = Execution::default();
    for step in plan.steps {
        let single = Plan {
            dry_run,
            steps: vec![step],
        };
        if let Ok(done) = execute_plan(&single) {
            execution.outcomes.extend(done.outcomes);
        }
    }
    ledger::remove(spec_name)?;
    Ok(execution)
}

fn record_setup_state(spec_name: &str, execution: &Execution) -> Result<()> {
    let spec = load_by_name(spec_name)?;
    let root = artifacts_root(&spec);
    let mut state = LabState::new(spec_name);
    state.image_paths = spec
        .disks
        .iter()
        .map(|disk| root.join(&disk.file_name).display().to_string())
        .collect();
    state.loop_devices = execution.bindings.clone();
    state.volume_groups = spec.volume_groups.iter().map(|vg| vg.name.clone()).collect();
    ledger::save(&state)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_plan_builds_lvm_on_bound_loop_devices() {
        let plan = plan_setup("lvm-mixed-mbr", true).unwrap();
        let steps = plan.rendered();
        assert!(steps.iter().any(|step| step.starts_with("truncate -s")));
        assert!(steps.iter().any(|step| step.ends_with("set 2 lvm on")));
        assert!(steps.contains(&"pvcreate -ff -y {disk0}p2".to_string()));
        assert!(steps.iter().any(|step| step.starts_with("vgcreate mixed-vg {disk0}p2")));
        assert_eq!(steps.last().unwrap(), "vgchange --activate n mixed-vg");
    }

    #[test]
    fn member_devices_become_placeholders() {
        assert_eq!(member_device("disk0"), "{disk0}");
        assert_eq!(member_device("disk1p5"), "{disk1}p5");
    }

    #[test]
    fn dry_run_executes_nothing() {
        let plan = plan_setup("lvm-single-disk", true).unwrap();
        let execution = execute_plan(&plan).unwrap();
        assert!(execution.outcomes.iter().all(|outcome| !outcome.executed));
        assert!(execution.bindings.is_empty());
    }
}
