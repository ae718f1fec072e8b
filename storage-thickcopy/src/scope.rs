// SPDX-License-Identifier: GPL-3.0-only

//! Scoped host resources
//!
//! Each guard releases what it acquired when dropped. Release failures are
//! logged and swallowed so they never replace the outcome of the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use storage_contracts::MountSession;
use storage_sys::logical::lvm_tools;
use storage_sys::{CommandRunner, loop_device};
use tracing::{debug, warn};

/// Read-only mounts of the VM's source disks
pub struct MountScope {
    session: Option<Box<dyn MountSession>>,
    empty: BTreeMap<String, PathBuf>,
}

impl MountScope {
    pub fn new(session: Box<dyn MountSession>) -> Self {
        Self {
            session: Some(session),
            empty: BTreeMap::new(),
        }
    }

    /// Source identifier to local path
    pub fn mounts(&self) -> &BTreeMap<String, PathBuf> {
        self.session
            .as_ref()
            .map_or(&self.empty, |session| session.mounts())
    }
}

impl Drop for MountScope {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            match session.release() {
                Ok(()) => debug!("released source disk mounts"),
                Err(e) => warn!("failed to release source disk mounts: {e}"),
            }
        }
    }
}

/// Loop devices attached for this run
pub struct LoopScope<'a> {
    runner: &'a dyn CommandRunner,
    attached: Vec<String>,
}

impl<'a> LoopScope<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            attached: Vec::new(),
        }
    }

    /// Block device for a mounted path. Paths that already are loop devices
    /// are used as they are and stay attached afterwards.
    pub fn attach(&mut self, path: &Path) -> storage_sys::Result<String> {
        let display = path.to_string_lossy();
        if display.starts_with("/dev/loop") {
            return Ok(display.into_owned());
        }

        let device = loop_device::attach(self.runner, path)?;
        self.attached.push(device.clone());
        Ok(device)
    }

    pub fn attached(&self) -> &[String] {
        &self.attached
    }
}

impl Drop for LoopScope<'_> {
    fn drop(&mut self) {
        while let Some(device) = self.attached.pop() {
            if let Err(e) = loop_device::detach(self.runner, &device) {
                warn!(device, "failed to detach loop device: {e}");
            }
        }
    }
}

/// Volume groups activated for this run
pub struct ActivationScope<'a> {
    runner: &'a dyn CommandRunner,
    activated: Vec<String>,
}

impl<'a> ActivationScope<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            activated: Vec::new(),
        }
    }

    pub fn activate(&mut self, vg_name: &str) -> storage_sys::Result<()> {
        lvm_tools::set_volume_group_active(self.runner, vg_name, true)?;
        self.activated.push(vg_name.to_string());
        Ok(())
    }

    pub fn activated(&self) -> &[String] {
        &self.activated
    }
}

impl Drop for ActivationScope<'_> {
    fn drop(&mut self) {
        while let Some(vg_name) = self.activated.pop() {
            if let Err(e) = lvm_tools::set_volume_group_active(self.runner, &vg_name, false) {
                warn!(vg = vg_name, "failed to deactivate volume group: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use storage_sys::SysError;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_detach: bool,
    }

    impl CommandRunner for Recorder {
        fn run(&self, program: &str, args: &[&str]) -> storage_sys::Result<String> {
            let rendered = storage_sys::render(program, args);
            self.calls.lock().unwrap().push(rendered.clone());
            match program {
                "losetup" if args.first() == Some(&"--find") => Ok("/dev/loop7\n".to_string()),
                "losetup" if self.fail_detach => Err(SysError::CommandFailed {
                    command: rendered,
                    stderr: "busy".to_string(),
                }),
                _ => Ok(String::new()),
            }
        }
    }

    #[test]
    fn guards_release_in_reverse_order() {
        let runner = Recorder::default();
        {
            let mut loops = LoopScope::new(&runner);
            assert_eq!(loops.attach(Path::new("/images/a.img")).unwrap(), "/dev/loop7");
            assert_eq!(loops.attach(Path::new("/dev/loop3")).unwrap(), "/dev/loop3");
            assert_eq!(loops.attached(), ["/dev/loop7"]);

            let mut activation = ActivationScope::new(&runner);
            activation.activate("vg0").unwrap();
            activation.activate("vg1").unwrap();
        }

        let calls = runner.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "losetup --find --show --read-only --partscan /images/a.img",
                "vgchange --activate y vg0",
                "vgchange --activate y vg1",
                "vgchange --activate n vg1",
                "vgchange --activate n vg0",
                "losetup --detach /dev/loop7",
            ]
        );
    }

    #[test]
    fn release_failures_are_swallowed() {
        let runner = Recorder {
            fail_detach: true,
            ..Default::default()
        };
        {
            let mut loops = LoopScope::new(&runner);
            loops.attach(Path::new("/images/a.img")).unwrap();
        }
        assert_eq!(runner.calls.lock().unwrap().len(), 2);
    }
}
