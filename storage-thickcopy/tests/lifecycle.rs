mod common;

use common::{Workspace, run};
use storage_testing::fakes::{FakeHost, FakeTable, FakeVg, GIB, MIB};
use storage_thickcopy::{ThickCopy, ThickCopyError};
use storage_types::{ThickCopyStatus, VoidReason};

const IMAGE: &str = "/images/vm-1/disk0.img";

fn lvm_host() -> FakeHost {
    let mut host = FakeHost::new().unwrap();
    let device = host.add_disk(IMAGE, 4 * GIB, FakeTable::None).unwrap();
    host.add_volume_group(FakeVg::new("data-vg", 4 * MIB).pv(&device, 4 * GIB).lv("data", &[(0, GIB)]));
    host
}

/// Calls after the last LVM report, in the order they ran
fn release_calls(host: &FakeHost) -> Vec<String> {
    host.calls()
        .into_iter()
        .filter(|call| {
            call == "vgchange --activate n data-vg" || call.starts_with("losetup --detach") || call == "release mounts"
        })
        .collect()
}

#[test]
fn resources_are_released_in_reverse_order_when_ready() {
    let host = lvm_host();
    let workspace = Workspace::new();
    let config = workspace.config(&host);
    let result = run(&host, &config, &workspace.vm(&host, &[IMAGE]));

    assert!(result.is_ready());
    assert_eq!(
        release_calls(&host),
        vec![
            "vgchange --activate n data-vg".to_string(),
            "losetup --detach /dev/loop0".to_string(),
            "release mounts".to_string(),
        ]
    );
    assert!(host.attached_loops().is_empty());
    assert!(host.active_volume_groups().is_empty());

    let calls = host.calls();
    assert_eq!(calls.first().unwrap(), &format!("allocate {} {}", workspace.dest.path().join("disk0.img").display(), 4 * GIB));
    assert_eq!(calls[1], "mount disk_only=true count=1");
}

#[test]
fn resources_are_released_when_a_tool_fails() {
    let host = lvm_host();
    host.fail_command("lvs");

    let workspace = Workspace::new();
    let config = workspace.config(&host);
    let result = run(&host, &config, &workspace.vm(&host, &[IMAGE]));

    assert!(matches!(
        result.status,
        ThickCopyStatus::Void(VoidReason::ToolInvocationFailure { ref command, .. }) if command.starts_with("lvs")
    ));
    assert_eq!(result.disks[IMAGE].total_bytes, 0);
    assert_eq!(release_calls(&host).len(), 3);
    assert!(host.attached_loops().is_empty());
    assert!(host.active_volume_groups().is_empty());
    assert!(workspace.extents_files().is_empty());
}

#[test]
fn failed_release_does_not_change_the_outcome() {
    let host = lvm_host();
    host.fail_command("losetup --detach");

    let workspace = Workspace::new();
    let config = workspace.config(&host);
    let result = run(&host, &config, &workspace.vm(&host, &[IMAGE]));

    assert!(result.is_ready());
    assert_eq!(result.total_bytes(), GIB);
    assert_eq!(host.calls().last().unwrap(), "release mounts");
}

#[test]
fn allocation_failure_is_an_error() {
    let host = lvm_host();
    host.fail_allocation();

    let workspace = Workspace::new();
    let config = workspace.config(&host);
    let error = ThickCopy::new(&config, &host, &host, &host)
        .discover_extents(&workspace.vm(&host, &[IMAGE]))
        .unwrap_err();

    assert!(matches!(error, ThickCopyError::Allocation { .. }));
    assert!(host.calls_starting_with("mount").is_empty());
}

#[test]
fn mount_failure_voids_the_vm() {
    let host = lvm_host();
    host.fail_mount();

    let workspace = Workspace::new();
    let config = workspace.config(&host);
    let result = run(&host, &config, &workspace.vm(&host, &[IMAGE]));

    assert!(matches!(
        result.status,
        ThickCopyStatus::Void(VoidReason::DeviceUnreadable { ref device, .. }) if device == IMAGE
    ));
    assert!(host.calls_starting_with("losetup").is_empty());
}

#[test]
fn disk_missing_from_the_mount_session_voids_the_vm() {
    let mut host = lvm_host();
    host.add_disk("/images/vm-1/disk1.img", GIB, FakeTable::None).unwrap();
    host.hide_from_mount("/images/vm-1/disk1.img");

    let workspace = Workspace::new();
    let config = workspace.config(&host);
    let result = run(&host, &config, &workspace.vm(&host, &[IMAGE, "/images/vm-1/disk1.img"]));

    assert!(matches!(
        result.status,
        ThickCopyStatus::Void(VoidReason::DeviceUnreadable { ref device, .. }) if device == "/images/vm-1/disk1.img"
    ));
    assert_eq!(result.disks.len(), 2);
    assert!(host.attached_loops().is_empty());
    assert_eq!(host.calls().last().unwrap(), "release mounts");
}

#[test]
fn failing_lvm_scan_voids_the_vm() {
    let host = lvm_host();
    host.fail_command("pvscan");

    let workspace = Workspace::new();
    let config = workspace.config(&host);
    let result = run(&host, &config, &workspace.vm(&host, &[IMAGE]));

    assert!(matches!(
        result.status,
        ThickCopyStatus::Void(VoidReason::ToolInvocationFailure { ref command, .. }) if command == "pvscan"
    ));
}

#[test]
fn unwritable_extents_dir_voids_the_vm() {
    let host = lvm_host();
    let workspace = Workspace::new();
    let blocker = workspace.extents.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();

    let mut config = workspace.config(&host);
    config.extents_dir = blocker.clone();
    let result = run(&host, &config, &workspace.vm(&host, &[IMAGE]));

    assert!(matches!(
        result.status,
        ThickCopyStatus::Void(VoidReason::WriteFailed { ref path, .. }) if path == &blocker
    ));
    assert_eq!(result.total_bytes(), 0);
}

#[test]
fn invalid_request_is_rejected_before_allocating() {
    let host = lvm_host();
    let workspace = Workspace::new();
    let config = workspace.config(&host);
    let mut vm = workspace.vm(&host, &[IMAGE]);
    vm.disks.push(vm.disks[0].clone());

    let error = ThickCopy::new(&config, &host, &host, &host)
        .discover_extents(&vm)
        .unwrap_err();
    assert!(matches!(error, ThickCopyError::InvalidRequest(_)));
    assert!(host.calls().is_empty());
}
