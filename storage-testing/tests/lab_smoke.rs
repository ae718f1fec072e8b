use storage_testing::image_lab::{execute_plan, plan_setup, plan_teardown};
use storage_testing::spec::{load_by_name, specs_root};

#[test]
fn every_bundled_spec_loads() {
    let entries = std::fs::read_dir(specs_root()).unwrap();
    let mut loaded = 0;
    for entry in entries {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            let name = path.file_stem().unwrap().to_string_lossy().into_owned();
            let spec = load_by_name(&name).unwrap();
            assert_eq!(spec.name, name);
            loaded += 1;
        }
    }
    assert!(loaded >= 4);
}

#[test]
fn spanning_setup_attaches_both_disks_before_lvm() {
    let plan = plan_setup("lvm-two-disk-span", true).unwrap();
    let steps = plan.rendered();

    let last_attach = steps.iter().rposition(|step| step.starts_with("losetup --find")).unwrap();
    let first_pv = steps.iter().position(|step| step.starts_with("pvcreate")).unwrap();
    assert!(last_attach < first_pv);
    assert!(steps.contains(&"vgcreate span-vg {disk0} {disk1}".to_string()));
    assert!(steps.contains(&"lvcreate -y -L 3G -n wide span-vg".to_string()));
}

#[test]
fn teardown_deactivates_before_removing_images() {
    let plan = plan_teardown("lvm-gpt", true).unwrap();
    let steps = plan.rendered();
    assert_eq!(steps.first().unwrap(), "vgchange --activate n gpt-vg");
    assert!(steps.last().unwrap().starts_with("rm -f"));

    let execution = execute_plan(&plan).unwrap();
    assert_eq!(execution.outcomes.len(), steps.len());
}
