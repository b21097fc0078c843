//! Behavioural smoke tests for the CLI entrypoint.
//!
//! The libvirt `list`, `info` and `delete` paths only touch the image
//! directory, so they run without a hypervisor.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use rstest::{fixture, rstest};
use tempfile::TempDir;

#[fixture]
fn image_dir() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("web-base.qcow2"), b"qcow").expect("write image");
    std::fs::write(
        dir.path().join("web-base.qcow2.tags.json"),
        br#"{"team":"infra"}"#,
    )
    .expect("write tags");
    dir
}

#[test]
fn no_command_prints_usage_and_exits_one() {
    let mut cmd = cargo_bin_cmd!("ofen");
    cmd.assert()
        .code(1)
        .stdout("")
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_every_operation() {
    let mut cmd = cargo_bin_cmd!("ofen");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("bake")
                .and(predicate::str::contains("list"))
                .and(predicate::str::contains("delete"))
                .and(predicate::str::contains("info")),
        );
}

#[test]
fn unknown_provider_flag_is_rejected() {
    let mut cmd = cargo_bin_cmd!("ofen");
    cmd.args(["--provider", "vmware", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("vmware"));
}

#[test]
fn missing_spec_file_fails_with_one() {
    let mut cmd = cargo_bin_cmd!("ofen");
    cmd.args(["--provider", "libvirt", "bake", "/nonexistent/ofen-spec.json"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to read build spec"));
}

#[test]
fn incomplete_spec_names_missing_keys() {
    let dir = TempDir::new().expect("tempdir");
    let spec = dir.path().join("spec.json");
    std::fs::write(&spec, br#"{"name":"web-base","provider":"libvirt"}"#).expect("write spec");

    let mut cmd = cargo_bin_cmd!("ofen");
    cmd.arg("bake")
        .arg(&spec)
        .assert()
        .code(1)
        .stderr(
            predicate::str::contains("missing required keys")
                .and(predicate::str::contains("base_image")),
        );
}

#[rstest]
fn libvirt_list_reports_images(image_dir: TempDir) {
    let mut cmd = cargo_bin_cmd!("ofen");
    cmd.args(["--provider", "libvirt", "--image-dir"])
        .arg(image_dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("web-base\t").and(predicate::str::contains("4 bytes")));
}

#[rstest]
fn libvirt_info_of_missing_image_fails(image_dir: TempDir) {
    let mut cmd = cargo_bin_cmd!("ofen");
    cmd.args(["--provider", "libvirt", "--image-dir"])
        .arg(image_dir.path())
        .args(["info", "ghost"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("ghost"));
}

#[rstest]
fn libvirt_delete_removes_image_and_tags(image_dir: TempDir) {
    let mut cmd = cargo_bin_cmd!("ofen");
    cmd.args(["--provider", "libvirt", "--image-dir"])
        .arg(image_dir.path())
        .args(["delete", "web-base"])
        .assert()
        .success()
        .stdout("deleted web-base\n");

    assert!(!image_dir.path().join("web-base.qcow2").exists());
    assert!(!image_dir.path().join("web-base.qcow2.tags.json").exists());
}
