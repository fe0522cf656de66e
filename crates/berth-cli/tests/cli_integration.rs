use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn berth() -> Command {
    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.env_remove("BERTH_TARGET").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_exits_zero() {
    berth()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--app"))
        .stdout(predicate::str::contains("--simulator"));
}

#[test]
fn test_version_exits_zero() {
    berth()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("berth"));
}

#[test]
fn test_missing_app_is_argument_error() {
    berth()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--app"));
}

#[test]
fn test_list_conflicts_with_app() {
    berth().args(["--list", "--app", "X.app"]).assert().code(2);
}

#[test]
fn test_nonexistent_app_path() {
    berth()
        .args(["--app", "/definitely/not/here/Demo.app"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("App path does not exist"));
}

#[test]
fn test_corrupt_package_fails_before_discovery() {
    let dir = tempfile::tempdir().unwrap();
    let ipa = dir.path().join("Broken.ipa");
    std::fs::write(&ipa, b"this is not a zip archive").unwrap();

    berth()
        .args(["--app", ipa.to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unable to read package"));
}

fn write_ipa_without_app(path: &Path) {
    let mut zip = ZipWriter::new(std::fs::File::create(path).unwrap());
    let options = SimpleFileOptions::default();
    zip.add_directory("Payload/", options).unwrap();
    zip.start_file("Payload/readme.txt", options).unwrap();
    zip.write_all(b"no bundle here").unwrap();
    zip.finish().unwrap();
}

#[test]
fn test_package_without_app_directory() {
    let dir = tempfile::tempdir().unwrap();
    let ipa = dir.path().join("Empty.ipa");
    write_ipa_without_app(&ipa);

    berth()
        .args(["--app", ipa.to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unable to determine .app directory from .ipa"));
}

#[test]
fn test_bundle_without_info_plist() {
    let dir = tempfile::tempdir().unwrap();
    let app = dir.path().join("Demo.app");
    std::fs::create_dir(&app).unwrap();

    berth()
        .args(["--app", app.to_str().unwrap(), "--simulator"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Info.plist"));
}
