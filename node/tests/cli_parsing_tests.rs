//! CLI argument parsing tests for the `node` binary.

use assert_cmd::Command;

#[test]
fn test_help_runs() {
    Command::cargo_bin("node")
        .unwrap()
        .arg("--help")
        .assert()
        .success();
}

#[test]
fn test_version_runs() {
    Command::cargo_bin("node")
        .unwrap()
        .arg("--version")
        .assert()
        .success();
}

#[test]
fn test_mode_push_accepted() {
    Command::cargo_bin("node")
        .unwrap()
        .args(["0", "push", "--help"])
        .assert()
        .success();
}

#[test]
fn test_mode_pull_accepted() {
    Command::cargo_bin("node")
        .unwrap()
        .args(["0", "pull", "--help"])
        .assert()
        .success();
}

#[test]
fn test_invalid_mode_rejected() {
    Command::cargo_bin("node")
        .unwrap()
        .args(["0", "replicate", "--help"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("invalid value 'replicate'"));
}

#[test]
fn test_verbose_flag_repeatable() {
    Command::cargo_bin("node")
        .unwrap()
        .args(["-vv", "--help"])
        .assert()
        .success();
}

#[test]
fn test_config_flag_accepted() {
    Command::cargo_bin("node")
        .unwrap()
        .args(["--config", "some/path", "--help"])
        .assert()
        .success();
}

#[test]
fn test_missing_config_file_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("node")
        .unwrap()
        .current_dir(&dir)
        .args(["0", "--config", "no-such-config"])
        .assert()
        .failure();
}
