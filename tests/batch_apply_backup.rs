use assert_cmd::prelude::*;
use std::fs;
use std::process::Command;

fn isolated_cmd(temp: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("cw").unwrap();
    cmd.env("XDG_CONFIG_HOME", temp.path().join(".config"))
        .env("XDG_DATA_HOME", temp.path().join(".local/share"))
        .current_dir(temp.path());
    cmd
}

#[test]
fn apply_backs_up_the_original_before_overwriting() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("project");
    fs::create_dir_all(&dir).unwrap();
    let target = dir.join("a.py");
    fs::write(&target, "x = 1\n").unwrap();

    isolated_cmd(&temp)
        .args([
            "batch", "order", "review", "this",
            "--dir", dir.to_str().unwrap(),
            "--patterns", "*.py",
            "--provider", "mock-edit",
            "--apply",
            "--no-report",
            "--json",
        ])
        .assert()
        .success();

    let backup = dir.join("a.py.backup");
    assert_eq!(fs::read_to_string(&backup).unwrap(), "x = 1\n");
    let rewritten = fs::read_to_string(&target).unwrap();
    assert!(rewritten.contains("// reviewed"));
    assert!(!rewritten.contains("```"));
}

#[test]
fn without_apply_nothing_touches_the_disk() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("project");
    fs::create_dir_all(&dir).unwrap();
    let target = dir.join("a.py");
    fs::write(&target, "x = 1\n").unwrap();

    let assert = isolated_cmd(&temp)
        .args([
            "batch", "order", "review", "this",
            "--dir", dir.to_str().unwrap(),
            "--patterns", "*.py",
            "--provider", "mock-edit",
            "--no-report",
            "--json",
        ])
        .assert()
        .success();

    let report: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(report["files_changed"], 1);
    assert_eq!(fs::read_to_string(&target).unwrap(), "x = 1\n");
    assert!(!dir.join("a.py.backup").exists());
}
