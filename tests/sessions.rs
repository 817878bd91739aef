use assert_cmd::prelude::*;
use predicates::str::contains;
use std::process::Command;

fn isolated_cmd(temp: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("cw").unwrap();
    cmd.env("XDG_CONFIG_HOME", temp.path().join(".config"))
        .env("XDG_DATA_HOME", temp.path().join(".local/share"))
        .current_dir(temp.path());
    cmd
}

#[test]
fn new_session_becomes_active() {
    let temp = tempfile::tempdir().unwrap();

    isolated_cmd(&temp)
        .args(["session", "new", "work"])
        .assert()
        .success()
        .stdout(contains("session created: work"));

    isolated_cmd(&temp)
        .args(["session", "show"])
        .assert()
        .success()
        .stdout(contains("active session: work"));
}

#[test]
fn ask_appends_to_the_named_session() {
    let temp = tempfile::tempdir().unwrap();

    isolated_cmd(&temp)
        .args(["ask", "--provider", "mock", "--session", "notes", "hello", "there"])
        .assert()
        .success();

    let assert = isolated_cmd(&temp)
        .args(["session", "search", "notes", "--contains", "hello", "--json"])
        .assert()
        .success();
    let out: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    let hits = out.as_array().unwrap();
    assert!(hits.len() >= 2); // user turn plus stub answer
}

#[test]
fn list_shows_created_sessions() {
    let temp = tempfile::tempdir().unwrap();

    isolated_cmd(&temp).args(["session", "new", "alpha"]).assert().success();
    isolated_cmd(&temp).args(["session", "new", "beta"]).assert().success();

    let assert = isolated_cmd(&temp).args(["session", "list", "--json"]).assert().success();
    let out: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    let names: Vec<&str> = out
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"alpha"));
    assert!(names.contains(&"beta"));
}
