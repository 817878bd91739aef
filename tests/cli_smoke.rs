use assert_cmd::prelude::*;
use predicates::str::contains;
use std::process::Command;

#[test]
fn prints_help() {
    let mut cmd = Command::cargo_bin("cw").unwrap();
    cmd.arg("--help");
    cmd.assert().success().stdout(contains("Conversational code assistant CLI"));
}

#[test]
fn ask_requires_prompt() {
    let mut cmd = Command::cargo_bin("cw").unwrap();
    cmd.arg("ask");
    let assert = cmd.assert().failure();
    // clap should error about missing argument
    assert.stderr(contains("Usage:"));
}

#[test]
fn ask_stub_works() {
    let temp = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("cw").unwrap();
    cmd.env("XDG_CONFIG_HOME", temp.path().join(".config"))
        .env("XDG_DATA_HOME", temp.path().join(".local/share"))
        .args(["ask", "--provider", "mock", "What", "is", "Rust?"]);
    cmd.assert().success().stdout(contains("[stub answer]"));
}

#[test]
fn batch_list_shows_predefined_commands() {
    let mut cmd = Command::cargo_bin("cw").unwrap();
    cmd.args(["batch", "list"]);
    cmd.assert()
        .success()
        .stdout(contains("refactor_all"))
        .stdout(contains("security_audit"))
        .stdout(contains("add_tests"));
}

#[test]
fn batch_order_requires_text() {
    let mut cmd = Command::cargo_bin("cw").unwrap();
    cmd.args(["batch", "order"]);
    cmd.assert().failure().stderr(contains("Usage:"));
}
