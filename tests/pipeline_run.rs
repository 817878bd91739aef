use assert_cmd::prelude::*;
use std::fs;
use std::process::Command;

fn write_registries(xdg_config_home: &std::path::Path, servers: &str, pipelines: &str) {
    let app_dir = xdg_config_home.join("codewright");
    fs::create_dir_all(&app_dir).unwrap();
    fs::write(app_dir.join("servers.json"), servers).unwrap();
    fs::write(app_dir.join("pipelines.json"), pipelines).unwrap();
}

fn isolated_cmd(temp: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("cw").unwrap();
    cmd.env("XDG_CONFIG_HOME", temp.path().join(".config"))
        .env("XDG_DATA_HOME", temp.path().join(".local/share"))
        .current_dir(temp.path());
    cmd
}

#[test]
fn missing_server_step_is_skipped_and_later_steps_run() {
    let temp = tempfile::tempdir().unwrap();
    write_registries(
        &temp.path().join(".config"),
        "[]",
        r#"[{
            "name": "demo",
            "steps": [
                {"kind": "api", "server": "missing", "action": "chat"},
                {"kind": "extension", "server": "tokens", "action": "estimate"}
            ]
        }]"#,
    );

    let assert = isolated_cmd(&temp)
        .args(["pipeline", "run", "--name", "demo", "--input", "hello world", "--json"])
        .assert()
        .success();

    let out: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    let trace: Vec<String> = out["trace"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert!(trace.iter().any(|t| t.contains("not available")));
    assert!(out["output"].as_str().unwrap().starts_with("estimated tokens:"));
}

#[test]
fn api_step_returns_the_simulated_response() {
    let temp = tempfile::tempdir().unwrap();
    write_registries(
        &temp.path().join(".config"),
        r#"[{"name": "remote", "kind": "api", "url": "https://api.example.com/v1"}]"#,
        r#"[{
            "name": "relay",
            "steps": [{"kind": "api", "server": "remote", "action": "chat"}]
        }]"#,
    );

    let assert = isolated_cmd(&temp)
        .args(["pipeline", "run", "--name", "relay", "--input", "ping", "--json"])
        .assert()
        .success();

    let out: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert!(out["output"].as_str().unwrap().starts_with("simulated response for"));
}

#[test]
fn unknown_pipeline_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    write_registries(&temp.path().join(".config"), "[]", "[]");

    isolated_cmd(&temp)
        .args(["pipeline", "run", "--name", "ghost", "--input", "x"])
        .assert()
        .failure();
}

#[test]
fn pipeline_list_shows_step_counts() {
    let temp = tempfile::tempdir().unwrap();
    write_registries(
        &temp.path().join(".config"),
        "[]",
        r#"[{"name": "demo", "steps": [{"kind": "extension", "server": "todos", "action": "scan"}]}]"#,
    );

    let assert = isolated_cmd(&temp).args(["pipeline", "list", "--json"]).assert().success();
    let out: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(out[0]["name"], "demo");
    assert_eq!(out[0]["steps"], 1);
}

#[test]
fn run_is_recorded_into_the_named_session() {
    let temp = tempfile::tempdir().unwrap();
    write_registries(
        &temp.path().join(".config"),
        "[]",
        r#"[{"name": "demo", "steps": [{"kind": "extension", "server": "tokens", "action": "estimate"}]}]"#,
    );

    isolated_cmd(&temp)
        .args(["pipeline", "run", "--name", "demo", "--input", "hello", "--session", "lab", "--json"])
        .assert()
        .success();

    let session_file = temp
        .path()
        .join(".local/share")
        .join("codewright")
        .join("sessions")
        .join("lab.jsonl");
    let content = fs::read_to_string(session_file).unwrap();
    assert!(content.contains("pipeline:demo"));
    assert!(content.contains("trace"));
}
