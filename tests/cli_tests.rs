use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Helper to create a json-eval command
fn json_eval_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("json-eval"))
}

const SCHEMA: &str = r#"{
    "type": "object",
    "$params": {"rate": 0.5},
    "properties": {
        "name": {"type": "string", "rules": {"required": {"value": true, "message": "Name is required"}}},
        "qty": {"type": "number", "dependents": [
            {"$ref": "note", "value": {"$evaluation": {"cat": ["qty=", {"var": "$value"}]}}}
        ]},
        "note": {"type": "string"},
        "total": {"type": "number", "value": {"$evaluation": {"*": [{"var": "qty"}, {"var": "$params.rate"}]}}}
    }
}"#;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_help() {
    json_eval_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Evaluate JSON schemas"));
}

#[test]
fn test_version() {
    json_eval_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("json-eval"));
}

#[test]
fn test_subcommand_help() {
    for (sub, text) in [
        ("evaluate", "Evaluate a schema"),
        ("validate", "Validate data"),
        ("dependents", "Report dependent fields"),
        ("logic", "standalone JSON Logic"),
    ] {
        json_eval_cmd()
            .arg(sub)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains(text));
    }
}

#[test]
fn test_evaluate_prints_evaluated_schema() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "schema.json", SCHEMA);
    let data = write(&dir, "data.json", r#"{"name": "Ann", "qty": 8}"#);

    let output = json_eval_cmd()
        .arg("evaluate")
        .arg(&schema)
        .arg("--data")
        .arg(&data)
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["properties"]["total"]["value"], serde_json::json!(4));
    assert!(!String::from_utf8_lossy(&output.stdout).contains("$evaluation"));
}

#[test]
fn test_evaluate_msgpack_schema() {
    let dir = TempDir::new().unwrap();
    let value: serde_json::Value = serde_json::from_str(SCHEMA).unwrap();
    let schema = dir.path().join("schema.msgpack");
    fs::write(&schema, rmp_serde::to_vec_named(&value).unwrap()).unwrap();
    let data = write(&dir, "data.json", r#"{"qty": 2}"#);

    json_eval_cmd()
        .args(["--no-cache", "evaluate"])
        .arg(&schema)
        .arg("-d")
        .arg(&data)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"value\": 1"));
}

#[test]
fn test_validate_exit_status() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "schema.json", SCHEMA);
    let bad = write(&dir, "bad.json", r#"{"qty": 1}"#);
    let good = write(&dir, "good.json", r#"{"name": "Ann", "qty": 1}"#);

    json_eval_cmd()
        .arg("validate")
        .arg(&schema)
        .arg("--data")
        .arg(&bad)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Name is required"));

    json_eval_cmd()
        .arg("validate")
        .arg(&schema)
        .arg("--data")
        .arg(&good)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"hasError\": false"));

    json_eval_cmd()
        .arg("validate")
        .arg(&schema)
        .arg("--data")
        .arg(&bad)
        .args(["--paths", "qty"])
        .assert()
        .success();
}

#[test]
fn test_dependents_lists_changes() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "schema.json", SCHEMA);
    let data = write(&dir, "data.json", r#"{"qty": 3}"#);

    let output = json_eval_cmd()
        .arg("dependents")
        .arg(&schema)
        .arg("--data")
        .arg(&data)
        .args(["--changed", "qty", "--re-evaluate"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let changes: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(changes[0]["$ref"], serde_json::json!("note"));
    assert_eq!(changes[0]["value"], serde_json::json!("qty=3"));
}

#[test]
fn test_logic_expression() {
    let dir = TempDir::new().unwrap();
    let data = write(&dir, "data.json", r#"{"a": 40}"#);

    json_eval_cmd()
        .arg("logic")
        .arg(r#"{"+": [{"var": "a"}, 2]}"#)
        .arg("--data")
        .arg(&data)
        .assert()
        .success()
        .stdout(predicate::str::contains("42"));

    json_eval_cmd()
        .arg("logic")
        .arg(r#"{"bogus": []}"#)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown operator"));
}

#[test]
fn test_config_file_is_applied() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "schema.json", SCHEMA);
    let config = write(&dir, "config.json", r#"{"cacheEnabled": false, "timezoneOffset": -300}"#);

    json_eval_cmd()
        .arg("--config")
        .arg(&config)
        .arg("evaluate")
        .arg(&schema)
        .assert()
        .success();

    let broken = write(&dir, "broken.json", "{");
    json_eval_cmd()
        .arg("--config")
        .arg(&broken)
        .arg("evaluate")
        .arg(&schema)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid config file"));
}

#[test]
fn test_missing_schema_file() {
    json_eval_cmd()
        .arg("evaluate")
        .arg("/nonexistent/schema.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}
