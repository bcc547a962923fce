use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_competencyd");
    let mut child = Command::new(exe)
        .env_remove("COMPETENCYD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn competencyd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

#[test]
fn health_and_error_envelopes() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["version"].is_string());
    assert!(health["workspacePath"].is_null());

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "grades.list",
        json!({ "classroomId": "c1" }),
    );
    assert_eq!(code, "no_workspace");

    let code = request_err_code(&mut stdin, &mut reader, "3", "grades.explode", json!({}));
    assert_eq!(code, "not_implemented");

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json response");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"]["code"], "bad_json");

    let scales = request_ok(&mut stdin, &mut reader, "4", "scales.list", json!({}));
    let scales = scales["scales"].as_array().expect("scales");
    assert_eq!(scales.len(), 4);
    assert_eq!(scales[0]["type"], "LETTER");
    assert_eq!(scales[0]["tiers"][0]["label"], "AD");
    assert_eq!(scales[3]["type"], "PERCENTAGE");

    let workspace = temp_dir("competencyd-router");
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let code = request_err_code(&mut stdin, &mut reader, "6", "grades.list", json!({}));
    assert_eq!(code, "bad_params");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "7",
        "grades.get",
        json!({ "gradeId": "missing" }),
    );
    assert_eq!(code, "not_found");
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "grades.list",
        json!({ "studentId": "s1" }),
    );
    assert_eq!(listed["grades"].as_array().map(|g| g.len()), Some(0));
    assert!(workspace.join("competency.sqlite3").exists());

    let _ = child.kill();
}

#[test]
fn workspace_from_environment_is_opened_at_startup() {
    let workspace = temp_dir("competencyd-env-workspace");
    let mut child = Command::new(env!("CARGO_BIN_EXE_competencyd"))
        .env("COMPETENCYD_WORKSPACE", &workspace)
        .env("COMPETENCYD_LOG", "debug")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn competencyd");
    let mut stdin = child.stdin.take().expect("child stdin");
    let mut reader = BufReader::new(child.stdout.take().expect("child stdout"));

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(
        health["workspacePath"].as_str(),
        Some(workspace.to_string_lossy().as_ref())
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.list",
        json!({ "classroomId": "c1" }),
    );
    assert_eq!(listed["grades"].as_array().map(|g| g.len()), Some(0));

    let _ = child.kill();
}
