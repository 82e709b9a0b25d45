// CLI integration tests for codec, parse, and solve flows.
use std::io::Write;
use std::process::{Command, Output, Stdio};

use serde_json::{Value, json};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_mznpipe");
    Command::new(exe)
}

fn run_with_stdin(args: &[&str], input: &str) -> Output {
    let mut child = cmd()
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(input.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("wait")
}

fn json_lines(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("valid json"))
        .collect()
}

// Log lines may share stderr with the error document.
fn stderr_error(output: &Output) -> Value {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .find(|value| value.get("error").is_some())
        .expect("error json on stderr")
}

#[test]
fn version_reports_name() {
    let output = cmd().arg("version").output().expect("version");
    assert!(output.status.success());
    let value = &json_lines(&output.stdout)[0];
    assert_eq!(value["name"], "mznpipe");
    assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn encode_reads_json_from_stdin() {
    let output = run_with_stdin(&["encode"], r#"{"n": 3, "s": {"set": [[1, 3]]}}"#);
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).expect("utf8");
    assert_eq!(text, "n = 3;\ns = 1..3;\n");
}

#[test]
fn encode_with_enums_and_declarations() {
    let output = run_with_stdin(
        &["encode", "--enum", "Color=red,green", "--declare"],
        r#"{"c": {"e": "green"}}"#,
    );
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).expect("utf8");
    assert_eq!(text, "enum Color = {red, green};\nColor: c = green;\n");
}

#[test]
fn decode_emits_one_json_object() {
    let output = run_with_stdin(&["decode"], "a = 2; b = {4, 6}; c = 1..3;");
    assert!(output.status.success());
    let value = &json_lines(&output.stdout)[0];
    assert_eq!(
        value,
        &json!({"a": 2, "b": {"set": [4, 6]}, "c": {"set": [[1, 3]]}})
    );
}

#[test]
fn decode_error_exit_code_and_position() {
    let output = run_with_stdin(&["decode"], "a = 1;\nb = {1,;");
    assert_eq!(output.status.code(), Some(5));
    let err = stderr_error(&output);
    assert_eq!(err["error"]["kind"], "Parse");
    assert_eq!(err["error"]["line"], 2);
}

#[test]
fn parse_streams_solutions_then_summary() {
    let output = run_with_stdin(
        &["parse"],
        "x = 1;\n----------\nx = 2;\n----------\n==========\n",
    );
    assert!(output.status.success());
    let lines = json_lines(&output.stdout);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], json!({"solution": {"x": 1}}));
    assert_eq!(lines[1], json!({"solution": {"x": 2}}));
    assert_eq!(lines[2]["summary"]["status"], "COMPLETE");
    assert_eq!(lines[2]["summary"]["solutions"], 2);
}

#[test]
fn parse_unsatisfiable_exit_code() {
    let output = run_with_stdin(&["parse"], "=====UNSATISFIABLE=====\n");
    assert_eq!(output.status.code(), Some(6));
    let err = stderr_error(&output);
    assert_eq!(err["error"]["kind"], "Unsatisfiable");
    assert_eq!(err["error"]["status"], "UNSATISFIABLE");
}

#[test]
fn solve_without_model_is_a_usage_error() {
    let output = cmd().arg("solve").output().expect("solve");
    assert_eq!(output.status.code(), Some(2));
}

#[cfg(unix)]
#[test]
fn solve_runs_the_driver_and_cleans_up() {
    use std::os::unix::fs::PermissionsExt;

    let temp = tempfile::tempdir().expect("tempdir");
    let artifacts = temp.path().join("artifacts");
    std::fs::create_dir_all(&artifacts).expect("artifacts dir");
    let driver = temp.path().join("fake-minizinc");
    std::fs::write(
        &driver,
        r#"#!/bin/sh
if [ "$3" = "-c" ]; then
  : > "$5"
  : > "$7"
  exit 0
fi
printf 'q = [2, 4, 1, 3];\n----------\n==========\n'
"#,
    )
    .expect("write driver");
    std::fs::set_permissions(&driver, std::fs::Permissions::from_mode(0o755)).expect("chmod");

    let args = [
        "solve",
        "--model-text",
        "int: n; array[1..n] of var 1..n: q; solve satisfy;",
        "--minizinc",
        driver.to_str().expect("utf8 path"),
        "--output-dir",
        artifacts.to_str().expect("utf8 path"),
    ];
    // A freshly written executable can transiently report ETXTBSY while
    // another test thread is forking.
    let mut output = cmd().args(args).output().expect("solve");
    for _ in 0..3 {
        if output.status.success() || !String::from_utf8_lossy(&output.stderr).contains("busy") {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
        output = cmd().args(args).output().expect("solve");
    }

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let lines = json_lines(&output.stdout);
    assert_eq!(lines[0], json!({"solution": {"q": [2, 4, 1, 3]}}));
    assert_eq!(lines[1]["summary"]["status"], "COMPLETE");
    assert_eq!(std::fs::read_dir(&artifacts).expect("read dir").count(), 0);
}
