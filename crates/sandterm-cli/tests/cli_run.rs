// Test module - relaxed lint rules
#![cfg(unix)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

//! End-to-end tests of `sandterm run` in headless mode against `/bin/sh`.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use serde_json::{json, Value};

fn sandterm_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_sandterm"))
}

fn write_shell_config(path: &Path, script: &str, fs_entries: Value) {
    let config = json!({
        "src": "/bin/sh",
        "name": "sh",
        "args": ["-c", script],
        "env": { "PATH": "/usr/local/bin:/usr/bin:/bin" },
        "fs": fs_entries,
    });
    fs::write(path, serde_json::to_vec_pretty(&config).unwrap()).unwrap();
}

fn run_json(args: &[&str], stdin: &str) -> (Output, Value) {
    let mut child = sandterm_bin()
        .args(["run", "--headless", "--json"])
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn sandterm");
    {
        let mut input = child.stdin.take().unwrap();
        input.write_all(stdin.as_bytes()).unwrap();
    }
    let output = child.wait_with_output().expect("wait for sandterm");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().last().unwrap_or_else(|| {
        panic!(
            "no JSON output; stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    });
    let value: Value = serde_json::from_str(line).expect("result is JSON");
    (output, value)
}

#[test]
fn complete_result_mirrors_program_exit() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("run.json");
    write_shell_config(&config, "printf out; printf err >&2; exit 3", json!({}));

    let (output, result) = run_json(
        &["--config", config.to_str().unwrap(), "--disable-tty"],
        "",
    );

    assert_eq!(output.status.code(), Some(3));
    assert_eq!(result["resultType"], "complete");
    assert_eq!(result["exitCode"], 3);
    assert_eq!(result["stdout"], "out");
    assert_eq!(result["stderr"], "err");
}

#[test]
fn stdin_lines_are_forwarded_until_eof() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("run.json");
    write_shell_config(&config, "cat", json!({}));

    let (output, result) = run_json(
        &["--config", config.to_str().unwrap(), "--disable-echo"],
        "hello\nworld\n",
    );

    assert!(output.status.success());
    assert_eq!(result["stdout"], "hello\nworld\n");
    assert_eq!(result["stdin"], "hello\nworld\n");
    assert_eq!(result["tty"], "hello\nworld\n");
}

#[test]
fn flags_build_the_configuration() {
    let (output, result) = run_json(&["--src", "/bin/echo", "--args", "hello   world"], "");

    assert!(output.status.success());
    assert_eq!(result["stdout"], "hello world\n");
}

#[test]
fn filesystem_round_trips_through_write_fs() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("run.yaml");
    fs::write(
        &config,
        "src: /bin/sh\nargs: [\"-c\", \"cp in.txt out.txt\"]\nenv:\n  PATH: /usr/bin:/bin\n",
    )
    .unwrap();
    let host_input = dir.path().join("input.txt");
    fs::write(&host_input, "data").unwrap();
    let out_dir = dir.path().join("out");

    let file_arg = format!("/in.txt={}", host_input.display());
    let (output, result) = run_json(
        &[
            "--config",
            config.to_str().unwrap(),
            "--file",
            &file_arg,
            "--write-fs",
            out_dir.to_str().unwrap(),
        ],
        "",
    );

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(result["fs"]["/out.txt"], "data");
    assert_eq!(fs::read_to_string(out_dir.join("out.txt")).unwrap(), "data");
    assert_eq!(fs::read_to_string(out_dir.join("in.txt")).unwrap(), "data");
}

#[test]
fn missing_program_reports_crash() {
    let (output, result) = run_json(&["--src", "/nonexistent/sandterm-program"], "");

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(result["resultType"], "crash");
    assert_eq!(result["error"]["code"], "E_IO");
}

#[test]
fn missing_src_is_a_usage_error() {
    let (output, result) = run_json(&[], "");

    assert_eq!(output.status.code(), Some(2));
    assert_eq!(result["code"], "E_CONFIG");
}

#[test]
fn config_command_prints_resolved_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("run.yaml");
    let yaml = serde_yml::to_string(&json!({
        "src": "/bin/cat",
        "name": "cat",
        "autorun": true,
    }))
    .unwrap();
    fs::write(&config, yaml).unwrap();

    let output = sandterm_bin()
        .args(["config", "--json", "--config", config.to_str().unwrap()])
        .output()
        .expect("failed to execute");

    assert!(output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["src"], "/bin/cat");
    assert_eq!(value["name"], "cat");
    assert_eq!(value["autorun"], true);
    assert_eq!(value["disable_echo"], false);

    let text = sandterm_bin()
        .args(["config", "--config", config.to_str().unwrap()])
        .output()
        .expect("failed to execute");
    assert!(String::from_utf8_lossy(&text.stdout).contains("autorun: true"));
}
