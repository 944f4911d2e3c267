//! End-to-end smoke tests for the `skein` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn script_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".skein")
        .tempfile()
        .expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write script");
    file
}

#[test]
fn check_accepts_a_valid_script() {
    let file = script_file("=== intro ===\nHello there.\n-> END\n");
    Command::cargo_bin("skein")
        .unwrap()
        .arg("check")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("ok:"));
}

#[test]
fn check_rejects_an_unresolved_divert() {
    let file = script_file("=== intro ===\n-> nowhere\n");
    Command::cargo_bin("skein")
        .unwrap()
        .arg("check")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown divert target"));
}

#[test]
fn disasm_lists_elements() {
    let file = script_file("=== intro ===\nHello there.\n");
    Command::cargo_bin("skein")
        .unwrap()
        .arg("disasm")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Knot"))
        .stdout(predicate::str::contains("Paragraph"));
}

#[test]
fn disasm_json_is_parseable() {
    let file = script_file("One\nTwo\n");
    let output = Command::cargo_bin("skein")
        .unwrap()
        .arg("disasm")
        .arg(file.path())
        .arg("--json")
        .output()
        .expect("run skein");
    assert!(output.status.success());
    let rows: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is valid JSON");
    assert_eq!(rows.as_array().map(|a| a.len()), Some(3));
}

#[test]
fn play_runs_a_linear_script_to_the_end() {
    let file = script_file("First line.\nSecond line.\n-> END\n");
    Command::cargo_bin("skein")
        .unwrap()
        .arg("play")
        .arg(file.path())
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::contains("First line."))
        .stdout(predicate::str::contains("Second line."));
}
