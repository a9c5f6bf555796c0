#![allow(missing_docs)]

use std::io::Write;

use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::{NamedTempFile, TempDir};

fn events_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("tempfile");
    writeln!(
        file,
        r#"{{"id":"ev1","pubkey":"pk1","created_at":1700000000,"kind":1,"tags":[["e","ev0"],["p","pk2"]],"content":"gm"}}"#
    )
    .expect("write");
    writeln!(file, "not json").expect("write");
    file.flush().expect("flush");
    file
}

fn empty_config(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "").expect("write config");
    path
}

#[test]
fn dry_run_reports_summary_and_runtime() {
    let dir = TempDir::new().expect("tempdir");
    let input = events_file();

    let output = cargo_bin_cmd!("nostr-graph")
        .env_remove("NOSTR_GRAPH_INPUT")
        .arg("--config")
        .arg(empty_config(&dir))
        .arg("--input")
        .arg(input.path())
        .args(["--dry-run", "--theme", "plain"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).expect("utf8");

    assert!(stdout.contains("records read: 2"), "{stdout}");
    assert!(stdout.contains("malformed: 1"), "{stdout}");
    assert!(stdout.contains("nodes: 4"), "{stdout}");
    assert!(stdout.contains("relationships: 3"), "{stdout}");
    let runtime = stdout
        .lines()
        .find_map(|line| line.strip_prefix("Runtime: "))
        .expect("runtime line");
    assert_eq!(runtime.len(), "00:00:00.000".len());
}

#[test]
fn invalid_threshold_fails() {
    let dir = TempDir::new().expect("tempdir");
    let input = events_file();

    cargo_bin_cmd!("nostr-graph")
        .arg("--config")
        .arg(empty_config(&dir))
        .arg("--input")
        .arg(input.path())
        .args(["--dry-run", "--batch-threshold", "0"])
        .assert()
        .failure();
}

#[test]
fn missing_input_fails() {
    let dir = TempDir::new().expect("tempdir");

    cargo_bin_cmd!("nostr-graph")
        .arg("--config")
        .arg(empty_config(&dir))
        .arg("--input")
        .arg(dir.path().join("absent.jsonl"))
        .arg("--dry-run")
        .assert()
        .failure();
}
