//! Smoke tests for the cs binary

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_show_rejects_non_context_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("notes.md");
    std::fs::write(&path, "# Some Notes\n").unwrap();

    let mut cmd = Command::cargo_bin("cs").unwrap();
    cmd.arg("show").arg(&path).assert().failure();
}

#[test]
fn test_grep_reports_no_matches() {
    let temp = tempfile::tempdir().unwrap();

    let mut cmd = Command::cargo_bin("cs").unwrap();
    cmd.arg("grep")
        .arg("needle")
        .arg("--turns-dir")
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("no matches"));
}
