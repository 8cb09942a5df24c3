//! Help-text and exit-code tests for the posegrid binary.
//!
//! These run the real binary but never reach the store: clap handles
//! `--help` and argument errors before any configuration is loaded.

use assert_cmd::Command;

#[test]
fn help_lists_all_subcommands() {
    let output = Command::cargo_bin("posegrid")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output);
    for subcommand in ["submit", "status", "wait", "download", "list", "reap", "setup"] {
        assert!(text.contains(subcommand), "help missing '{subcommand}'");
    }
}

#[test]
fn submit_help_documents_flags() {
    let output = Command::cargo_bin("posegrid")
        .unwrap()
        .args(["submit", "--help"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("--kind"), "submit help missing --kind");
    assert!(text.contains("--characters"), "submit help missing --characters");
    assert!(text.contains("--wait"), "submit help missing --wait");
}

#[test]
fn missing_required_argument_exits_2() {
    Command::cargo_bin("posegrid")
        .unwrap()
        .arg("submit")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn unknown_subcommand_exits_2() {
    Command::cargo_bin("posegrid")
        .unwrap()
        .arg("frobnicate")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn download_requires_an_id() {
    Command::cargo_bin("posegrid")
        .unwrap()
        .arg("download")
        .assert()
        .failure()
        .code(2);
}
