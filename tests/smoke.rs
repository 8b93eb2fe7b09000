//! Smoke tests -- verify the binary runs and the analyze command works offline.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    Command::cargo_bin("logwarden")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Access-log anomaly triage"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("logwarden")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("logwarden"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("logwarden")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("--bind"));
}

#[test]
fn test_analyze_rejects_unsupported_extension() {
    let f = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    Command::cargo_bin("logwarden")
        .unwrap()
        .arg("analyze")
        .arg(f.path())
        .arg("--offline")
        .assert()
        .failure()
        .stderr(predicates::str::contains("unsupported file type"));
}

#[test]
fn test_analyze_offline_json_report() {
    let mut f = tempfile::Builder::new().suffix(".log").tempfile().unwrap();
    for i in 0..10 {
        let path = if i == 3 { "/passwords.txt" } else { "/index.html" };
        writeln!(
            f,
            "10.0.0.{} - - [17/Oct/2026:09:00:{:02} +0000] \"GET {} HTTP/1.1\" 200 256",
            i + 1,
            i,
            path
        )
        .unwrap();
    }
    f.flush().unwrap();

    let output = Command::cargo_bin("logwarden")
        .unwrap()
        .arg("analyze")
        .arg(f.path())
        .args(["--offline", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Analyzed 10 lines. Found 1 insights.");
    assert_eq!(body["data"][0]["ip"], "10.0.0.4");
    assert_eq!(body["data"][0]["is_anomaly"], true);
    assert_eq!(body["data"][0]["mitre_id"], "T1059");
    assert_eq!(
        body["data"][0]["action_command"],
        "iptables -A INPUT -s 10.0.0.4 -j DROP"
    );
}

#[test]
fn test_analyze_empty_file_reports_no_data() {
    let f = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
    Command::cargo_bin("logwarden")
        .unwrap()
        .arg("analyze")
        .arg(f.path())
        .arg("--offline")
        .assert()
        .success()
        .stdout(predicate::str::contains("found no valid logs"));
}

#[test]
fn test_analyze_table_shows_threat_level() {
    let mut f = tempfile::Builder::new().suffix(".log").tempfile().unwrap();
    for i in 0..10 {
        let path = if i == 5 { "/.env" } else { "/index.html" };
        writeln!(
            f,
            "10.0.1.{} - - [17/Oct/2026:09:00:{:02} +0000] \"GET {} HTTP/1.1\" 200 256",
            i + 1,
            i,
            path
        )
        .unwrap();
    }
    f.flush().unwrap();

    Command::cargo_bin("logwarden")
        .unwrap()
        .arg("analyze")
        .arg(f.path())
        .arg("--offline")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"10\.0\.1\.6\s+\| CRITICAL").unwrap())
        .stdout(predicate::str::is_match(r"10\.0\.1\.1\s+\| Low").unwrap());
}
