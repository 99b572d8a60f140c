//! End-to-end tests driving the `cvedb` binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn cvedb() -> Command {
    Command::cargo_bin("cvedb").expect("binary builds")
}

#[test]
fn search_on_a_fresh_database_reports_no_matches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("cvedb.sqlite");

    cvedb()
        .args(["search", "--database"])
        .arg(&db_path)
        .arg("anything")
        .assert()
        .success()
        .stdout(predicate::str::contains("no matching CVEs"));
}

#[test]
fn show_on_an_unknown_cve_fails_with_a_clear_message() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("cvedb.sqlite");

    cvedb()
        .args(["show", "--database"])
        .arg(&db_path)
        .arg("CVE-2099-00000")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no such CVE"));
}

#[test]
fn data_version_reports_the_latest_schema_on_a_fresh_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("cvedb.sqlite");

    cvedb()
        .args(["data-version", "--database"])
        .arg(&db_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("1"));
}
