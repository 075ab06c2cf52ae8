use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("quotaguard").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("quotaguard 0.1.0"));
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("quotaguard").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Namespaced token-bucket quota service",
        ));
}

#[test]
fn test_cli_requires_config() {
    let mut cmd = Command::cargo_bin("quotaguard").unwrap();
    cmd.assert()
        .failure() // Should fail because '--config' is required
        .stderr(predicate::str::contains(
            "required arguments were not provided",
        ));
}

#[test]
fn test_cli_rejects_missing_config_file() {
    let mut cmd = Command::cargo_bin("quotaguard").unwrap();
    cmd.args(["--config", "/definitely/not/here.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_cli_rejects_invalid_config() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(
        file.path(),
        r#"
namespaces:
  bad:
    default_bucket: { size: 1, fill_rate: 1 }
    dynamic_bucket_template: { size: 1, fill_rate: 1 }
"#,
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("quotaguard").unwrap();
    cmd.args(["--config", file.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}
