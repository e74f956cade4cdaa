#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! once assert_cmd 2.1 is the minimum

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

const VALID: &str = r#"
grants:
  app-decrypt:
    key_id: alias/app
    grantee_principal: arn:aws:iam::123456789012:role/app
    operations: [Decrypt, Encrypt]
    constraints:
      - kind: equals
        context:
          ctx: prod
"#;

const CONFLICTING: &str = r#"
grants:
  broken:
    key_id: alias/app
    grantee_principal: arn:aws:iam::123456789012:role/app
    operations: [Decrypt]
    constraints:
      - kind: equals
        context: { x: "1" }
      - kind: subset
        context: { y: "2" }
"#;

fn grant() -> Command {
    let mut cmd = Command::cargo_bin("grant").unwrap();
    cmd.env_remove("GRANTFLOW_MANIFEST")
        .env_remove("GRANTFLOW_PROJECT_DIR")
        .env_remove("GRANTFLOW_CONFIG_PATH");
    cmd
}

/// Help lists every subcommand
#[test]
fn test_cli_help() {
    grant()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("KMS grants"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("import"));
}

#[test]
fn test_cli_version() {
    grant()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("grantflow"));
}

#[test]
fn test_invalid_command() {
    grant().arg("invalid-command").assert().failure();
}

#[test]
fn test_validate_valid_manifest() {
    let temp_dir = tempfile::tempdir().unwrap();
    fs::write(temp_dir.path().join("grants.yaml"), VALID).unwrap();

    grant()
        .current_dir(temp_dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("app-decrypt"));
}

/// Both constraint kinds on one grant are rejected without contacting AWS
#[test]
fn test_validate_conflicting_constraints() {
    let temp_dir = tempfile::tempdir().unwrap();
    fs::write(temp_dir.path().join("custom.yaml"), CONFLICTING).unwrap();

    grant()
        .current_dir(temp_dir.path())
        .arg("validate")
        .arg("-f")
        .arg("custom.yaml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("broken"))
        .stderr(predicate::str::contains("encryption_context_equals"));
}

#[test]
fn test_validate_missing_manifest() {
    let temp_dir = tempfile::tempdir().unwrap();

    grant()
        .current_dir(temp_dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("grants.yaml"));
}

/// Without --refresh, plan only diffs against local state
#[test]
fn test_plan_without_state() {
    let temp_dir = tempfile::tempdir().unwrap();
    fs::write(temp_dir.path().join("grants.yaml"), VALID).unwrap();

    grant()
        .arg("-C")
        .arg(temp_dir.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("Create grant app-decrypt"))
        .stdout(predicate::str::contains("1 to create"));
}

#[test]
fn test_import_rejects_malformed_id() {
    let temp_dir = tempfile::tempdir().unwrap();

    grant()
        .current_dir(temp_dir.path())
        .arg("import")
        .arg("app")
        .arg("no-separator")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no-separator"));
    assert!(!temp_dir.path().join(".grantflow").exists());
}

#[test]
fn test_destroy_with_empty_state() {
    let temp_dir = tempfile::tempdir().unwrap();

    grant()
        .current_dir(temp_dir.path())
        .arg("destroy")
        .assert()
        .success()
        .stdout(predicate::str::contains("No grants recorded"));
}
