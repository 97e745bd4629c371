#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const CONFIG: &str = r#"
primary: api
services:
  - name: db
    order: 0
    image: postgres:16
  - name: api
    order: 1
    image: app-api:latest
    depends_on: [db]
    health_check: true
    build:
      context: .
"#;

fn stackup(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("stackup").unwrap();
    cmd.current_dir(dir.path())
        .env("STACKUP_ROOT", dir.path())
        .env_remove("STACKUP_HEALTH_TIMEOUT")
        .env_remove("STACKUP_LOG_TAIL")
        .env_remove("STACKUP_DOCKER")
        .env_remove("SECRET_KEY");
    cmd
}

fn init_project(dir: &TempDir) {
    std::fs::write(dir.path().join("stackup.yaml"), CONFIG).unwrap();
    std::fs::write(dir.path().join("docker-compose.yml"), "services: {}\n").unwrap();
}

/// A stand-in `docker` that answers the queries stackup makes. Container
/// health comes from `FAKE_HEALTH` (default `healthy`).
#[cfg(unix)]
fn fake_docker(dir: &TempDir) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = r#"#!/bin/sh
health="${FAKE_HEALTH:-healthy}"
case "$1" in
  info) echo "24.0.7" ;;
  buildx) echo "github.com/docker/buildx v0.12.1" ;;
  image) echo "sha256:0123456789" ;;
  build) echo "Successfully built 0123456789" ;;
  inspect)
    echo "[{\"State\":{\"Status\":\"running\",\"ExitCode\":0,\"Health\":{\"Status\":\"$health\",\"Log\":[{\"Output\":\"probe $health\"}]}},\"RestartCount\":0,\"Config\":{\"Env\":[\"SERVICE_ROLE=web\",\"SECRET_KEY=leak\"]}}]"
    ;;
  compose)
    for arg in "$@"; do last="$arg"; done
    case " $* " in
      *" ps "*) echo "cid-$last" ;;
      *" logs "*) echo "log line from $last" ;;
      *" up "*) echo "Container $last  Started" ;;
      *) echo "Docker Compose version v2.24.0" ;;
    esac
    ;;
  *) echo "unexpected: $*" >&2; exit 1 ;;
esac
"#;
    let path = dir.path().join("fake-docker");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

// ---------------------------------------------------------------------------
// usage / environment errors
// ---------------------------------------------------------------------------

#[test]
fn help_lists_commands() {
    let dir = TempDir::new().unwrap();
    stackup(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("update"))
        .stdout(predicate::str::contains("diagnose"));
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    stackup(&dir).args(["start", "--bogus"]).assert().code(2);
}

#[test]
fn missing_config_fails() {
    let dir = TempDir::new().unwrap();
    stackup(&dir)
        .arg("start")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("config not found"));
}

#[test]
fn missing_runtime_aborts_start_before_building() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    stackup(&dir)
        .arg("start")
        .env("STACKUP_DOCKER", "/nonexistent/docker")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("container runtime unavailable"));
    assert!(!dir.path().join("logs/build.log").exists());
    assert!(!dir.path().join(".stackup/run.lock").exists());
}

#[test]
fn check_reports_cycle() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("stackup.yaml"),
        "primary: a\nservices:\n  - {name: a, image: a, depends_on: [b]}\n  - {name: b, image: b, depends_on: [a]}\n",
    )
    .unwrap();
    stackup(&dir)
        .arg("check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("dependency cycle"));
}

#[test]
fn check_without_runtime_fails() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    stackup(&dir)
        .args(["check", "--docker", "/nonexistent/docker"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("launch order: db -> api"))
        .stdout(predicate::str::contains("runtime: container runtime unavailable"));
}

#[test]
fn check_flags_missing_build_context() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let config = CONFIG.replace("context: .", "context: services/api");
    std::fs::write(dir.path().join("stackup.yaml"), config).unwrap();
    stackup(&dir)
        .args(["check", "--docker", "/nonexistent/docker"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("[error] service 'api' build context"));
}

// ---------------------------------------------------------------------------
// diagnose
// ---------------------------------------------------------------------------

#[test]
fn diagnose_without_runtime_still_writes_report() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    stackup(&dir)
        .arg("diagnose")
        .env("STACKUP_DOCKER", "/nonexistent/docker")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("=== stackup diagnostics"))
        .stdout(predicate::str::contains("--- api [primary] ---"));
    let log = std::fs::read_to_string(dir.path().join("logs/diagnostics.log")).unwrap();
    assert!(log.contains("trigger: manual"));
}

#[test]
fn diagnose_json_has_a_section_per_service() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let out = stackup(&dir)
        .args(["--json", "diagnose", "--tail", "5"])
        .env("STACKUP_DOCKER", "/nonexistent/docker")
        .output()
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(value["services"].as_array().unwrap().len(), 2);
    assert_eq!(value["tail"], 5);
    assert_eq!(value["trigger"], "manual");
}

// ---------------------------------------------------------------------------
// end to end against a stand-in runtime
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[test]
fn start_on_healthy_stack_skips_rebuild() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let docker = fake_docker(&dir);
    stackup(&dir)
        .arg("start")
        .env("STACKUP_DOCKER", &docker)
        .assert()
        .success()
        .stdout(predicate::str::contains("skipping rebuild"))
        .stdout(predicate::str::contains("api is healthy"));
    assert!(!dir.path().join(".stackup/run.lock").exists());
    let startup = std::fs::read_to_string(dir.path().join("logs/startup.log")).unwrap();
    assert!(startup.contains("Container api  Started"));
}

#[cfg(unix)]
#[test]
fn start_json_reports_readiness() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let docker = fake_docker(&dir);
    let out = stackup(&dir)
        .args(["-j", "start"])
        .env("STACKUP_DOCKER", &docker)
        .output()
        .unwrap();
    assert!(out.status.success());
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(value["readiness"]["outcome"], "ready");
    assert_eq!(value["summary"]["kind"], "skipping_rebuild");
    assert_eq!(value["started"], serde_json::json!(["db", "api"]));
}

#[cfg(unix)]
#[test]
fn unhealthy_primary_times_out_with_exit_3() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let docker = fake_docker(&dir);
    stackup(&dir)
        .args(["start", "--timeout", "0"])
        .env("STACKUP_DOCKER", &docker)
        .env("FAKE_HEALTH", "unhealthy")
        .assert()
        .code(3)
        .stdout(predicate::str::contains("=== stackup diagnostics"))
        .stdout(predicate::str::contains("SERVICE_ROLE=web"))
        .stdout(predicate::str::contains("SECRET_KEY").not())
        .stderr(predicate::str::contains("did not become healthy"));

    let diag = std::fs::read_to_string(dir.path().join("logs/diagnostics.log")).unwrap();
    assert!(diag.contains("trigger: timed_out"));
    assert!(diag.contains("last health probe: probe unhealthy"));
    // The unhealthy primary was rebuilt first.
    let build = std::fs::read_to_string(dir.path().join("logs/build.log")).unwrap();
    assert!(build.contains("=== build api"));
}

#[cfg(unix)]
#[test]
fn status_prints_table() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let docker = fake_docker(&dir);
    stackup(&dir)
        .arg("status")
        .env("STACKUP_DOCKER", &docker)
        .assert()
        .success()
        .stdout(predicate::str::contains("SERVICE"))
        .stdout(predicate::str::contains("api *"))
        .stdout(predicate::str::contains("healthy"));
}
