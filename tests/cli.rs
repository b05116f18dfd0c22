use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

const DYAD_ENV: &[&str] = &[
    "ACTOR_CONTAINER",
    "DYAD_NAME",
    "DYAD_MEMBER",
    "DYAD_STATE_DIR",
    "DYAD_LOOP_ENABLED",
    "DYAD_CODEX_START_CMD",
];

/// A `dyad` command isolated from the caller's config and environment.
fn dyad(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("dyad").unwrap();
    cmd.env("DYAD_CONFIG", home.join("missing.toml"));
    for key in DYAD_ENV {
        cmd.env_remove(key);
    }
    cmd
}

#[test]
fn extract_prints_delimited_body() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("pane.txt");
    fs::write(
        &capture,
        "› do the thing\n<<WORK_REPORT_BEGIN>>\nSummary:\n- fixed the build\n<<WORK_REPORT_END>>\n› ",
    )
    .unwrap();

    dyad(dir.path())
        .args(["extract", "--strict"])
        .arg(&capture)
        .assert()
        .success()
        .stdout("Summary:\n- fixed the build\n");
}

#[test]
fn extract_reads_stdin() {
    let dir = tempfile::tempdir().unwrap();
    dyad(dir.path())
        .args(["extract", "--member", "critic", "-"])
        .write_stdin("Assessment:\n- tests are green\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("tests are green"));
}

#[test]
fn extract_strict_without_markers_fails() {
    let dir = tempfile::tempdir().unwrap();
    dyad(dir.path())
        .args(["extract", "--strict", "-"])
        .write_stdin("Summary:\n- no markers here\n")
        .assert()
        .code(6)
        .stderr(predicate::str::contains("missing work report markers"));
}

#[test]
fn control_flags_round_trip_through_status() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state");

    dyad(dir.path())
        .args(["control", "pause", "--state-dir"])
        .arg(&state)
        .assert()
        .success();
    assert!(state.join("control.pause").exists());

    dyad(dir.path())
        .args(["status", "--format", "json", "--state-dir"])
        .arg(&state)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""control": "pause""#))
        .stdout(predicate::str::contains(r#""turn": 0"#));

    dyad(dir.path())
        .args(["control", "clear", "--state-dir"])
        .arg(&state)
        .assert()
        .success();
    assert!(!state.join("control.pause").exists());
}

#[test]
fn status_reads_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state");
    let config = dir.path().join("loop.toml");
    fs::write(
        &config,
        format!("dyad = \"bravo\"\nstate_dir = {:?}\n", state.display().to_string()),
    )
    .unwrap();

    dyad(dir.path())
        .args(["status", "--format", "text", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("dyad=bravo"))
        .stdout(predicate::str::contains("actor=dyad-bravo-actor"));
}

#[test]
fn unknown_config_key_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("loop.toml");
    fs::write(&config, "no_such_key = 1\n").unwrap();

    dyad(dir.path())
        .args(["status", "--config"])
        .arg(&config)
        .assert()
        .code(2);
}

#[test]
fn disabled_loop_exits_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    dyad(dir.path())
        .args(["loop", "--no-delay", "--state-dir"])
        .arg(dir.path().join("state"))
        .env("DYAD_LOOP_ENABLED", "false")
        .assert()
        .success();
}

#[test]
fn enabled_loop_without_container_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    dyad(dir.path())
        .args(["loop", "--no-delay"])
        .env("DYAD_LOOP_ENABLED", "true")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("ACTOR_CONTAINER"));
}

#[test]
fn schema_describes_config_file() {
    let dir = tempfile::tempdir().unwrap();
    dyad(dir.path())
        .arg("schema")
        .assert()
        .success()
        .stdout(predicate::str::contains("actor_container"))
        .stdout(predicate::str::contains("turn_timeout_seconds"));
}
