//! ---
//! dcu_section: "05-cli"
//! dcu_subsection: "binary"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Command line behaviour that needs no container runtime."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use std::fs;

use assert_cmd::Command;

fn dc_update() -> Command {
    let mut cmd = Command::cargo_bin("dc-update").expect("binary built");
    cmd.env_remove("DC_UPDATE_CONFIG")
        .env_remove("DC_UPDATE_LOG")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn version_flag_prints_build_banner() {
    let output = dc_update().arg("--version").output().expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("dc-update v"));
    assert!(stdout.contains("Profile:"));
}

#[test]
fn missing_default_compose_file_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dc_update()
        .current_dir(dir.path())
        .output()
        .expect("run");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("docker-compose file does not exist"));
}

#[test]
fn missing_file_flag_is_a_usage_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dc_update()
        .current_dir(dir.path())
        .args(["-f", "nope.yml"])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn unreachable_runtime_fails_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("docker-compose.yml"), "services: {}\n").expect("compose file");
    fs::write(
        dir.path().join("dc-update.toml"),
        "[compose]\ndocker_binary = \"dc-update-test-missing-docker\"\n",
    )
    .expect("config file");

    let output = dc_update()
        .current_dir(dir.path())
        .args(["-n", "web"])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to update containers"));
    assert!(stderr.contains("container runtime unavailable"));
}
