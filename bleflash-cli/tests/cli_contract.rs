//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bleflash");
    cmd.env_remove("BLEFLASH_PORT")
        .env_remove("BLEFLASH_BAUD")
        .env_remove("BLEFLASH_BASE_URL")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("bleflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("bleflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn completions_bash_exits_zero() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bleflash"));
}

#[test]
fn list_ports_json_returns_envelope() {
    let mut cmd = cli_cmd();
    let output = cmd
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    // Enumeration may be unavailable in sandboxes; only check JSON when it worked
    if output
        .status
        .success()
    {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: serde_json::Value =
            serde_json::from_str(&stdout).expect("stdout should be JSON");
        assert_eq!(parsed["ok"], serde_json::Value::Bool(true));
        assert!(parsed["data"]["ports"].is_array());
    }
}

#[test]
fn info_json_reports_page_plan() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = dir
        .path()
        .join("fw.bin");
    fs::write(&firmware, vec![0x5A; 10_000]).expect("write firmware");

    let mut cmd = cli_cmd();
    let output = cmd
        .arg("info")
        .arg("--json")
        .arg(&firmware)
        .output()
        .expect("command should execute");

    assert!(
        output
            .status
            .success()
    );
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    let data = &parsed["data"];
    assert_eq!(data["total_bytes"], 10_000);
    assert_eq!(data["page_count"], 3);
    assert_eq!(data["pages"][2]["len"], 1808);
}

#[test]
fn info_json_error_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir
        .path()
        .join("not_exists.bin");

    let mut cmd = cli_cmd();
    cmd.arg("info")
        .arg("--json")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn update_missing_firmware_fails_before_touching_port() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir
        .path()
        .join("missing.bin");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "update"])
        .arg(&nonexistent)
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("missing.bin"));
}

#[test]
fn update_url_without_base_url_is_usage_error() {
    let dir = tempdir().expect("tempdir should be created");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "update", "--url", "app.bin"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("base URL"));
}

#[test]
fn update_on_invalid_port_fails() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = dir
        .path()
        .join("fw.bin");
    fs::write(&firmware, vec![0u8; 100]).expect("write firmware");
    let config = dir
        .path()
        .join("fast.toml");
    fs::write(&config, "[update]\nmax_attempts = 0\n").expect("write config");

    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "--config"])
        .arg(&config)
        .arg("update")
        .arg(&firmware)
        .output()
        .expect("command should execute");

    assert!(
        !output
            .status
            .success(),
        "update on a missing port should not succeed"
    );
    assert!(output.stdout.is_empty());
}

#[test]
fn update_non_interactive_without_port_fails_fast() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = dir
        .path()
        .join("fw.bin");
    fs::write(&firmware, vec![0u8; 100]).expect("write firmware");
    let config = dir
        .path()
        .join("fast.toml");
    fs::write(
        &config,
        "[update]\nmax_attempts = 0\nresponse_timeout_ms = 50\nreconnect_settle_ms = 0\nwrite_timeout_ms = 50\n",
    )
    .expect("write config");

    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .arg("--non-interactive")
        .arg("--config")
        .arg(&config)
        .arg("update")
        .arg(&firmware)
        .output()
        .expect("command should execute");

    // Zero or several ports are usage errors; a single port fails to open
    assert!(
        !output
            .status
            .success()
    );
}

// ============================================================================
// Exit Code Tests
// ============================================================================

#[test]
fn exit_code_two_for_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_update_without_source() {
    let mut cmd = cli_cmd();
    cmd.arg("update")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty());
}

#[test]
fn exit_code_three_for_invalid_explicit_config() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir
        .path()
        .join("broken.toml");
    fs::write(&config, "invalid toml [[[").expect("write invalid config");

    let mut cmd = cli_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("list-ports")
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("TOML"));
}

#[test]
fn invalid_local_config_only_warns() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(
        dir.path()
            .join("bleflash.toml"),
        "invalid toml [[[",
    )
    .expect("write invalid config");
    let firmware = dir
        .path()
        .join("fw.bin");
    fs::write(&firmware, vec![0u8; 16]).expect("write firmware");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("info")
        .arg(&firmware)
        .assert()
        .success()
        .stderr(predicate::str::contains("TOML"));
}

#[test]
fn unknown_flag_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("list-ports")
        .arg("--jason")
        .assert()
        .failure()
        .stderr(predicate::str::contains("json"));
}
