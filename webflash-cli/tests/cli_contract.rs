//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, std::path::Path, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("webflash")
}

/// Config file with every session delay removed.
fn fast_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("webflash.toml");
    fs::write(
        &path,
        r#"
[flasher]
auto_flash_delay_ms = 0
asset_base_url = "http://127.0.0.1:9/assets"
http_timeout_ms = 1000

[flasher.reset]
release_ms = 0
hold_ms = 0
boot_settle_ms = 0
"#,
    )
    .expect("write config");
    path
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("webflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("webflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn list_ports_json_returns_valid_json() {
    let output = cli_cmd()
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    // Enumeration can fail on hosts without serial support; only a success
    // is required to print JSON.
    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
        assert!(parsed.is_array());
    }
}

#[test]
fn check_json_reports_ready() {
    let output = cli_cmd()
        .args(["check", "--json", "--dry-run"])
        .output()
        .expect("command should execute");
    assert!(output.status.success());

    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(parsed["ready"], serde_json::Value::Bool(true));
    assert_eq!(parsed["reason"], "");
}

#[test]
fn missing_port_is_connection_error() {
    let dir = tempdir().expect("tempdir should be created");
    let config = fast_config(dir.path());

    cli_cmd()
        .arg("--config")
        .arg(&config)
        .args(["--non-interactive", "--port", "/dev/webflash-no-such-port", "probe"])
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Connection error"))
        .stderr(predicate::str::contains("denied").not());
}

#[test]
fn dry_run_probe_prints_chip() {
    let dir = tempdir().expect("tempdir should be created");
    let config = fast_config(dir.path());

    cli_cmd()
        .arg("--config")
        .arg(&config)
        .args(["--dry-run", "probe"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ESP32 (dry run)"))
        .stderr(predicate::str::contains("Connected: ESP32 (dry run)"));
}

#[test]
fn dry_run_flash_of_local_file_succeeds() {
    let dir = tempdir().expect("tempdir should be created");
    let config = fast_config(dir.path());
    let firmware = dir.path().join("blink.bin");
    fs::write(&firmware, vec![0xE9; 40_000]).expect("write firmware");

    cli_cmd()
        .arg("--config")
        .arg(&config)
        .args(["--dry-run", "flash"])
        .arg(&firmware)
        .args(["--address", "0x10000"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Selected firmware: blink.bin").not())
        .stderr(predicate::str::contains("Flash complete! The device is restarting."));
}

#[test]
fn verbose_flash_shows_session_log() {
    let dir = tempdir().expect("tempdir should be created");
    let config = fast_config(dir.path());
    let firmware = dir.path().join("blink.bin");
    fs::write(&firmware, vec![0xE9; 1024]).expect("write firmware");

    cli_cmd()
        .arg("--config")
        .arg(&config)
        .args(["--dry-run", "-v", "flash"])
        .arg(&firmware)
        .assert()
        .success()
        .stderr(predicate::str::contains("Selected firmware: blink.bin (1024 bytes)."))
        .stderr(predicate::str::contains("Flashing at 0x1000 (erase all: false)."));
}

#[test]
fn flash_of_missing_file_is_usage_error() {
    let dir = tempdir().expect("tempdir should be created");

    cli_cmd()
        .args(["--dry-run", "flash"])
        .arg(dir.path().join("missing.bin"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("firmware file not found"));
}

#[test]
fn fetch_from_unreachable_server_fails_cleanly() {
    let dir = tempdir().expect("tempdir should be created");
    let config = fast_config(dir.path());

    cli_cmd()
        .current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["fetch", "app.bin"])
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Could not load firmware"));

    assert!(!dir.path().join("app.bin").exists());
}

#[test]
fn session_without_terminal_is_usage_error() {
    cli_cmd()
        .args(["--dry-run", "session"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("interactive terminal"));
}

#[test]
fn completions_without_shell_is_usage_error() {
    cli_cmd()
        .arg("completions")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("specify a shell"));
}

#[test]
fn completions_bash_exits_zero() {
    cli_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("webflash"));
}

#[test]
fn unknown_subcommand_is_usage_error() {
    cli_cmd().arg("frobnicate").assert().code(2);
}
