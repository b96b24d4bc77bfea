//! Integration tests: run the tinypm binary and check exit codes and output.
//! None of these reach the network.

use std::path::Path;
use std::process::Command;

fn tinypm(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tinypm"));
    cmd.current_dir(dir)
        .env("TINYPM_CACHE_DIR", dir.join(".cache"))
        .env("NO_COLOR", "1")
        .env_remove("TINYPM_QUIET")
        .env_remove("TINYPM_LOG");
    cmd
}

#[test]
fn test_help() {
    let td = tempfile::tempdir().unwrap();
    let out = tinypm(td.path()).arg("--help").output().unwrap();
    assert!(out.status.success(), "tinypm --help should succeed");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("install"));
}

#[test]
fn test_install_help_lists_flags() {
    let td = tempfile::tempdir().unwrap();
    let out = tinypm(td.path()).args(["install", "--help"]).output().unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    for flag in ["--dev", "--production", "--lockfile-only", "--json", "--quiet"] {
        assert!(stdout.contains(flag), "missing {} in install --help", flag);
    }
}

#[test]
fn test_version() {
    let td = tempfile::tempdir().unwrap();
    let out = tinypm(td.path()).arg("--version").output().unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_install_no_package_json_fails() {
    let td = tempfile::tempdir().unwrap();
    let out = tinypm(td.path()).arg("install").output().unwrap();
    assert!(!out.status.success(), "tinypm install with no package.json should fail");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("No package.json"));
}

#[test]
fn test_install_without_dependencies_is_a_no_op() {
    let td = tempfile::tempdir().unwrap();
    let manifest = "{\n  \"name\": \"empty\"\n}\n";
    std::fs::write(td.path().join("package.json"), manifest).unwrap();

    let out = tinypm(td.path()).output().unwrap();
    assert!(out.status.success(), "bare tinypm should behave as install");
    assert!(String::from_utf8_lossy(&out.stdout).contains("No dependencies to install"));
    assert!(!td.path().join("tinypm-lock.json").exists());
    assert_eq!(std::fs::read_to_string(td.path().join("package.json")).unwrap(), manifest);
}

#[test]
fn test_invalid_package_json_fails_without_writing_lock() {
    let td = tempfile::tempdir().unwrap();
    std::fs::write(td.path().join("package.json"), "{ not json").unwrap();
    let out = tinypm(td.path()).args(["install", "-q"]).output().unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("package.json"));
    assert!(!td.path().join("tinypm-lock.json").exists());
}

#[test]
fn test_unreachable_registry_fails_and_leaves_files_alone() {
    let td = tempfile::tempdir().unwrap();
    let manifest = r#"{"dependencies":{"left-pad":"^1.3.0"}}"#;
    std::fs::write(td.path().join("package.json"), manifest).unwrap();
    let out = tinypm(td.path())
        .args(["install", "--lockfile-only", "-q"])
        .env("TINYPM_REGISTRY", "http://127.0.0.1:9")
        .env("TINYPM_HTTP_RETRIES", "0")
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("left-pad"));
    assert!(!td.path().join("tinypm-lock.json").exists());
    assert_eq!(std::fs::read_to_string(td.path().join("package.json")).unwrap(), manifest);
}
