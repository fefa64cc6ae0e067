//! CLI smoke tests for conformance-images.
//!
//! None of these need a cluster or a container engine: versions are given
//! explicitly and engine work runs in dry-run mode.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command running in an empty directory with no user config
fn images_cmd(home: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("conformance-images");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env_remove("KUBECONFIG")
        .env_remove("RUST_LOG");
    cmd
}

fn write_override(home: &TempDir, content: &str) -> std::path::PathBuf {
    let path = home.path().join("repos.yaml");
    std::fs::write(&path, content).unwrap();
    path
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    images_cmd(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("pull"))
        .stdout(predicate::str::contains("download"))
        .stdout(predicate::str::contains("push"))
        .stdout(predicate::str::contains("delete"));
}

#[test]
fn test_version() {
    let home = TempDir::new().unwrap();
    images_cmd(&home)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("conformance-images "));
}

#[test]
fn test_completion() {
    let home = TempDir::new().unwrap();
    images_cmd(&home)
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("conformance-images"));
}

// =============================================================================
// list
// =============================================================================

#[test]
fn test_list_upstream_images() {
    let home = TempDir::new().unwrap();
    images_cmd(&home)
        .args(["list", "--kubernetes-version", "v1.18.0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("k8s.gcr.io/conformance:v1.18.0\n"))
        .stdout(predicate::str::contains("k8s.gcr.io/kube-proxy:v1.18.0\n"))
        .stdout(predicate::function(|out: &str| out.lines().count() == 6));
}

#[test]
fn test_list_applies_override() {
    let home = TempDir::new().unwrap();
    let file = write_override(&home, "conformance: myregistry.local/conformance\n");

    images_cmd(&home)
        .args(["list", "--kubernetes-version", "1.18.0", "--e2e-repo-config"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("myregistry.local/conformance:1.18.0"))
        .stdout(predicate::str::contains("k8s.gcr.io/kube-apiserver:1.18.0"));
}

#[test]
fn test_missing_override_file_fails() {
    let home = TempDir::new().unwrap();
    images_cmd(&home)
        .args(["list", "--kubernetes-version", "v1.18.0"])
        .args(["--e2e-repo-config", "does-not-exist.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does-not-exist.yaml"));
}

#[test]
fn test_invalid_version_fails() {
    let home = TempDir::new().unwrap();
    images_cmd(&home)
        .args(["list", "--kubernetes-version", "latest"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("latest"));
}

#[test]
fn test_unsupported_plugin_fails() {
    let home = TempDir::new().unwrap();
    images_cmd(&home)
        .args(["list", "-p", "systemd-logs", "--kubernetes-version", "v1.18.0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported plugin"));
}

// =============================================================================
// Dry run
// =============================================================================

#[test]
fn test_dry_run_pull() {
    let home = TempDir::new().unwrap();
    images_cmd(&home)
        .args(["--dry-run", "pull", "--kubernetes-version", "v1.18.0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[DRY RUN]"))
        .stdout(predicate::str::contains("pull k8s.gcr.io/kube-scheduler:v1.18.0"));
}

#[test]
fn test_dry_run_download_writes_nothing() {
    let home = TempDir::new().unwrap();
    images_cmd(&home)
        .args(["--dry-run", "download", "--kubernetes-version", "v1.18.0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("kubernetes_e2e_images_v1.18.0.tar"));

    assert!(!home.path().join("kubernetes_e2e_images_v1.18.0.tar").exists());
}

#[test]
fn test_push_without_override_fails() {
    let home = TempDir::new().unwrap();
    images_cmd(&home)
        .args(["--dry-run", "push", "--kubernetes-version", "v1.18.0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--e2e-repo-config"));
}

// =============================================================================
// config
// =============================================================================

#[test]
fn test_config_init_then_settings_are_used() {
    let home = TempDir::new().unwrap();
    let path = home.path().join(".conformance-images.toml");

    images_cmd(&home)
        .args(["config", "init", "--path"])
        .arg(&path)
        .assert()
        .success();

    let content = std::fs::read_to_string(&path)
        .unwrap()
        .replace("kubernetes_version = \"auto\"", "kubernetes_version = \"v1.19.3\"");
    std::fs::write(&path, content).unwrap();

    images_cmd(&home)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("k8s.gcr.io/conformance:v1.19.3"));
}
