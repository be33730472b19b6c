use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Writes a config whose profile directory is `profile_dir`
fn write_config(temp: &Path, profile_dir: &Path) -> PathBuf {
    let path = temp.join("config.toml");
    fs::write(
        &path,
        format!(
            "[core]\nprofile_dir = \"{}\"\n\n[commands]\nbatch = \"true {{profile}}\"\nmanual = \"true {{profile}}\"\noverride = \"true\"\n",
            profile_dir.display()
        ),
    )
    .unwrap();
    path
}

fn autosync() -> Command {
    let mut cmd = Command::cargo_bin("autosync").unwrap();
    cmd.env_remove("AUTOSYNC_CONFIG_PATH")
        .env("RUST_LOG", "off")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_profiles_lists_profiles_and_overlaps() {
    let temp = TempDir::new().unwrap();
    let profiles = temp.path().join("profiles");
    fs::create_dir_all(&profiles).unwrap();
    fs::write(profiles.join("docs.prf"), "root = /srv/shared\nroot = /srv/docs\nlabel = Documents\n").unwrap();
    fs::write(profiles.join("media.prf"), "root = /srv/shared\n").unwrap();
    fs::write(profiles.join("broken.prf"), "root = ssh://host//only-remote\n").unwrap();
    let config = write_config(temp.path(), &profiles);

    autosync()
        .arg("--config")
        .arg(&config)
        .arg("profiles")
        .assert()
        .success()
        .stdout(predicate::str::contains("Documents (docs)"))
        .stdout(predicate::str::contains("media"))
        .stdout(predicate::str::contains("/srv/shared"))
        .stdout(predicate::str::contains("docs and media share"))
        .stdout(predicate::str::contains("broken").not());
}

#[test]
fn test_config_path_from_environment() {
    let temp = TempDir::new().unwrap();
    let profiles = temp.path().join("profiles");
    fs::create_dir_all(&profiles).unwrap();
    let config = write_config(temp.path(), &profiles);

    autosync()
        .env("AUTOSYNC_CONFIG_PATH", &config)
        .arg("profiles")
        .assert()
        .success()
        .stdout(predicate::str::contains("No valid profiles"));
}

#[test]
fn test_missing_profile_directory_is_an_error() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), &temp.path().join("absent"));

    autosync()
        .arg("--config")
        .arg(&config)
        .arg("profiles")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Error:"))
        .stderr(predicate::str::contains("Profile directory not found"));
}

#[test]
fn test_check_reports_missing_profile_directory() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), &temp.path().join("absent"));

    autosync()
        .arg("--config")
        .arg(&config)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error(s)"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("config.toml");
    fs::write(&config, "[core]\nsettle_interval = \"0s\"\n").unwrap();

    autosync()
        .arg("--config")
        .arg(&config)
        .arg("profiles")
        .assert()
        .failure()
        .stderr(predicate::str::contains("settle_interval"));
}

#[test]
fn test_missing_config_is_created_with_defaults() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("nested/config.toml");

    // the default profile directory probably does not exist here; the file
    // is written either way
    let _ = autosync().arg("--config").arg(&config).arg("profiles").assert();
    let written = fs::read_to_string(&config).unwrap();
    assert!(written.contains("settle_interval = \"5s\""));
}

#[test]
fn test_completion_generates_script() {
    autosync()
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("autosync"));
}
