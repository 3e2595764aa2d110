//! Integration tests for the haul binary

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn haul(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_haul"))
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .env("HAUL_LOG_LEVEL", "error")
        .output()
        .expect("Failed to execute haul")
}

/// Config pointing every path into `temp`, with a remote holding one file.
fn write_config(temp: &TempDir) -> String {
    let root = temp.path();
    fs::create_dir_all(root.join("mount/data")).unwrap();
    fs::write(root.join("mount/data/report.csv"), b"id,total\n1,42\n").unwrap();

    let config = format!(
        r#"
[remote]
root = "/data"
mount = "{mount}"

[local]
target = "{target}"
staging = "{staging}"

[store]
path = "{store}"
"#,
        mount = root.join("mount").display(),
        target = root.join("target").display(),
        staging = root.join("staging").display(),
        store = root.join("store").display(),
    );
    let path = root.join("haul-test.toml");
    fs::write(&path, config).unwrap();
    path.display().to_string()
}

#[test]
fn test_config_prints_default_toml() {
    let temp = TempDir::new().unwrap();
    let output = haul(&["config"], temp.path());
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("[engine]"));
    assert!(stdout.contains("concurrency = 4"));
    assert!(stdout.contains("[schedule]"));
}

#[test]
fn test_missing_config_file_fails() {
    let temp = TempDir::new().unwrap();
    let output = haul(&["--config", "does-not-exist.toml", "run"], temp.path());

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to load configuration"));
}

#[test]
fn test_incomplete_config_names_missing_field() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("partial.toml");
    fs::write(&path, "[remote]\nroot = \"/data\"\n").unwrap();

    let output = haul(&["--config", &path.display().to_string(), "run"], temp.path());

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("remote.mount"), "stderr: {}", stderr);
}

#[test]
fn test_run_then_status() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);

    let first = haul(&["--config", &config, "run"], temp.path());
    assert!(
        first.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&first.stderr)
    );
    assert_eq!(
        fs::read(temp.path().join("target/report.csv")).unwrap(),
        b"id,total\n1,42\n"
    );

    let second = haul(&["--config", &config, "run"], temp.path());
    let stdout = String::from_utf8_lossy(&second.stdout);
    assert!(second.status.success());
    assert!(stdout.contains("Retrieved 0 entries"));
    assert!(stdout.contains("1 already present"));

    let status = haul(&["--config", &config, "status", "--list"], temp.path());
    let stdout = String::from_utf8_lossy(&status.stdout);
    assert!(status.status.success());
    assert!(stdout.contains("1 completion records"));
    assert!(stdout.contains("/data/report.csv"));
}

#[test]
fn test_unreachable_remote_is_fatal() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);
    fs::remove_dir_all(temp.path().join("mount")).unwrap();

    let output = haul(&["--config", &config, "run"], temp.path());

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Remote is unreachable"));
}

#[cfg(not(feature = "sftp"))]
#[test]
fn test_sftp_host_needs_feature() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);
    let mut contents = fs::read_to_string(&config).unwrap();
    contents = contents.replace(
        "[remote]\n",
        "[remote]\nhost = \"files.example.com\"\nusername = \"haul\"\npassword = \"secret\"\n",
    );
    fs::write(&config, contents).unwrap();

    let output = haul(&["--config", &config, "run"], temp.path());

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("`sftp` feature"), "stderr: {}", stderr);
}
