//! Exit codes and messages of the `ftp-pusher` binary

mod common;

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;

use tempfile::TempDir;
use tokio::process::Command;

use common::{closed_port, config_text, silent_listener, FakeFtpServer, ServerOptions};

async fn run(args: &[&OsStr]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ftp-pusher"))
        .args(args)
        .output()
        .await
        .expect("spawn ftp-pusher")
}

async fn run_with_config(text: &str, dir: &Path) -> Output {
    let path = write_config(text, dir);
    run(&[path.as_os_str()]).await
}

fn write_config(text: &str, dir: &Path) -> PathBuf {
    let path = dir.join("pusher.ini");
    fs::write(&path, text).unwrap();
    path
}

fn combined(output: &Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[tokio::test]
async fn test_no_arguments_is_usage_error() {
    let output = run(&[]).await;
    assert_eq!(output.status.code(), Some(1));
    assert!(combined(&output).contains("Usage"));
}

#[tokio::test]
async fn test_missing_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.ini");
    let output = run(&[path.as_os_str()]).await;

    assert_eq!(output.status.code(), Some(1));
    assert!(combined(&output).contains("does not exist."));
}

#[tokio::test]
async fn test_incomplete_configuration_lists_every_gap() {
    let dir = TempDir::new().unwrap();
    let output = run_with_config(
        "[folders]\nhotfolder = /tmp\n\n[server]\naddress = localhost\ndir = /in\n\
         username = u\npassword = p\n",
        dir.path(),
    )
    .await;

    assert_eq!(output.status.code(), Some(1));
    let text = combined(&output);
    assert!(text.contains("Incomplete configuration:"));
    assert!(text.contains("Missing option coldfolder in section folders"));
    assert!(text.contains("Missing option timeout in section server"));
}

#[tokio::test]
async fn test_missing_hot_folder() {
    let dir = TempDir::new().unwrap();
    let cold = TempDir::new().unwrap();
    let hot = dir.path().join("no-such-hot");
    let addr = closed_port().await;

    let output = run_with_config(&config_text(&hot, cold.path(), addr, "secret"), dir.path()).await;
    assert_eq!(output.status.code(), Some(2));
    assert!(combined(&output).contains("does not exist."));
}

#[tokio::test]
async fn test_missing_cold_folder() {
    let dir = TempDir::new().unwrap();
    let hot = TempDir::new().unwrap();
    let cold = dir.path().join("no-such-cold");
    let addr = closed_port().await;

    let output = run_with_config(&config_text(hot.path(), &cold, addr, "secret"), dir.path()).await;
    assert_eq!(output.status.code(), Some(3));
}

#[tokio::test]
async fn test_empty_hot_folder_succeeds_without_server() {
    let dir = TempDir::new().unwrap();
    let hot = TempDir::new().unwrap();
    let cold = TempDir::new().unwrap();
    let addr = closed_port().await;

    let output =
        run_with_config(&config_text(hot.path(), cold.path(), addr, "secret"), dir.path()).await;
    assert_eq!(output.status.code(), Some(0));
    assert!(combined(&output).contains("No files to upload."));
}

#[tokio::test]
async fn test_unreachable_server() {
    let dir = TempDir::new().unwrap();
    let hot = TempDir::new().unwrap();
    let cold = TempDir::new().unwrap();
    fs::write(hot.path().join("a.txt"), b"alpha").unwrap();
    let addr = closed_port().await;

    let output =
        run_with_config(&config_text(hot.path(), cold.path(), addr, "secret"), dir.path()).await;
    assert_eq!(output.status.code(), Some(4));
    assert!(hot.path().join("a.txt").exists());
}

#[tokio::test]
async fn test_server_that_never_greets_times_out() {
    let dir = TempDir::new().unwrap();
    let hot = TempDir::new().unwrap();
    let cold = TempDir::new().unwrap();
    fs::write(hot.path().join("a.txt"), b"alpha").unwrap();
    let (_listener, addr) = silent_listener().await;

    let text = config_text(hot.path(), cold.path(), addr, "secret")
        .replace("timeout = 5", "timeout = 0.3");
    let output = run_with_config(&text, dir.path()).await;

    assert_eq!(output.status.code(), Some(4));
    assert!(combined(&output).contains("timed out"));
    assert!(hot.path().join("a.txt").exists());
    assert!(!cold.path().join("a.txt").exists());
}

#[tokio::test]
async fn test_bad_credentials() {
    let dir = TempDir::new().unwrap();
    let hot = TempDir::new().unwrap();
    let cold = TempDir::new().unwrap();
    fs::write(hot.path().join("a.txt"), b"alpha").unwrap();
    let server = FakeFtpServer::start(ServerOptions::default()).await;

    let output = run_with_config(
        &config_text(hot.path(), cold.path(), server.addr, "wrong"),
        dir.path(),
    )
    .await;
    assert_eq!(output.status.code(), Some(5));
    assert!(hot.path().join("a.txt").exists());
}

#[tokio::test]
async fn test_successful_run_prints_summary() {
    let dir = TempDir::new().unwrap();
    let hot = TempDir::new().unwrap();
    let cold = TempDir::new().unwrap();
    fs::write(hot.path().join("a.txt"), b"alpha").unwrap();
    fs::write(hot.path().join("b.txt"), b"beta").unwrap();
    let server = FakeFtpServer::start(ServerOptions::default()).await;

    let output = run_with_config(
        &config_text(hot.path(), cold.path(), server.addr, "secret"),
        dir.path(),
    )
    .await;
    assert_eq!(output.status.code(), Some(0));
    assert!(combined(&output).contains("Uploaded files: 2, failed files: 0"));
    assert!(cold.path().join("a.txt").exists());
    assert!(cold.path().join("b.txt").exists());
    assert_eq!(server.files().len(), 2);
}

#[tokio::test]
async fn test_quiet_run_omits_summary() {
    let dir = TempDir::new().unwrap();
    let hot = TempDir::new().unwrap();
    let cold = TempDir::new().unwrap();
    fs::write(hot.path().join("a.txt"), b"alpha").unwrap();
    let server = FakeFtpServer::start(ServerOptions::default()).await;

    let path = write_config(
        &config_text(hot.path(), cold.path(), server.addr, "secret"),
        dir.path(),
    );
    let output = run(&[OsStr::new("-q"), path.as_os_str()]).await;

    assert_eq!(output.status.code(), Some(0));
    assert!(!combined(&output).contains("Uploaded files"));
    assert!(cold.path().join("a.txt").exists());
}
