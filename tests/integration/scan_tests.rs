use std::fs;
use std::path::Path;

use clap::Parser;
use drivedupe::cli::Cli;
use drivedupe::error::ExitCode;
use tempfile::{tempdir, TempDir};

use crate::ENV_MUTEX;

fn run(args: &[&str]) -> anyhow::Result<ExitCode> {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let mut argv = vec!["drivedupe", "-q"];
    argv.extend_from_slice(args);
    let cli = Cli::try_parse_from(argv)?;
    drivedupe::run_app(cli)
}

fn tree(files: &[(&str, &[u8])]) -> TempDir {
    let dir = tempdir().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    dir
}

fn path_arg(dir: &Path) -> String {
    dir.to_string_lossy().into_owned()
}

#[test]
fn test_scan_with_duplicates_succeeds() {
    let dir = tree(&[
        ("a.txt", b"same content"),
        ("nested/b.txt", b"same content"),
        ("c.txt", b"different"),
    ]);
    let code = run(&["scan", &path_arg(dir.path())]).unwrap();
    assert_eq!(code, ExitCode::Success);
}

#[test]
fn test_scan_without_duplicates() {
    let dir = tree(&[("a.txt", b"one"), ("b.txt", b"two")]);
    let code = run(&["scan", &path_arg(dir.path()), "--algorithm", "blake3"]).unwrap();
    assert_eq!(code, ExitCode::NoDuplicates);
}

#[test]
fn test_scan_empty_directory() {
    let dir = tempdir().unwrap();
    let code = run(&["scan", &path_arg(dir.path())]).unwrap();
    assert_eq!(code, ExitCode::NoDuplicates);
}

#[test]
fn test_scan_json_output() {
    let dir = tree(&[("x.bin", &[1u8; 300]), ("y.bin", &[1u8; 300])]);
    let code = run(&["scan", &path_arg(dir.path()), "--output", "json", "-j", "2"]).unwrap();
    assert_eq!(code, ExitCode::Success);
}

#[test]
fn test_min_size_filters_small_duplicates() {
    let dir = tree(&[("a.txt", b"tiny"), ("b.txt", b"tiny")]);
    let code = run(&["scan", &path_arg(dir.path()), "--min-size", "1KB"]).unwrap();
    assert_eq!(code, ExitCode::NoDuplicates);
}

#[test]
fn test_scan_missing_directory_fails() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");
    let err = run(&["scan", &path_arg(&missing)]).unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
}

#[test]
fn test_explicit_bad_config_fails() {
    let dir = tree(&[("config.toml", b"[retry]\nmultiplier = 0.0\n")]);
    let config = dir.path().join("config.toml");
    let err = run(&[
        "--config",
        &path_arg(&config),
        "scan",
        &path_arg(dir.path()),
    ])
    .unwrap_err();
    assert!(format!("{err:#}").contains("Failed to load config"));
}

#[test]
fn test_algorithms_subcommand() {
    assert_eq!(run(&["algorithms"]).unwrap(), ExitCode::Success);
}

#[test]
fn test_unknown_algorithm_is_rejected_by_parser() {
    let result = Cli::try_parse_from(["drivedupe", "scan", ".", "--algorithm", "sha265"]);
    assert!(result.is_err());
}
