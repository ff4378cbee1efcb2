//! Runs the `writingway` binary against a throwaway project.
//!
//! Only the offline commands are exercised: the default embedder is the
//! hashing one, so indexing and search never touch the network.

use std::path::Path;
use std::process::{Command, Output};

fn writingway(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_writingway"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("WRITINGWAY_CONFIG")
        .output()
        .expect("failed to run writingway")
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("act1")).unwrap();
    std::fs::write(
        dir.path().join("act1/forest.md"),
        "Alice walked through the forest at dawn, listening for wolves.",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("act1/castle.md"),
        "Bob guarded the castle gate and refused Alice entry.",
    )
    .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "Theme: loyalty and betrayal.").unwrap();
    dir
}

#[test]
fn init_print_emits_parseable_config() {
    let dir = tempfile::tempdir().unwrap();
    let out = writingway(&dir.path().join("none.toml"), &["init", "--print"]);
    assert!(out.status.success());

    let text = String::from_utf8(out.stdout).unwrap();
    let parsed: toml::Value = toml::from_str(&text).unwrap();
    assert_eq!(parsed["default_provider"].as_str(), Some("openrouter"));
}

#[test]
fn init_writes_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let out = writingway(&path, &["init"]);
    assert!(out.status.success());
    assert!(path.exists());
}

#[test]
fn index_reports_every_file() {
    let dir = project();
    let out = writingway(
        &dir.path().join("none.toml"),
        &["index", dir.path().to_str().unwrap()],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let text = String::from_utf8(out.stdout).unwrap();
    assert!(text.contains("act1/castle.md"));
    assert!(text.contains("act1/forest.md"));
    assert!(text.contains("notes.txt"));
    assert!(text.contains("3 file(s)"));
}

#[test]
fn search_ranks_matching_scene_first() {
    let dir = project();
    let out = writingway(
        &dir.path().join("none.toml"),
        &[
            "search",
            "castle gate guarded by Bob",
            "--project",
            dir.path().to_str().unwrap(),
            "-k",
            "1",
            "--floor",
            "0.0",
        ],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let text = String::from_utf8(out.stdout).unwrap();
    assert!(text.contains("act1/castle.md"));
    assert!(!text.contains("act1/forest.md"));
}

#[test]
fn unknown_provider_fails_chat() {
    let dir = project();
    let out = writingway(
        &dir.path().join("none.toml"),
        &[
            "chat",
            "--project",
            dir.path().to_str().unwrap(),
            "--provider",
            "nonexistent",
            "-m",
            "hello",
        ],
    );
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("nonexistent"));
}
