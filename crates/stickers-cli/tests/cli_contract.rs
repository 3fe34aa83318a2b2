#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const ID_A: &str = "4830e258138fca961ab2151d9596755c";
const ID_B: &str = "b1d5e3a3e3e4b6a1f0c5d8a2b7e9c4f1";
const KEY: &str = "9a40d3e5e3bd4bd9e5b0a1ac4d8b5ef5bb3a2b3d3f77d9c9d0c1f1e1d2c3b4a5";

/// Nothing listens on port 1, so every fetch fails fast.
const UNREACHABLE_API: &str = "http://127.0.0.1:1";

fn stickers() -> Command {
    let mut cmd = Command::cargo_bin("stickers").unwrap();
    cmd.env("CI", "1")
        .env_remove("STICKERS_API_URL")
        .env_remove("STICKERS_CONCURRENCY")
        .env_remove("STICKERS_MAX_RETRIES")
        .env_remove("RUST_LOG");
    cmd
}

fn write_input(dir: &Path) -> std::path::PathBuf {
    let input = dir.join("stickers.yml");
    fs::write(
        &input,
        format!(
            "{ID_A}:\n  id: {ID_A}\n  key: {KEY}\n  tags: [cats]\n{ID_B}:\n  id: {ID_B}\n  key: {KEY}\n"
        ),
    )
    .unwrap();
    input
}

fn seed_cache(cache_dir: &Path, id: &str) {
    fs::create_dir_all(cache_dir).unwrap();
    let partial = json!({
        "manifest": {"title": format!("Pack {id}"), "author": "a", "cover": {"id": 0}},
        "meta": {"id": id, "key": KEY}
    });
    fs::write(
        cache_dir.join(format!("{id}.json")),
        serde_json::to_vec(&partial).unwrap(),
    )
    .unwrap();
}

#[test]
fn compile_from_warm_cache_needs_no_network() {
    let dir = tempdir().unwrap();
    let input = write_input(dir.path());
    let cache_dir = dir.path().join("cache");
    seed_cache(&cache_dir, ID_A);
    seed_cache(&cache_dir, ID_B);
    let output = dir.path().join("dist").join("partials.json");

    stickers()
        .arg("compile")
        .arg("-i")
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .arg("--cache-dir")
        .arg(&cache_dir)
        .args(["--api-url", UNREACHABLE_API])
        .assert()
        .success()
        .stderr(predicate::str::contains("Cache hit rate: 100%"));

    let artifact: Value = serde_json::from_slice(&fs::read(&output).unwrap()).unwrap();
    let ids: Vec<&str> = artifact
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["meta"]["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, [ID_A, ID_B]);
    assert_eq!(artifact[0]["meta"]["tags"], json!(["cats"]));
}

#[test]
fn compile_with_unreachable_api_is_degraded() {
    let dir = tempdir().unwrap();
    let input = write_input(dir.path());
    let cache_dir = dir.path().join("cache");
    seed_cache(&cache_dir, ID_B);
    let output = dir.path().join("partials.json");

    stickers()
        .arg("compile")
        .arg("-i")
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .arg("--cache-dir")
        .arg(&cache_dir)
        .args(["--api-url", UNREACHABLE_API, "--retries", "0"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains(ID_A));

    let artifact: Value = serde_json::from_slice(&fs::read(&output).unwrap()).unwrap();
    assert_eq!(artifact.as_array().unwrap().len(), 1);
    assert_eq!(artifact[0]["meta"]["id"], ID_B);
}

#[test]
fn compile_rejects_non_yaml_input() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("stickers.json");
    fs::write(&input, "{}").unwrap();
    let output = dir.path().join("partials.json");

    stickers()
        .arg("compile")
        .arg("-i")
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .arg("--cache-dir")
        .arg(dir.path().join("cache"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("YAML"));

    assert!(!output.exists());
}

#[test]
fn compile_requires_input_and_output() {
    stickers().arg("compile").assert().failure();
}

#[test]
fn validate_accepts_well_formed_input() {
    let dir = tempdir().unwrap();
    let input = write_input(dir.path());

    stickers()
        .args(["validate", "-i"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 packs, OK"));
}

#[test]
fn validate_reports_schema_problems() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("stickers.yml");
    fs::write(&input, format!("{ID_A}:\n  id: {ID_A}\n  key: short\n")).unwrap();

    stickers()
        .args(["validate", "-i"])
        .arg(&input)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("problem(s) found"));
}

#[test]
fn validate_enforces_deletion_limit() {
    let dir = tempdir().unwrap();
    let input = write_input(dir.path());
    let baseline = dir.path().join("published.json");
    let published: Vec<Value> = (0..10).map(|i| json!({"index": i})).collect();
    fs::write(&baseline, serde_json::to_vec(&published).unwrap()).unwrap();

    stickers()
        .args(["validate", "-i"])
        .arg(&input)
        .arg("--baseline")
        .arg(&baseline)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("delete 8 sticker packs"));

    stickers()
        .args(["validate", "-i"])
        .arg(&input)
        .arg("--baseline")
        .arg(&baseline)
        .args(["--max-deletions", "8"])
        .assert()
        .success();
}

#[test]
fn reverse_writes_entries_in_reverse_order() {
    let dir = tempdir().unwrap();
    let input = write_input(dir.path());
    let output = dir.path().join("reversed.yml");

    stickers()
        .args(["reverse", "-i"])
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();

    let text = fs::read_to_string(&output).unwrap();
    let a = text.find(ID_A).unwrap();
    let b = text.find(ID_B).unwrap();
    assert!(b < a, "{text}");
}
