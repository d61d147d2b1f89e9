//! Write durability, self-healing reads, and crash-leftover cleanup.

use crate::prelude::*;
use cw_engine::Engine;
use serde_json::json;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn staged_chunk_survives_sync_and_detach() {
    let root = tempdir().unwrap();
    let (mut engine, _) = Engine::create("p", options(root.path())).unwrap();

    engine.stage_update("x", payload(json!({"a": 1}))).unwrap();
    engine.force_sync().unwrap();
    engine.detach().unwrap();

    let on_disk = read_chunk(&root.path().join("p/chunks/x.json"));
    assert_eq!(on_disk, payload(json!({"a": 1})));
    assert!(!root.path().join("p/.lock").exists());
}

#[test]
fn orphaned_tmp_files_are_swept_on_open() {
    let root = tempdir().unwrap();
    let (mut engine, _) = Engine::create("p", options(root.path())).unwrap();
    engine.detach().unwrap();

    let orphan = root.path().join("p/chunks/shards.tmp");
    std::fs::write(&orphan, b"interrupted write").unwrap();

    let engine = Engine::open("p", options(root.path())).unwrap();
    assert!(!orphan.exists());
    assert_eq!(engine.health_report().orphans, 0);
}

#[test]
fn corrupted_primary_recovers_last_committed_value() {
    let root = tempdir().unwrap();
    let (engine, _) = Engine::create("p", options(root.path())).unwrap();

    engine.stage_update("k", payload(json!({"v": 1}))).unwrap();
    engine.force_sync().unwrap();
    engine.stage_update("k", payload(json!({"v": 2}))).unwrap();
    engine.force_sync().unwrap();

    // Truncate the primary to zero bytes
    let primary = root.path().join("p/chunks/k.json");
    std::fs::write(&primary, b"").unwrap();

    // The backup holds the previously committed value
    assert_eq!(engine.fetch_chunk("k").unwrap(), payload(json!({"v": 1})));
    // The primary is healed in place for the next read
    assert_eq!(read_chunk(&primary), payload(json!({"v": 1})));
    assert_eq!(engine.fetch_chunk("k").unwrap(), payload(json!({"v": 1})));
}

#[test]
fn write_read_round_trip_for_varied_payloads() {
    let root = tempdir().unwrap();
    let (engine, _) = Engine::create("p", options(root.path())).unwrap();

    let cases = [
        json!({}),
        json!({"s": "text", "n": 42, "f": 1.5}),
        json!({"nested": {"deep": {"list": [1, "two", null, {"k": false}]}}}),
        json!({"unicode": "héllo wörld", "empty_list": []}),
    ];
    for (i, case) in cases.iter().enumerate() {
        let name = format!("chunk{i}");
        engine.stage_update(&name, payload(case.clone())).unwrap();
        engine.force_sync().unwrap();
        assert_eq!(engine.fetch_chunk(&name).unwrap(), payload(case.clone()));
    }
}

#[test]
fn debounce_window_collapses_stages_and_flushes_once() {
    let root = tempdir().unwrap();
    let (engine, _) = Engine::create("p", options(root.path())).unwrap();

    for v in 0..5 {
        engine.stage_update("k", payload(json!({"v": v}))).unwrap();
    }

    let primary = root.path().join("p/chunks/k.json");
    assert!(wait_until(Duration::from_secs(2), || primary.is_file()));
    assert_eq!(read_chunk(&primary), payload(json!({"v": 4})));
    assert_eq!(engine.health_report().orphans, 0);
    assert!(!engine.health_report().dirty_buffer);
}

#[test]
fn no_tmp_files_at_rest_after_any_operation() {
    let root = tempdir().unwrap();
    let (mut engine, _) = Engine::create("p", options(root.path())).unwrap();

    engine.stage_update("a", payload(json!({"v": 1}))).unwrap();
    engine.force_sync().unwrap();
    engine.stage_update("a", payload(json!({"v": 2}))).unwrap();
    engine.force_sync().unwrap();
    engine.create_checkpoint("c", "", None).unwrap();
    assert_eq!(engine.health_report().orphans, 0);

    engine.detach().unwrap();
    let leftovers: Vec<_> = walk(root.path())
        .into_iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("tmp"))
        .collect();
    assert!(leftovers.is_empty(), "found leftovers: {leftovers:?}");
}

fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            files.extend(walk(&path));
        } else {
            files.push(path);
        }
    }
    files
}
