//! Checkpoint creation, retention, and destructive restore.

use crate::prelude::*;
use cw_engine::Engine;
use serde_json::json;
use std::fs::File;
use std::io::Read;
use tempfile::tempdir;
use zip::ZipArchive;

#[test]
fn retention_two_keeps_the_two_most_recent_of_three() {
    let root = tempdir().unwrap();
    let (engine, _) = Engine::create("p", options(root.path())).unwrap();
    engine.stage_update("k", payload(json!({"v": 1}))).unwrap();

    let mut names = Vec::new();
    for _ in 0..3 {
        names.push(engine.create_checkpoint("a", "", Some(2)).unwrap());
        // Distinct mtimes so retention ordering is deterministic
        std::thread::sleep(std::time::Duration::from_millis(25));
    }

    let on_disk: Vec<String> = std::fs::read_dir(root.path().join("p/checkpoints"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".zip"))
        .collect();
    assert_eq!(on_disk.len(), 2);
    assert!(on_disk.contains(&names[1]));
    assert!(on_disk.contains(&names[2]));
    assert!(!on_disk.contains(&names[0]));
}

#[test]
fn create_then_restore_is_idempotent() {
    let root = tempdir().unwrap();
    let (engine, _) = Engine::create("p", options(root.path())).unwrap();
    engine.stage_update("a", payload(json!({"v": 1}))).unwrap();
    engine
        .stage_update("b", payload(json!({"list": [1, 2, 3]})))
        .unwrap();
    engine.force_sync().unwrap();

    let name = engine.create_checkpoint("snap", "", None).unwrap();
    engine.restore_checkpoint(&name).unwrap();

    assert_eq!(engine.fetch_chunk("a").unwrap(), payload(json!({"v": 1})));
    assert_eq!(
        engine.fetch_chunk("b").unwrap(),
        payload(json!({"list": [1, 2, 3]}))
    );
    assert_eq!(engine.health_report().shards, 2);
}

#[test]
fn restore_drops_shards_created_after_the_checkpoint() {
    let root = tempdir().unwrap();
    let (engine, _) = Engine::create("p", options(root.path())).unwrap();
    engine.stage_update("keep", payload(json!({"v": 1}))).unwrap();
    let name = engine.create_checkpoint("base", "", None).unwrap();

    engine.stage_update("late", payload(json!({"v": 2}))).unwrap();
    engine.force_sync().unwrap();

    engine.restore_checkpoint(&name).unwrap();
    assert!(engine.fetch_chunk("late").unwrap().is_empty());
    assert_eq!(engine.fetch_chunk("keep").unwrap(), payload(json!({"v": 1})));
}

#[test]
fn archive_layout_mirrors_project_and_carries_manifest() {
    let root = tempdir().unwrap();
    let (engine, _) = Engine::create("p", options(root.path())).unwrap();
    engine.stage_update("users", payload(json!({"n": 1}))).unwrap();
    engine.force_sync().unwrap();
    // Second commit so a backup exists
    engine.stage_update("users", payload(json!({"n": 2}))).unwrap();
    engine.force_sync().unwrap();

    let name = engine.create_checkpoint("layout", "check", None).unwrap();

    let path = root.path().join("p/checkpoints").join(&name);
    let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
    let entry_names: Vec<String> = (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|e| e.name().to_string()))
        .collect();
    assert!(entry_names.contains(&"_manifest.json".to_string()));
    assert!(entry_names.contains(&"chunks/users.json".to_string()));
    assert!(entry_names.contains(&"chunks_bak/users.bak".to_string()));

    // Manifest shard names match the chunks/ entries exactly
    let mut raw = String::new();
    archive
        .by_name("_manifest.json")
        .unwrap()
        .read_to_string(&mut raw)
        .unwrap();
    let manifest: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(manifest["label"], "layout");
    assert_eq!(manifest["notes"], "check");
    let shard_names: Vec<String> = manifest["shard_names"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    let mut from_entries: Vec<String> = entry_names
        .iter()
        .filter_map(|n| n.strip_prefix("chunks/"))
        .filter_map(|n| n.strip_suffix(".json"))
        .map(str::to_string)
        .collect();
    from_entries.sort();
    assert_eq!(shard_names, from_entries);
}

#[test]
fn checkpoint_flushes_staged_entries_first() {
    let root = tempdir().unwrap();
    let (engine, _) = Engine::create("p", options(root.path())).unwrap();
    engine.stage_update("pending", payload(json!({"v": 9}))).unwrap();

    let name = engine.create_checkpoint("flush", "", None).unwrap();

    // Wipe the live state, then restore: the staged value must be in the archive
    engine.stage_update("pending", payload(json!({"v": 0}))).unwrap();
    engine.force_sync().unwrap();
    engine.restore_checkpoint(&name).unwrap();
    assert_eq!(
        engine.fetch_chunk("pending").unwrap(),
        payload(json!({"v": 9}))
    );
}

#[test]
fn listed_checkpoints_expose_label_timestamp_and_size() {
    let root = tempdir().unwrap();
    let (engine, _) = Engine::create("p", options(root.path())).unwrap();
    engine.stage_update("k", payload(json!({"v": 1}))).unwrap();
    let name = engine.create_checkpoint("visible", "", None).unwrap();

    let listed = engine.list_checkpoints().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, name);
    assert_eq!(listed[0].label, "visible");
    assert!(listed[0].bytes > 0);
}
