//! Lifecycle gating, teardown, deletion, and the project registry.

use crate::prelude::*;
use cw_engine::{CreateStatus, Engine, EngineError, Lifecycle};
use serde_json::json;
use tempfile::tempdir;

#[test]
fn detach_without_explicit_sync_still_persists_stages() {
    let root = tempdir().unwrap();
    let (mut engine, _) = Engine::create("p", options(root.path())).unwrap();

    engine
        .stage_update("users", payload(json!({"n": "Alice"})))
        .unwrap();
    engine.detach().unwrap();

    let on_disk = read_chunk(&root.path().join("p/chunks/users.json"));
    assert_eq!(on_disk, payload(json!({"n": "Alice"})));
}

#[test]
fn every_data_operation_is_gated_after_detach() {
    let root = tempdir().unwrap();
    let (mut engine, _) = Engine::create("p", options(root.path())).unwrap();
    engine.detach().unwrap();
    assert_eq!(engine.lifecycle(), Lifecycle::Detached);

    assert!(matches!(
        engine.stage_update("x", payload(json!({}))),
        Err(EngineError::Inactive)
    ));
    assert!(matches!(engine.force_sync(), Err(EngineError::Inactive)));
    assert!(matches!(engine.fetch_chunk("x"), Err(EngineError::Inactive)));
    assert!(matches!(
        engine.create_checkpoint("c", "", None),
        Err(EngineError::Inactive)
    ));
    assert!(matches!(
        engine.restore_checkpoint("whatever.zip"),
        Err(EngineError::Inactive)
    ));
    assert!(matches!(
        engine.delete_project(true),
        Err(EngineError::Inactive)
    ));
}

#[test]
fn unconfirmed_delete_is_a_no_op() {
    let root = tempdir().unwrap();
    let (mut engine, _) = Engine::create("p", options(root.path())).unwrap();

    assert!(matches!(
        engine.delete_project(false),
        Err(EngineError::ConfirmationRequired)
    ));
    assert!(root.path().join("p").is_dir());
    assert_eq!(engine.lifecycle(), Lifecycle::Active);
}

#[test]
fn confirmed_delete_wipes_the_project() {
    let root = tempdir().unwrap();
    let (mut engine, _) = Engine::create("p", options(root.path())).unwrap();
    engine.stage_update("k", payload(json!({"v": 1}))).unwrap();

    engine.delete_project(true).unwrap();

    assert_eq!(engine.lifecycle(), Lifecycle::Deleted);
    assert!(!root.path().join("p").exists());
    assert!(Engine::list_projects(root.path()).unwrap().is_empty());
}

#[test]
fn create_collision_appends_smallest_free_suffix() {
    let root = tempdir().unwrap();
    let (mut a, _) = Engine::create("notes", options(root.path())).unwrap();
    a.detach().unwrap();
    let (mut b, status) = Engine::create("notes", options(root.path())).unwrap();
    assert_eq!(status, CreateStatus::Renamed("notes_1".into()));
    b.detach().unwrap();

    // Freeing the first suffix makes it the smallest available again
    let mut c = Engine::open("notes_1", options(root.path())).unwrap();
    c.delete_project(true).unwrap();

    let (_d, status) = Engine::create("notes", options(root.path())).unwrap();
    assert_eq!(status, CreateStatus::Renamed("notes_1".into()));
}

#[test]
fn registry_lists_projects_under_the_root() {
    let root = tempdir().unwrap();
    let (mut a, _) = Engine::create("alpha", options(root.path())).unwrap();
    a.detach().unwrap();
    let (mut b, _) = Engine::create("beta", options(root.path())).unwrap();
    b.detach().unwrap();

    assert_eq!(
        Engine::list_projects(root.path()).unwrap(),
        vec!["alpha", "beta"]
    );
    assert!(matches!(
        Engine::open("gamma", options(root.path())),
        Err(EngineError::NotFound { .. })
    ));
}

#[test]
fn health_report_is_available_after_detach() {
    let root = tempdir().unwrap();
    let (mut engine, _) = Engine::create("p", options(root.path())).unwrap();
    engine.stage_update("k", payload(json!({"v": 1}))).unwrap();
    engine.force_sync().unwrap();
    engine.detach().unwrap();

    let report = engine.health_report();
    assert!(!report.active);
    assert_eq!(report.project_id, "p");
    assert_eq!(report.shards, 1);
    assert!(!report.dirty_buffer);
}
