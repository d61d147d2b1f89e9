//! Exclusive ownership: PID locks, staleness, and reclamation.

use crate::prelude::*;
use cw_engine::{Engine, EngineError};
use serde_json::json;
use tempfile::tempdir;

#[test]
fn crashed_owner_lock_is_reclaimed_when_process_is_dead() {
    let root = tempdir().unwrap();
    let (mut engine, _) = Engine::create("q", options(root.path())).unwrap();
    engine.detach().unwrap();

    // A previous owner crashed without releasing
    std::fs::write(root.path().join("q/.lock"), b"1000").unwrap();

    let engine = Engine::open("q", options(root.path()).with_probe(probe_dead())).unwrap();
    assert_eq!(
        std::fs::read_to_string(root.path().join("q/.lock"))
            .unwrap()
            .trim()
            .parse::<u32>()
            .unwrap(),
        std::process::id()
    );
    drop(engine);
}

#[test]
fn live_owner_lock_refuses_open() {
    let root = tempdir().unwrap();
    let (mut engine, _) = Engine::create("q", options(root.path())).unwrap();
    engine.detach().unwrap();

    std::fs::write(root.path().join("q/.lock"), b"1000").unwrap();

    match Engine::open("q", options(root.path()).with_probe(probe_alive(&[1000]))) {
        Err(EngineError::Locked { pid }) => assert_eq!(pid, 1000),
        Err(other) => panic!("expected Locked, got {other:?}"),
        Ok(_) => panic!("expected Locked, got an engine"),
    }
    // The foreign lock is untouched
    assert_eq!(
        std::fs::read_to_string(root.path().join("q/.lock")).unwrap(),
        "1000"
    );
}

#[test]
fn two_engines_cannot_both_hold_one_project() {
    let root = tempdir().unwrap();
    let (engine, _) = Engine::create("shared", options(root.path())).unwrap();

    // The default probe consults the real process table; our own PID is alive
    match Engine::open("shared", options(root.path())) {
        Err(EngineError::Locked { pid }) => assert_eq!(pid, std::process::id()),
        Err(other) => panic!("expected Locked, got {other:?}"),
        Ok(_) => panic!("expected Locked, got an engine"),
    }

    // Reads and writes on the first engine are unaffected
    engine.stage_update("k", payload(json!({"v": 1}))).unwrap();
    engine.force_sync().unwrap();
}

#[test]
fn lock_holds_owning_pid_while_active() {
    let root = tempdir().unwrap();
    let (mut engine, _) = Engine::create("q", options(root.path())).unwrap();

    let lock = std::fs::read_to_string(root.path().join("q/.lock")).unwrap();
    assert_eq!(lock.trim().parse::<u32>().unwrap(), std::process::id());
    assert!(engine.health_report().active);

    engine.detach().unwrap();
    assert!(!root.path().join("q/.lock").exists());
}

#[test]
fn reopen_after_clean_detach_acquires_fresh_lock() {
    let root = tempdir().unwrap();
    let (mut engine, _) = Engine::create("q", options(root.path())).unwrap();
    engine.detach().unwrap();

    let mut engine = Engine::open("q", options(root.path())).unwrap();
    assert!(root.path().join("q/.lock").exists());
    engine.detach().unwrap();
    assert!(!root.path().join("q/.lock").exists());
}
