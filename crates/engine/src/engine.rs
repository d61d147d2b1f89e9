// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The project engine: lifecycle, staging, flushing, checkpoints.
//!
//! One engine owns one project directory. A single mutex serializes the
//! staging buffer, lifecycle state, and all disk I/O; a background worker
//! thread sleeps until the buffer's debounce deadline and flushes it
//! through the same mutex. Every public data operation passes the
//! lifecycle gate first: anything but `Active` is rejected with no side
//! effects.

use crate::buffer::StagingBuffer;
use crate::error::EngineError;
use crate::options::EngineOptions;
use cw_core::{shielded, validate_chunk_name, validate_project_id, Clock, EngineHooks};
use cw_storage::{
    CheckpointInfo, CheckpointStore, ChunkPayload, LockState, ProjectLayout, ProjectLock,
    ShardError, ShardStore, VersionMeta,
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// Lifecycle of an engine instance.
///
/// `Detached` and `Deleted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Detached,
    Deleted,
}

/// How the factory satisfied a `create` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateStatus {
    /// The requested project id was free.
    Created,
    /// The id was taken; the project was created under the suffixed id.
    Renamed(String),
}

impl std::fmt::Display for CreateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreateStatus::Created => f.write_str("created"),
            CreateStatus::Renamed(id) => write!(f, "renamed:{id}"),
        }
    }
}

/// Snapshot of engine and on-disk health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub active: bool,
    pub project_id: String,
    pub root: PathBuf,
    pub shards: usize,
    pub orphans: usize,
    pub dirty_buffer: bool,
    pub storage_usage_percent: f64,
}

struct Inner {
    lifecycle: Lifecycle,
    buffer: StagingBuffer,
    shutdown: bool,
}

struct Shared {
    layout: ProjectLayout,
    store: ShardStore,
    checkpoints: CheckpointStore,
    lock: ProjectLock,
    hooks: Arc<dyn EngineHooks>,
    clock: Arc<dyn Clock>,
    retention: usize,
    inner: Mutex<Inner>,
    wake: Condvar,
}

impl Shared {
    /// Persist every staged entry. Successfully written chunks leave the
    /// buffer; failed ones stay staged for a later retry. `on_sync` fires
    /// once when everything was written and at least one shard changed.
    fn flush(&self, inner: &mut Inner) -> Result<(), EngineError> {
        if inner.buffer.is_empty() {
            return Ok(());
        }
        let batch = inner.buffer.begin_flush();
        let mut wrote = 0usize;
        let mut first_err: Option<EngineError> = None;

        for (name, payload) in batch {
            match self.store.persist(&name, &payload) {
                Ok(()) => {
                    wrote += 1;
                    shielded(|| self.hooks.on_status(&format!("persisted chunk {name}")));
                }
                Err(e) => {
                    let err: EngineError = e.into();
                    shielded(|| self.hooks.on_fault(&err));
                    inner.buffer.restore(name, payload);
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }
        inner.buffer.end_flush();

        match first_err {
            None => {
                if wrote > 0 {
                    shielded(|| self.hooks.on_sync());
                }
                Ok(())
            }
            Some(err) => Err(err),
        }
    }
}

/// Debounce worker: sleeps until the buffer deadline, then flushes.
fn run_worker(shared: &Shared) {
    let mut inner = shared.inner.lock();
    loop {
        if inner.shutdown {
            return;
        }
        let now = shared.clock.now();
        if inner.buffer.due(now) {
            let _ = shared.flush(&mut inner);
            continue;
        }
        match inner.buffer.deadline() {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(now);
                let _ = shared.wake.wait_for(&mut inner, timeout);
            }
            None => shared.wake.wait(&mut inner),
        }
    }
}

/// Single-writer engine bound to one project directory.
pub struct Engine {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Engine {
    /// Create a new project and return an active engine for it.
    ///
    /// If `project_id` is taken, the smallest free `_N` suffix is used and
    /// reported through [`CreateStatus::Renamed`].
    pub fn create(
        project_id: &str,
        options: EngineOptions,
    ) -> Result<(Self, CreateStatus), EngineError> {
        validate_project_id(project_id)?;
        let (layout, status) = reserve_layout(&options.root, project_id)?;
        layout.ensure().map_err(|e| EngineError::IoFault {
            op: "create_layout",
            path: layout.project_dir().to_path_buf(),
            source: e,
        })?;

        let lock = ProjectLock::new(layout.lock_path(), options.probe.clone());
        match lock.try_acquire()? {
            LockState::Acquired => {}
            LockState::HeldByLive(pid) => return Err(EngineError::Locked { pid }),
            LockState::Stale(pid) => {
                warn!(pid, "stale lock in fresh project directory, reclaiming");
                lock.reclaim_and_acquire()?;
            }
        }

        let meta = VersionMeta::new(layout.project_id(), options.clock.utc_now());
        if let Err(e) = meta.save(&layout.version_path()) {
            let _ = lock.release();
            return Err(e.into());
        }

        let engine = Self::start(layout, lock, options);
        info!(
            project_id = engine.shared.layout.project_id(),
            status = %status,
            "project created",
        );
        let hooks = Arc::clone(&engine.shared.hooks);
        let message = format!("project {} created", engine.shared.layout.project_id());
        shielded(|| hooks.on_status(&message));
        Ok((engine, status))
    }

    /// Open an existing project.
    ///
    /// A stale lock is reclaimed; a lock held by a live process yields
    /// [`EngineError::Locked`] and no engine. Orphaned tmp files from an
    /// interrupted writer are removed before the engine goes active.
    pub fn open(project_id: &str, options: EngineOptions) -> Result<Self, EngineError> {
        let layout = ProjectLayout::resolve(&options.root, project_id)?;
        if !layout.exists() {
            return Err(EngineError::NotFound {
                project_id: project_id.to_string(),
                root: options.root.clone(),
            });
        }

        let lock = ProjectLock::new(layout.lock_path(), options.probe.clone());
        match lock.try_acquire()? {
            LockState::Acquired => {}
            LockState::HeldByLive(pid) => return Err(EngineError::Locked { pid }),
            LockState::Stale(pid) => {
                warn!(pid, project_id, "reclaiming stale project lock");
                lock.reclaim_and_acquire()?;
            }
        }

        // From here the lock is ours; give it back if the rest of the
        // startup sequence fails.
        let startup = (|| -> Result<usize, EngineError> {
            layout.ensure().map_err(|e| EngineError::IoFault {
                op: "ensure_layout",
                path: layout.project_dir().to_path_buf(),
                source: e,
            })?;
            if VersionMeta::load(&layout.version_path())?.is_none() {
                VersionMeta::new(project_id, options.clock.utc_now())
                    .save(&layout.version_path())?;
            }
            let store = ShardStore::new(layout.clone());
            Ok(store.sweep_orphans()?)
        })();
        let removed = match startup {
            Ok(removed) => removed,
            Err(e) => {
                let _ = lock.release();
                return Err(e);
            }
        };

        let engine = Self::start(layout, lock, options);
        if removed > 0 {
            let hooks = Arc::clone(&engine.shared.hooks);
            let message = format!("removed {removed} orphaned tmp files");
            shielded(|| hooks.on_status(&message));
        }
        info!(project_id, "project opened");
        Ok(engine)
    }

    /// Names of all projects under `root`.
    ///
    /// A directory counts as a project if it carries a `version.json`, or
    /// (for projects from older engines) a `chunks/` directory.
    pub fn list_projects(root: &Path) -> Result<Vec<String>, EngineError> {
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(root).map_err(|e| EngineError::IoFault {
            op: "read_dir",
            path: root.to_path_buf(),
            source: e,
        })?;

        let mut projects = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if path.join("version.json").is_file() || path.join("chunks").is_dir() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    projects.push(name.to_string());
                }
            }
        }
        projects.sort();
        Ok(projects)
    }

    fn start(layout: ProjectLayout, lock: ProjectLock, options: EngineOptions) -> Self {
        let shared = Arc::new(Shared {
            store: ShardStore::new(layout.clone()),
            checkpoints: CheckpointStore::new(layout.clone()),
            layout,
            lock,
            hooks: options.hooks,
            clock: options.clock,
            retention: options.checkpoint_retention.max(1),
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle::Active,
                buffer: StagingBuffer::new(options.debounce),
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            match thread::Builder::new()
                .name("chunkwell-flush".into())
                .spawn(move || run_worker(&shared))
            {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!(error = %e, "debounce worker failed to start; only explicit sync will flush");
                    None
                }
            }
        };

        Self { shared, worker }
    }

    /// Lifecycle gate: every data operation enters through here.
    fn guard(&self) -> Result<MutexGuard<'_, Inner>, EngineError> {
        let inner = self.shared.inner.lock();
        if inner.lifecycle != Lifecycle::Active {
            return Err(EngineError::Inactive);
        }
        Ok(inner)
    }

    pub fn project_id(&self) -> &str {
        self.shared.layout.project_id()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.inner.lock().lifecycle
    }

    /// Stage `payload` as the pending value of chunk `name`.
    ///
    /// The write happens after the debounce window passes with no further
    /// stages, or on the next [`force_sync`](Engine::force_sync).
    pub fn stage_update(&self, name: &str, payload: ChunkPayload) -> Result<(), EngineError> {
        validate_chunk_name(name)?;
        let mut inner = self.guard()?;
        inner.buffer.stage(name, payload, self.shared.clock.now());
        drop(inner);
        self.shared.wake.notify_all();
        shielded(|| self.shared.hooks.on_status(&format!("staged chunk {name}")));
        Ok(())
    }

    /// Synchronously persist every staged chunk.
    pub fn force_sync(&self) -> Result<(), EngineError> {
        let mut inner = self.guard()?;
        self.shared.flush(&mut inner)
    }

    /// Read the committed value of chunk `name`.
    ///
    /// Missing chunks read as the empty object. A corrupted primary heals
    /// from its backup; when both copies are unreadable the fault goes to
    /// the sink and the empty object is returned so callers can continue.
    pub fn fetch_chunk(&self, name: &str) -> Result<ChunkPayload, EngineError> {
        validate_chunk_name(name)?;
        let _inner = self.guard()?;
        match self.shared.store.fetch(name) {
            Ok(payload) => Ok(payload),
            Err(ShardError::Unrecoverable { name }) => {
                let err = EngineError::CorruptionUnrecoverable { name };
                shielded(|| self.shared.hooks.on_fault(&err));
                Ok(ChunkPayload::new())
            }
            Err(e) => {
                let err: EngineError = e.into();
                shielded(|| self.shared.hooks.on_fault(&err));
                Err(err)
            }
        }
    }

    /// Archive the current shard state.
    ///
    /// The buffer is flushed first so the archive reflects every stage
    /// issued before this call. `retention` defaults to the engine option.
    pub fn create_checkpoint(
        &self,
        label: &str,
        notes: &str,
        retention: Option<usize>,
    ) -> Result<String, EngineError> {
        let mut inner = self.guard()?;
        self.shared.flush(&mut inner)?;
        let retention = retention.unwrap_or(self.shared.retention).max(1);
        match self
            .shared
            .checkpoints
            .create(label, notes, retention, self.shared.clock.utc_now())
        {
            Ok(name) => {
                shielded(|| self.shared.hooks.on_status(&format!("checkpoint {name} created")));
                Ok(name)
            }
            Err(e) => {
                let err: EngineError = e.into();
                shielded(|| self.shared.hooks.on_fault(&err));
                Err(err)
            }
        }
    }

    /// Destructively replace the shard state with an archive's contents.
    ///
    /// On an extraction fault the project may be partially restored; the
    /// engine stays active so the caller can retry or restore another
    /// archive.
    pub fn restore_checkpoint(&self, name: &str) -> Result<(), EngineError> {
        let mut inner = self.guard()?;
        self.shared.flush(&mut inner)?;
        match self.shared.checkpoints.restore(name) {
            Ok(manifest) => {
                let message = format!(
                    "checkpoint {name} restored ({} shards)",
                    manifest.shard_names.len()
                );
                shielded(|| self.shared.hooks.on_status(&message));
                Ok(())
            }
            Err(e) => {
                let err: EngineError = e.into();
                shielded(|| self.shared.hooks.on_fault(&err));
                Err(err)
            }
        }
    }

    /// Archives available for this project, newest first.
    pub fn list_checkpoints(&self) -> Result<Vec<CheckpointInfo>, EngineError> {
        let _inner = self.guard()?;
        Ok(self.shared.checkpoints.list()?)
    }

    /// Current engine and on-disk health. Never mutates state.
    pub fn health_report(&self) -> HealthReport {
        let inner = self.shared.inner.lock();
        HealthReport {
            active: inner.lifecycle == Lifecycle::Active,
            project_id: self.shared.layout.project_id().to_string(),
            root: self.shared.layout.root().to_path_buf(),
            shards: self.shared.store.shard_count(),
            orphans: self.shared.store.count_orphans(),
            dirty_buffer: inner.buffer.is_dirty(),
            storage_usage_percent: disk_usage_percent(self.shared.layout.project_dir()),
        }
    }

    /// Tear the engine down: flush, stop the worker, release the lock.
    ///
    /// Idempotent; a second call is a no-op. The engine is permanently
    /// detached afterwards.
    pub fn detach(&mut self) -> Result<(), EngineError> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.lifecycle != Lifecycle::Active {
                return Ok(());
            }
            if let Err(e) = self.shared.flush(&mut inner) {
                warn!(error = %e, "flush during detach failed");
            }
            inner.lifecycle = Lifecycle::Detached;
            inner.shutdown = true;
        }
        self.stop_worker();
        if let Err(e) = self.shared.lock.release() {
            warn!(error = %e, "lock release during detach failed");
        }
        shielded(|| self.shared.hooks.on_status("engine detached"));
        info!(project_id = self.shared.layout.project_id(), "engine detached");
        Ok(())
    }

    /// Permanently delete the project directory.
    ///
    /// Requires `confirmed = true`; otherwise nothing happens and
    /// [`EngineError::ConfirmationRequired`] is returned.
    pub fn delete_project(&mut self, confirmed: bool) -> Result<(), EngineError> {
        if !confirmed {
            return Err(EngineError::ConfirmationRequired);
        }
        {
            let mut inner = self.shared.inner.lock();
            if inner.lifecycle != Lifecycle::Active {
                return Err(EngineError::Inactive);
            }
            if let Err(e) = self.shared.flush(&mut inner) {
                warn!(error = %e, "flush during delete failed");
            }
            inner.lifecycle = Lifecycle::Deleted;
            inner.shutdown = true;
        }
        self.stop_worker();
        if let Err(e) = self.shared.lock.release() {
            warn!(error = %e, "lock release during delete failed");
        }
        fs::remove_dir_all(self.shared.layout.project_dir()).map_err(|e| EngineError::IoFault {
            op: "remove_project",
            path: self.shared.layout.project_dir().to_path_buf(),
            source: e,
        })?;
        shielded(|| self.shared.hooks.on_status("project deleted"));
        info!(project_id = self.shared.layout.project_id(), "project deleted");
        Ok(())
    }

    fn stop_worker(&mut self) {
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.lifecycle == Lifecycle::Active {
                let _ = self.shared.flush(&mut inner);
                inner.lifecycle = Lifecycle::Detached;
            }
            inner.shutdown = true;
        }
        self.stop_worker();
        let _ = self.shared.lock.release();
    }
}

/// Find a free project directory, suffixing `_N` when the id is taken.
fn reserve_layout(
    root: &Path,
    project_id: &str,
) -> Result<(ProjectLayout, CreateStatus), EngineError> {
    let layout = ProjectLayout::resolve(root, project_id)?;
    if !layout.exists() {
        return Ok((layout, CreateStatus::Created));
    }
    let mut n = 1u32;
    loop {
        let candidate = format!("{project_id}_{n}");
        let layout = ProjectLayout::resolve(root, &candidate)?;
        if !layout.exists() {
            return Ok((layout, CreateStatus::Renamed(candidate)));
        }
        n += 1;
    }
}

#[cfg(unix)]
fn disk_usage_percent(path: &Path) -> f64 {
    match nix::sys::statvfs::statvfs(path) {
        Ok(stat) => {
            let fragment = stat.fragment_size() as f64;
            let total = stat.blocks() as f64 * fragment;
            if total <= 0.0 {
                return 0.0;
            }
            let available = stat.blocks_available() as f64 * fragment;
            ((total - available) / total * 100.0).clamp(0.0, 100.0)
        }
        Err(_) => 0.0,
    }
}

#[cfg(not(unix))]
fn disk_usage_percent(_path: &Path) -> f64 {
    0.0
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
