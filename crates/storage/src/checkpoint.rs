// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Point-in-time checkpoint archives.
//!
//! A checkpoint is a zip of `chunks/` and `chunks_bak/` plus a
//! `_manifest.json` at the archive root, named
//! `checkpoint_<label>_<YYYYMMDD_HHMMSS>.zip` in UTC. Archives are written
//! to a `.tmp` sibling, fsynced, then renamed into `checkpoints/`, so a
//! crash never leaves a half-written archive under a final name.
//!
//! Restore is destructive and wipes the live shard directories before
//! extraction. The archive is opened and its manifest parsed *before*
//! anything is deleted, so an unreadable archive never costs data.

use crate::layout::ProjectLayout;
use chrono::{DateTime, Utc};
use cw_core::sanitize_label;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Manifest entry name at the zip root.
pub const MANIFEST_NAME: &str = "_manifest.json";

/// Checkpoint operation phases, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPhase {
    Create,
    List,
    Restore,
    Prune,
}

impl std::fmt::Display for CheckpointPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            CheckpointPhase::Create => "create",
            CheckpointPhase::List => "list",
            CheckpointPhase::Restore => "restore",
            CheckpointPhase::Prune => "prune",
        };
        f.write_str(phase)
    }
}

/// Errors from checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint {phase}: {op} failed for {path}: {source}")]
    Io {
        phase: CheckpointPhase,
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("checkpoint {phase}: archive error: {source}")]
    Archive {
        phase: CheckpointPhase,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("checkpoint {phase}: manifest missing or invalid: {message}")]
    Manifest {
        phase: CheckpointPhase,
        message: String,
    },
    #[error("checkpoint {name:?} not found")]
    NotFound { name: String },
}

impl CheckpointError {
    /// The phase this error occurred in.
    pub fn phase(&self) -> CheckpointPhase {
        match self {
            CheckpointError::Io { phase, .. }
            | CheckpointError::Archive { phase, .. }
            | CheckpointError::Manifest { phase, .. } => *phase,
            CheckpointError::NotFound { .. } => CheckpointPhase::Restore,
        }
    }
}

/// Manifest written at the root of every archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub label: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub shard_names: Vec<String>,
}

/// Parsed description of one archive on disk.
#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    pub name: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub bytes: u64,
}

/// Checkpoint reader/writer bound to one project layout.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    layout: ProjectLayout,
}

impl CheckpointStore {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }

    /// Create an archive of the current shard state.
    ///
    /// Returns the archive file name. Older archives beyond `retention` are
    /// pruned afterwards (best-effort).
    pub fn create(
        &self,
        label: &str,
        notes: &str,
        retention: usize,
        now: DateTime<Utc>,
    ) -> Result<String, CheckpointError> {
        const PHASE: CheckpointPhase = CheckpointPhase::Create;

        let dir = self.layout.checkpoints_dir();
        fs::create_dir_all(&dir).map_err(|e| io_fault(PHASE, "create_dir", &dir, e))?;

        let name = self.free_archive_name(&dir, label, now);
        let final_path = dir.join(&name);
        let tmp_path = dir.join(format!("{name}.tmp"));

        let manifest = Manifest {
            label: label.to_string(),
            notes: notes.to_string(),
            created_at: now,
            shard_names: stems_of(&self.layout.chunks_dir(), "json"),
        };

        if let Err(e) = self.write_archive(&tmp_path, &manifest) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        fs::rename(&tmp_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            io_fault(PHASE, "rename", &final_path, e)
        })?;
        if let Err(e) = File::open(&dir).and_then(|d| d.sync_all()) {
            warn!(error = %e, "checkpoint directory fsync failed");
        }

        self.prune(retention);

        debug!(archive = %name, shards = manifest.shard_names.len(), "checkpoint created");
        Ok(name)
    }

    /// Archives on disk, newest first.
    pub fn list(&self) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        const PHASE: CheckpointPhase = CheckpointPhase::List;
        let dir = self.layout.checkpoints_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut infos = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|e| io_fault(PHASE, "read_dir", &dir, e))?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("zip") {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            match self.read_manifest_at(&path, PHASE) {
                Ok(manifest) => infos.push(CheckpointInfo {
                    name,
                    label: manifest.label,
                    created_at: manifest.created_at,
                    bytes,
                }),
                Err(e) => {
                    warn!(archive = %name, error = %e, "skipping unreadable archive");
                }
            }
        }

        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.name.cmp(&a.name)));
        Ok(infos)
    }

    /// Replace the live shard state with the contents of `name`.
    ///
    /// The archive is validated before the current state is removed. An
    /// extraction failure can leave partial state behind; the error carries
    /// the restore phase so callers can retry or pick another archive.
    pub fn restore(&self, name: &str) -> Result<Manifest, CheckpointError> {
        const PHASE: CheckpointPhase = CheckpointPhase::Restore;
        let path = self.layout.checkpoints_dir().join(name);
        if !path.is_file() {
            return Err(CheckpointError::NotFound {
                name: name.to_string(),
            });
        }

        let file = File::open(&path).map_err(|e| io_fault(PHASE, "open", &path, e))?;
        let mut archive =
            ZipArchive::new(file).map_err(|e| archive_fault(PHASE, e))?;
        let manifest = read_manifest(&mut archive, PHASE)?;

        // Validation passed; from here on the live state is gone until
        // extraction completes.
        for dir in [self.layout.chunks_dir(), self.layout.backup_dir()] {
            clear_dir(&dir).map_err(|e| io_fault(PHASE, "clear_dir", &dir, e))?;
        }

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| archive_fault(PHASE, e))?;
            if entry.is_dir() {
                continue;
            }
            let Some(relative) = entry.enclosed_name() else {
                warn!(entry = entry.name(), "skipping archive entry with unsafe path");
                continue;
            };
            let Some(target) = self.target_for(&relative) else {
                continue;
            };
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| io_fault(PHASE, "create_dir", parent, e))?;
            }
            let mut out =
                File::create(&target).map_err(|e| io_fault(PHASE, "create", &target, e))?;
            io::copy(&mut entry, &mut out).map_err(|e| io_fault(PHASE, "extract", &target, e))?;
        }

        for dir in [self.layout.chunks_dir(), self.layout.backup_dir()] {
            if let Err(e) = File::open(&dir).and_then(|d| d.sync_all()) {
                warn!(path = %dir.display(), error = %e, "directory fsync after restore failed");
            }
        }

        debug!(archive = name, shards = manifest.shard_names.len(), "checkpoint restored");
        Ok(manifest)
    }

    /// Delete archives beyond `retention`, newest kept. Best-effort.
    pub fn prune(&self, retention: usize) {
        let retention = retention.max(1);
        let dir = self.layout.checkpoints_dir();
        let Ok(entries) = fs::read_dir(&dir) else {
            return;
        };

        let mut archives: Vec<(PathBuf, std::time::SystemTime)> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("zip"))
            .filter_map(|p| {
                let mtime = fs::metadata(&p).and_then(|m| m.modified()).ok()?;
                Some((p, mtime))
            })
            .collect();

        archives.sort_by(|a, b| b.1.cmp(&a.1));
        for (path, _) in archives.into_iter().skip(retention) {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "pruned old checkpoint"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to prune checkpoint"),
            }
        }
    }

    /// Compose the first free archive name for `label` at `now`.
    ///
    /// Checkpoints taken within the same second share a timestamp; a
    /// numeric suffix keeps them from overwriting each other.
    fn free_archive_name(&self, dir: &Path, label: &str, now: DateTime<Utc>) -> String {
        let base = format!(
            "checkpoint_{}_{}",
            sanitize_label(label),
            now.format("%Y%m%d_%H%M%S")
        );
        let candidate = format!("{base}.zip");
        if !dir.join(&candidate).exists() {
            return candidate;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}_{n}.zip");
            if !dir.join(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Write the zip to `path` and fsync it.
    fn write_archive(&self, path: &Path, manifest: &Manifest) -> Result<(), CheckpointError> {
        const PHASE: CheckpointPhase = CheckpointPhase::Create;
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let file = File::create(path).map_err(|e| io_fault(PHASE, "create", path, e))?;
        let mut zip = ZipWriter::new(file);

        let manifest_bytes = serde_json::to_vec_pretty(manifest).map_err(|e| {
            CheckpointError::Manifest {
                phase: PHASE,
                message: e.to_string(),
            }
        })?;
        zip.start_file(MANIFEST_NAME, options)
            .map_err(|e| archive_fault(PHASE, e))?;
        zip.write_all(&manifest_bytes)
            .map_err(|e| io_fault(PHASE, "write", path, e))?;

        for (dir, zip_prefix, ext) in [
            (self.layout.chunks_dir(), "chunks", "json"),
            (self.layout.backup_dir(), "chunks_bak", "bak"),
        ] {
            for source in files_with_extension(&dir, ext) {
                let Some(file_name) = source.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let bytes =
                    fs::read(&source).map_err(|e| io_fault(PHASE, "read", &source, e))?;
                zip.start_file(format!("{zip_prefix}/{file_name}"), options)
                    .map_err(|e| archive_fault(PHASE, e))?;
                zip.write_all(&bytes)
                    .map_err(|e| io_fault(PHASE, "write", path, e))?;
            }
        }

        let file = zip.finish().map_err(|e| archive_fault(PHASE, e))?;
        file.sync_all()
            .map_err(|e| io_fault(PHASE, "fsync", path, e))?;
        Ok(())
    }

    fn read_manifest_at(
        &self,
        path: &Path,
        phase: CheckpointPhase,
    ) -> Result<Manifest, CheckpointError> {
        let file = File::open(path).map_err(|e| io_fault(phase, "open", path, e))?;
        let mut archive = ZipArchive::new(file).map_err(|e| archive_fault(phase, e))?;
        read_manifest(&mut archive, phase)
    }

    /// Map an archive-relative path to its extraction target.
    ///
    /// Only entries under `chunks/` or `chunks_bak/` are extracted; the
    /// manifest and anything else is ignored.
    fn target_for(&self, relative: &Path) -> Option<PathBuf> {
        let mut components = relative.components();
        let top = match components.next() {
            Some(std::path::Component::Normal(part)) => part.to_str()?,
            _ => return None,
        };
        let rest = components.as_path();
        if rest.as_os_str().is_empty() {
            return None;
        }
        match top {
            "chunks" => Some(self.layout.chunks_dir().join(rest)),
            "chunks_bak" => Some(self.layout.backup_dir().join(rest)),
            _ => None,
        }
    }
}

fn io_fault(
    phase: CheckpointPhase,
    op: &'static str,
    path: &Path,
    source: io::Error,
) -> CheckpointError {
    CheckpointError::Io {
        phase,
        op,
        path: path.to_path_buf(),
        source,
    }
}

fn archive_fault(phase: CheckpointPhase, source: zip::result::ZipError) -> CheckpointError {
    CheckpointError::Archive { phase, source }
}

fn read_manifest(
    archive: &mut ZipArchive<File>,
    phase: CheckpointPhase,
) -> Result<Manifest, CheckpointError> {
    let manifest_fault = |message: String| CheckpointError::Manifest { phase, message };

    let mut entry = archive
        .by_name(MANIFEST_NAME)
        .map_err(|e| manifest_fault(e.to_string()))?;
    let mut raw = String::new();
    entry
        .read_to_string(&mut raw)
        .map_err(|e| manifest_fault(e.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| manifest_fault(e.to_string()))
}

/// Remove every entry inside `dir`, keeping the directory itself.
fn clear_dir(dir: &Path) -> io::Result<()> {
    if !dir.is_dir() {
        return fs::create_dir_all(dir);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(ext))
        .collect();
    files.sort();
    files
}

fn stems_of(dir: &Path, ext: &str) -> Vec<String> {
    let mut stems: Vec<String> = files_with_extension(dir, ext)
        .into_iter()
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    stems.sort();
    stems
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
