// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic shard writes and the self-healing read path.
//!
//! A shard commits through a fixed pipeline: serialize, write to
//! `<name>.tmp`, fsync the file and its directory, parse the tmp file back
//! and require structural equality, rotate the previous primary into
//! `chunks_bak/`, then rename the tmp file over the primary. Any failure
//! before the rename leaves the previous primary untouched.
//!
//! Reads recover transparently: a primary that no longer parses is rebuilt
//! from its backup through the same write pipeline, so the next reader sees
//! a healthy file again.

use crate::layout::ProjectLayout;
use cw_core::NameError;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// An owned chunk payload: the top-level JSON object of one shard.
pub type ChunkPayload = serde_json::Map<String, Value>;

/// Errors from shard I/O
#[derive(Debug, Error)]
pub enum ShardError {
    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("payload for chunk {name:?} is not serializable: {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("readback mismatch for chunk {name:?} after write")]
    Integrity { name: String },
    #[error("chunk {name:?}: primary and backup are both unreadable")]
    Unrecoverable { name: String },
    #[error(transparent)]
    Name(#[from] NameError),
}

fn io_err(op: &'static str, path: &Path, source: io::Error) -> ShardError {
    ShardError::Io {
        op,
        path: path.to_path_buf(),
        source,
    }
}

/// Fsync a directory so a rename or create inside it is durable.
fn fsync_dir(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}

/// Shard reader/writer bound to one project layout.
#[derive(Debug, Clone)]
pub struct ShardStore {
    layout: ProjectLayout,
}

impl ShardStore {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }

    /// Atomically replace the committed value of `name` with `payload`.
    ///
    /// On success the primary parses back to `payload`, the backup (if any)
    /// holds the previously committed value, and no tmp file remains. On
    /// failure the previous primary is untouched and the tmp file has been
    /// removed.
    pub fn persist(&self, name: &str, payload: &ChunkPayload) -> Result<(), ShardError> {
        let paths = self.layout.chunk_paths(name)?;

        self.layout
            .ensure_shard_dirs()
            .map_err(|e| io_err("create_dir", &self.layout.chunks_dir(), e))?;

        let bytes = serde_json::to_vec_pretty(payload).map_err(|source| ShardError::Serialize {
            name: name.to_string(),
            source,
        })?;

        self.write_tmp(&paths.tmp, &bytes)?;

        // Readback verification: the bytes on disk must parse to the exact
        // payload before they may replace the primary.
        match read_object(&paths.tmp) {
            Ok(reread) if reread == *payload => {}
            Ok(_) | Err(ReadFailure::Parse(_)) => {
                let _ = fs::remove_file(&paths.tmp);
                return Err(ShardError::Integrity {
                    name: name.to_string(),
                });
            }
            Err(ReadFailure::Io(e)) => {
                let _ = fs::remove_file(&paths.tmp);
                return Err(io_err("readback", &paths.tmp, e));
            }
        }

        // Rotate the current primary into the backup slot. Best-effort: a
        // failed rotation must not block the commit.
        if paths.primary.exists() {
            if let Err(e) = self.rotate_backup(&paths.primary, &paths.backup) {
                warn!(
                    chunk = name,
                    path = %paths.backup.display(),
                    error = %e,
                    "backup rotation failed, committing without fresh backup",
                );
            }
        }

        if let Err(e) = fs::rename(&paths.tmp, &paths.primary) {
            let _ = fs::remove_file(&paths.tmp);
            return Err(io_err("rename", &paths.primary, e));
        }

        // Make the rename durable. Best-effort at this point: the data
        // itself is already fsynced.
        if let Err(e) = fsync_dir(&self.layout.chunks_dir()) {
            warn!(
                chunk = name,
                error = %e,
                "directory fsync after commit failed",
            );
        }

        debug!(chunk = name, bytes = bytes.len(), "persisted shard");
        Ok(())
    }

    /// Read the committed value of `name`.
    ///
    /// A missing primary yields the empty object. An unparseable primary is
    /// rebuilt from its backup; if both are unreadable the caller gets
    /// [`ShardError::Unrecoverable`].
    pub fn fetch(&self, name: &str) -> Result<ChunkPayload, ShardError> {
        let paths = self.layout.chunk_paths(name)?;

        if !paths.primary.exists() {
            return Ok(ChunkPayload::new());
        }

        let primary_err = match read_object(&paths.primary) {
            Ok(payload) => return Ok(payload),
            Err(e) => e,
        };

        warn!(
            chunk = name,
            path = %paths.primary.display(),
            error = %primary_err,
            "primary shard unreadable, falling back to backup",
        );

        match read_object(&paths.backup) {
            Ok(payload) => {
                // Heal the primary through the normal pipeline so the next
                // read sees a committed file again.
                self.persist(name, &payload)?;
                Ok(payload)
            }
            Err(backup_err) => {
                warn!(
                    chunk = name,
                    path = %paths.backup.display(),
                    error = %backup_err,
                    "backup shard unreadable as well",
                );
                Err(ShardError::Unrecoverable {
                    name: name.to_string(),
                })
            }
        }
    }

    /// Delete leftover `.tmp` files from interrupted writes.
    ///
    /// Returns the number of files removed.
    pub fn sweep_orphans(&self) -> Result<usize, ShardError> {
        let mut removed = 0;
        for dir in [self.layout.chunks_dir(), self.layout.backup_dir()] {
            for path in list_with_extension(&dir, "tmp") {
                fs::remove_file(&path).map_err(|e| io_err("remove_orphan", &path, e))?;
                warn!(path = %path.display(), "removed orphaned tmp file");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Count `.tmp` files without removing them.
    pub fn count_orphans(&self) -> usize {
        [self.layout.chunks_dir(), self.layout.backup_dir()]
            .iter()
            .map(|dir| list_with_extension(dir, "tmp").len())
            .sum()
    }

    /// Names of all committed shards, sorted.
    pub fn shard_names(&self) -> Vec<String> {
        let mut names: Vec<String> = list_with_extension(&self.layout.chunks_dir(), "json")
            .into_iter()
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        names
    }

    /// Number of committed shards.
    pub fn shard_count(&self) -> usize {
        list_with_extension(&self.layout.chunks_dir(), "json").len()
    }

    /// Write `bytes` to the tmp file and make them durable.
    fn write_tmp(&self, tmp: &Path, bytes: &[u8]) -> Result<(), ShardError> {
        let result = (|| {
            let mut file = File::create(tmp)?;
            file.write_all(bytes)?;
            file.flush()?;
            file.sync_all()?;
            fsync_dir(&self.layout.chunks_dir())
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(tmp);
            return Err(io_err("write_tmp", tmp, e));
        }
        Ok(())
    }

    /// Copy the primary into the backup slot via tmp + rename.
    fn rotate_backup(&self, primary: &Path, backup: &Path) -> io::Result<()> {
        let bytes = fs::read(primary)?;
        let tmp = backup.with_extension("bak.tmp");
        {
            let mut file = File::create(&tmp)?;
            if let Err(e) = file.write_all(&bytes).and_then(|()| file.sync_all()) {
                drop(file);
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        }
        if let Err(e) = fs::rename(&tmp, backup) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }
}

enum ReadFailure {
    Io(io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for ReadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadFailure::Io(e) => write!(f, "I/O: {e}"),
            ReadFailure::Parse(e) => write!(f, "parse: {e}"),
        }
    }
}

/// Read a file and parse it as a top-level JSON object.
fn read_object(path: &Path) -> Result<ChunkPayload, ReadFailure> {
    let bytes = fs::read(path).map_err(ReadFailure::Io)?;
    serde_json::from_slice::<ChunkPayload>(&bytes).map_err(ReadFailure::Parse)
}

/// Files directly under `dir` carrying the given extension.
fn list_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(ext)
        })
        .collect()
}

#[cfg(test)]
#[path = "shard_tests.rs"]
mod tests;
