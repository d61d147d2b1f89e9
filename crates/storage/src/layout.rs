// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical on-disk layout of a project directory.
//!
//! Every path the engine touches is derived here, up front, from
//! `(root, project_id)`:
//!
//! ```text
//! <root>/<project_id>/
//!   .lock                      owning PID
//!   version.json               engine/schema versions, identity
//!   chunks/<name>.json         primary shard
//!   chunks/<name>.tmp          in-flight write
//!   chunks_bak/<name>.bak      previous committed shard
//!   checkpoints/*.zip          point-in-time archives
//! ```

use cw_core::{validate_chunk_name, validate_project_id, NameError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// The three files a single chunk name can occupy at any instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPaths {
    /// `chunks/<name>.json`
    pub primary: PathBuf,
    /// `chunks_bak/<name>.bak`
    pub backup: PathBuf,
    /// `chunks/<name>.tmp`
    pub tmp: PathBuf,
}

/// Resolver for all paths under one project directory.
///
/// Pure: constructing a layout never touches the filesystem. [`ensure`]
/// creates the directory tree and is idempotent.
///
/// [`ensure`]: ProjectLayout::ensure
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
    project_id: String,
    project_dir: PathBuf,
}

impl ProjectLayout {
    /// Resolve the layout for `project_id` under `root`.
    ///
    /// Rejects ids containing path separators or leading dots.
    pub fn resolve(root: &Path, project_id: &str) -> Result<Self, NameError> {
        validate_project_id(project_id)?;
        Ok(Self {
            root: root.to_path_buf(),
            project_id: project_id.to_string(),
            project_dir: root.join(project_id),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.project_dir.join("chunks")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.project_dir.join("chunks_bak")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.project_dir.join("checkpoints")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.project_dir.join(".lock")
    }

    pub fn version_path(&self) -> PathBuf {
        self.project_dir.join("version.json")
    }

    /// Resolve the `(primary, backup, tmp)` triple for a chunk name.
    pub fn chunk_paths(&self, name: &str) -> Result<ChunkPaths, NameError> {
        validate_chunk_name(name)?;
        Ok(ChunkPaths {
            primary: self.chunks_dir().join(format!("{name}.json")),
            backup: self.backup_dir().join(format!("{name}.bak")),
            tmp: self.chunks_dir().join(format!("{name}.tmp")),
        })
    }

    /// Whether the project directory exists on disk.
    pub fn exists(&self) -> bool {
        self.project_dir.is_dir()
    }

    /// Create the directory tree. Idempotent.
    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.project_dir)?;
        fs::create_dir_all(self.chunks_dir())?;
        fs::create_dir_all(self.backup_dir())?;
        fs::create_dir_all(self.checkpoints_dir())?;
        Ok(())
    }

    /// Create just the shard directories (used before each write, so a
    /// deleted subdirectory does not fail the pipeline).
    pub fn ensure_shard_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(self.chunks_dir())?;
        fs::create_dir_all(self.backup_dir())?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "layout_tests.rs"]
mod tests;
