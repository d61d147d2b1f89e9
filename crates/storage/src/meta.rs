// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project version metadata.
//!
//! `version.json` records which engine created the project and when. It is
//! written once at creation and read back on reopen for diagnostics; a
//! version mismatch is not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors from metadata operations
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Contents of `version.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMeta {
    pub engine_version: String,
    pub schema_version: u32,
    pub project_id: String,
    pub created_at: DateTime<Utc>,
}

impl VersionMeta {
    /// Metadata for a project created now by this engine build.
    pub fn new(project_id: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            schema_version: SCHEMA_VERSION,
            project_id: project_id.to_string(),
            created_at,
        }
    }

    /// Save atomically (write to .tmp, fsync, rename).
    pub fn save(&self, path: &Path) -> Result<(), MetaError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        let result = (|| {
            let mut file = File::create(&tmp)?;
            io::Write::write_all(&mut file, &bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(MetaError::Io {
                op: "write_meta",
                path: path.to_path_buf(),
                source: e,
            });
        }
        Ok(())
    }

    /// Load metadata if present.
    ///
    /// Returns `Ok(None)` when the file is missing or unreadable; a corrupt
    /// metadata file is logged and left for the caller to rewrite.
    pub fn load(path: &Path) -> Result<Option<Self>, MetaError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MetaError::Io {
                    op: "read_meta",
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "version metadata unreadable, will be rewritten",
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
#[path = "meta_tests.rs"]
mod tests;
