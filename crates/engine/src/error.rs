// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine-level error taxonomy.
//!
//! Storage-layer errors are folded into this enum at the engine boundary so
//! callers match on one set of kinds regardless of which subsystem failed.

use cw_core::NameError;
use cw_storage::{CheckpointError, CheckpointPhase, LockError, MetaError, ShardError};
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is not active")]
    Inactive,
    #[error("project is held by live process {pid}")]
    Locked { pid: u32 },
    #[error("project {project_id:?} not found under {root}")]
    NotFound { project_id: String, root: PathBuf },
    #[error(transparent)]
    InvalidName(#[from] NameError),
    #[error("{op} failed for {path}: {source}")]
    IoFault {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("payload is not serializable: {0}")]
    SerializationFault(String),
    #[error("post-write readback mismatch for chunk {name:?}")]
    IntegrityFault { name: String },
    #[error("chunk {name:?}: primary and backup are both unreadable")]
    CorruptionUnrecoverable { name: String },
    #[error("checkpoint {phase} fault: {source}")]
    CheckpointFault {
        phase: CheckpointPhase,
        #[source]
        source: CheckpointError,
    },
    #[error("destructive operation requires explicit confirmation")]
    ConfirmationRequired,
    #[error("lock fault: {0}")]
    LockFault(#[from] LockError),
}

impl From<ShardError> for EngineError {
    fn from(err: ShardError) -> Self {
        match err {
            ShardError::Io { op, path, source } => EngineError::IoFault { op, path, source },
            ShardError::Serialize { source, .. } => {
                EngineError::SerializationFault(source.to_string())
            }
            ShardError::Integrity { name } => EngineError::IntegrityFault { name },
            ShardError::Unrecoverable { name } => EngineError::CorruptionUnrecoverable { name },
            ShardError::Name(e) => EngineError::InvalidName(e),
        }
    }
}

impl From<CheckpointError> for EngineError {
    fn from(err: CheckpointError) -> Self {
        EngineError::CheckpointFault {
            phase: err.phase(),
            source: err,
        }
    }
}

impl From<MetaError> for EngineError {
    fn from(err: MetaError) -> Self {
        match err {
            MetaError::Io { op, path, source } => EngineError::IoFault { op, path, source },
            MetaError::Json(e) => EngineError::SerializationFault(e.to_string()),
        }
    }
}
