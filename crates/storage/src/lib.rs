// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Storage layer for the chunkwell persistence engine
//!
//! Everything that touches the project directory lives here: the path
//! layout resolver, the atomic shard write pipeline with its self-healing
//! read path, the PID lock, the version metadata file, and the checkpoint
//! archive subsystem.

mod checkpoint;
mod layout;
mod lock;
mod meta;
mod shard;

pub use checkpoint::{
    CheckpointError, CheckpointInfo, CheckpointPhase, CheckpointStore, Manifest, MANIFEST_NAME,
};
pub use layout::{ChunkPaths, ProjectLayout};
pub use lock::{LockError, LockState, ProjectLock};
pub use meta::{MetaError, VersionMeta, SCHEMA_VERSION};
pub use shard::{ChunkPayload, ShardError, ShardStore};
