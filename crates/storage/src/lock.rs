// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exclusive project ownership via a PID lock file.
//!
//! The lock file holds the owning process id as ASCII decimal. Whether an
//! existing lock is live or stale is decided by the injected
//! [`ProcessProbe`], never by this module, so hosts control the policy and
//! tests control the outcome.
//!
//! Acquisition is best-effort: the lock is written via tmp + rename and
//! then read back; if another process won the race the readback shows its
//! PID and acquisition fails. Filesystems without atomic rename can still
//! lose this race, which is accepted.

use cw_core::ProcessProbe;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Outcome of a lock inspection or acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// This process now owns the lock.
    Acquired,
    /// Another live process owns the lock.
    HeldByLive(u32),
    /// A lock file exists but its owner is gone; safe to reclaim.
    Stale(u32),
}

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("lock at {path} was taken by pid {observed} during acquisition")]
    Race { path: PathBuf, observed: u32 },
}

fn io_err(op: &'static str, path: &Path, source: io::Error) -> LockError {
    LockError::Io {
        op,
        path: path.to_path_buf(),
        source,
    }
}

/// PID lock on one project directory.
pub struct ProjectLock {
    path: PathBuf,
    probe: ProcessProbe,
    own_pid: u32,
}

impl ProjectLock {
    pub fn new(path: PathBuf, probe: ProcessProbe) -> Self {
        Self {
            path,
            probe,
            own_pid: std::process::id(),
        }
    }

    /// Attempt to take the lock.
    ///
    /// If no lock file exists the lock is written and `Acquired` is
    /// returned. An existing lock is classified as `HeldByLive` or `Stale`
    /// via the probe; neither classification mutates the file.
    pub fn try_acquire(&self) -> Result<LockState, LockError> {
        match self.read_owner()? {
            None => {
                self.write_own()?;
                Ok(LockState::Acquired)
            }
            Some(pid) if (self.probe)(pid) => Ok(LockState::HeldByLive(pid)),
            Some(pid) => Ok(LockState::Stale(pid)),
        }
    }

    /// Remove a stale lock and take ownership.
    pub fn reclaim_and_acquire(&self) -> Result<(), LockError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err("remove_stale", &self.path, e)),
        }
        self.write_own()
    }

    /// Release the lock if and only if this process owns it.
    pub fn release(&self) -> Result<(), LockError> {
        match self.read_owner()? {
            Some(pid) if pid == self.own_pid => {
                match fs::remove_file(&self.path) {
                    Ok(()) => {
                        debug!(path = %self.path.display(), "released project lock");
                        Ok(())
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(io_err("remove_lock", &self.path, e)),
                }
            }
            Some(pid) => {
                warn!(
                    path = %self.path.display(),
                    owner = pid,
                    "refusing to release a lock owned by another process",
                );
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// PID recorded in the lock file, if the file exists.
    ///
    /// Unparseable content maps to PID 0, which no probe reports alive, so
    /// a mangled lock file reads as stale rather than wedging the project.
    pub fn read_owner(&self) -> Result<Option<u32>, LockError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => match content.trim().parse::<u32>() {
                Ok(pid) => Ok(Some(pid)),
                Err(_) => {
                    warn!(
                        path = %self.path.display(),
                        "lock file content is not a PID, treating owner as stale",
                    );
                    Ok(Some(0))
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err("read_lock", &self.path, e)),
        }
    }

    /// Write our PID via tmp + rename, then verify the readback.
    fn write_own(&self) -> Result<(), LockError> {
        let tmp = match self.path.file_name().and_then(|n| n.to_str()) {
            Some(name) => self.path.with_file_name(format!("{name}.tmp")),
            None => self.path.with_extension("tmp"),
        };
        let result = (|| -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            write!(file, "{}", self.own_pid)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)?;
            if let Some(parent) = self.path.parent() {
                File::open(parent)?.sync_all()?;
            }
            Ok(())
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(io_err("write_lock", &self.path, e));
        }

        // Narrow the window between two simultaneous starts: whoever's
        // rename landed last owns the file.
        match self.read_owner()? {
            Some(pid) if pid == self.own_pid => Ok(()),
            observed => Err(LockError::Race {
                path: self.path.clone(),
                observed: observed.unwrap_or(0),
            }),
        }
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
