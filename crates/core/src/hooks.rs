// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observability sinks and the process liveness probe.
//!
//! The engine reports activity through three caller-supplied callbacks:
//! informational status lines, a sync notification fired after a flush that
//! wrote at least one shard, and fault reports for I/O, lock, and integrity
//! errors. All three are optional; [`NoopHooks`] is the default.
//!
//! Sinks run synchronously inside the engine's worker context, so a
//! panicking sink would otherwise poison the engine mutex. [`shielded`]
//! wraps every invocation and swallows unwinds.

use std::sync::Arc;

/// Callback sinks for engine activity.
///
/// All methods default to no-ops so implementors override only what they
/// observe.
pub trait EngineHooks: Send + Sync {
    /// Informational activity, one human-readable line per call.
    fn on_status(&self, _message: &str) {}

    /// A flush completed and persisted at least one shard.
    fn on_sync(&self) {}

    /// A non-fatal or fatal engine fault.
    fn on_fault(&self, _error: &dyn std::error::Error) {}
}

/// Default sink that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl EngineHooks for NoopHooks {}

/// Invoke a sink callback, swallowing panics.
pub fn shielded(f: impl FnOnce()) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
        tracing::warn!("engine hook panicked; continuing");
    }
}

/// Host-supplied predicate answering "does a process with this PID exist?".
///
/// The lock manager uses it to classify an existing lock as live or stale.
/// Tests inject deterministic closures.
pub type ProcessProbe = Arc<dyn Fn(u32) -> bool + Send + Sync>;

/// Probe backed by the host process table.
pub fn system_probe() -> ProcessProbe {
    Arc::new(process_exists)
}

#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Signal 0 checks existence without delivering anything; EPERM still
    // means the process is there.
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_exists(_pid: u32) -> bool {
    // No portable liveness check; callers treat every lock as live.
    true
}

#[cfg(test)]
#[path = "hooks_tests.rs"]
mod tests;
