// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine construction options.

use cw_core::{system_probe, Clock, EngineHooks, NoopHooks, ProcessProbe, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Quiescent interval after the last stage before the buffer flushes.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1500);

/// Archives kept per project unless a caller overrides retention.
pub const DEFAULT_CHECKPOINT_RETENTION: usize = 10;

/// Options supplied at engine construction.
///
/// The defaults give a production engine: system clock, host process table
/// probe, silent hooks, `./user_projects` root.
#[derive(Clone)]
pub struct EngineOptions {
    pub root: PathBuf,
    pub debounce: Duration,
    pub checkpoint_retention: usize,
    pub hooks: Arc<dyn EngineHooks>,
    pub probe: ProcessProbe,
    pub clock: Arc<dyn Clock>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./user_projects"),
            debounce: DEFAULT_DEBOUNCE,
            checkpoint_retention: DEFAULT_CHECKPOINT_RETENTION,
            hooks: Arc::new(NoopHooks),
            probe: system_probe(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl EngineOptions {
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_checkpoint_retention(mut self, retention: usize) -> Self {
        self.checkpoint_retention = retention.max(1);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn EngineHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_probe(mut self, probe: ProcessProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
