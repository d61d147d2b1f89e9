// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Debounced staging buffer for pending chunk payloads.
//!
//! At most one entry exists per chunk name; staging the same name again
//! within the debounce window overwrites the previous payload, so only the
//! last value is ever written. The buffer itself is a plain state machine —
//! the engine's worker thread supplies the time and performs the I/O.

use cw_storage::ChunkPayload;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct StagingBuffer {
    entries: HashMap<String, ChunkPayload>,
    deadline: Option<Instant>,
    flushing: bool,
    debounce: Duration,
}

impl StagingBuffer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            deadline: None,
            flushing: false,
            debounce,
        }
    }

    /// Stage `payload` under `name`, overwriting any pending entry, and
    /// re-arm the flush deadline.
    pub fn stage(&mut self, name: &str, payload: ChunkPayload, now: Instant) {
        self.entries.insert(name.to_string(), payload);
        self.deadline = Some(now + self.debounce);
    }

    /// Whether any entry is waiting to be flushed.
    pub fn is_dirty(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the debounce window has elapsed and a flush should run.
    pub fn due(&self, now: Instant) -> bool {
        !self.flushing && self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Take every pending entry for persistence, sorted by name, clearing
    /// the deadline and marking the buffer as flushing.
    pub fn begin_flush(&mut self) -> Vec<(String, ChunkPayload)> {
        self.deadline = None;
        self.flushing = true;
        let mut batch: Vec<(String, ChunkPayload)> = self.entries.drain().collect();
        batch.sort_by(|a, b| a.0.cmp(&b.0));
        batch
    }

    /// Put a failed entry back so a later flush retries it.
    ///
    /// An entry staged after the flush began takes precedence over the
    /// failed payload.
    pub fn restore(&mut self, name: String, payload: ChunkPayload) {
        self.entries.entry(name).or_insert(payload);
    }

    pub fn end_flush(&mut self) {
        self.flushing = false;
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
