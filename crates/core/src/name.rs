// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Validated names for chunks, projects, and checkpoint labels.
//!
//! Chunk names are used directly as file stems under `chunks/`, so the
//! accepted charset is the filesystem-safe `[A-Za-z0-9_.-]+`. Project ids
//! become directory names under the storage root and additionally must not
//! smuggle in path separators or start with a dot.

use thiserror::Error;

/// Upper bound for chunk names and project ids, in bytes.
pub const MAX_NAME_LEN: usize = 128;

/// Errors from name validation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("name is empty")]
    Empty,
    #[error("name {name:?} is {len} bytes, limit is {MAX_NAME_LEN}")]
    TooLong { name: String, len: usize },
    #[error("invalid character {ch:?} in name {name:?}")]
    InvalidChar { name: String, ch: char },
    #[error("project id {0:?} must not start with a dot")]
    LeadingDot(String),
    #[error("project id {0:?} must not contain path separators")]
    PathSeparator(String),
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-')
}

/// Validate a chunk name against the `[A-Za-z0-9_.-]+` charset.
pub fn validate_chunk_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong {
            name: name.to_string(),
            len: name.len(),
        });
    }
    if let Some(ch) = name.chars().find(|ch| !is_name_char(*ch)) {
        return Err(NameError::InvalidChar {
            name: name.to_string(),
            ch,
        });
    }
    Ok(())
}

/// Validate a project id.
///
/// Project ids obey the chunk-name charset rules and additionally must not
/// begin with a dot. The charset already excludes `/` and `\`, but the
/// separator check runs first so the error names the real problem.
pub fn validate_project_id(id: &str) -> Result<(), NameError> {
    if id.is_empty() {
        return Err(NameError::Empty);
    }
    if id.contains('/') || id.contains('\\') {
        return Err(NameError::PathSeparator(id.to_string()));
    }
    if id.starts_with('.') {
        return Err(NameError::LeadingDot(id.to_string()));
    }
    validate_chunk_name(id)
}

/// Reduce an arbitrary label to the chunk-name charset.
///
/// Out-of-charset characters map to `_`. An empty or all-invalid label
/// becomes `"unnamed"` so archive names stay well-formed.
pub fn sanitize_label(label: &str) -> String {
    let sanitized: String = label
        .chars()
        .take(MAX_NAME_LEN)
        .map(|ch| if is_name_char(ch) { ch } else { '_' })
        .collect();
    if sanitized.trim_matches('_').is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
#[path = "name_tests.rs"]
mod tests;
