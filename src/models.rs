//! Core data models shared by the sync pipeline.
//!
//! Rows mirror the `epics`, `features` and `tasks` tables; the remaining
//! types are per-file, per-run values that are folded into the report.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Epic row.
#[derive(Debug, Clone, Serialize)]
pub struct Epic {
    pub id: i64,
    pub key: String,
    pub title: String,
}

/// Feature row. `key` is `E##-F##` or `E##-P##-F##`.
#[derive(Debug, Clone, Serialize)]
pub struct Feature {
    pub id: i64,
    pub epic_id: i64,
    pub key: String,
    pub title: String,
}

/// Task row as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub id: i64,
    pub feature_id: i64,
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub file_path: Option<String>,
    pub content_hash: Option<String>,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

/// Task to insert. Status defaults to `todo` in the store.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub feature_id: i64,
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub file_path: String,
    pub content_hash: String,
}

/// Metadata derived from one markdown file during a run.
///
/// `key` is filled lazily: from frontmatter, from the filename, or from the
/// key generator.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMetadata {
    pub key: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub source_file_path: PathBuf,
    pub modified_at: DateTime<Utc>,
    pub content_hash: String,
}

/// Outcome of key resolution for one file.
///
/// A populated `task_key` with `written_to_file == false` is still valid for
/// the current run; `warning` explains why it was not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub task_key: String,
    pub epic_key: String,
    pub feature_key: String,
    pub feature_id: Option<i64>,
    pub written_to_file: bool,
    pub warning: Option<String>,
}

impl GenerationResult {
    /// True when the key was allocated in this run rather than read back.
    pub fn is_new(&self) -> bool {
        self.feature_id.is_some()
    }
}
