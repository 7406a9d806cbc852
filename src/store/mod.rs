//! Data-access seam for the sync pipeline.
//!
//! The key generator only needs [`ScopeLookup`]: the highest persisted
//! sequence in a feature and whether an epic or feature row exists. The sync
//! engine needs the wider [`TaskStore`] to import and reconcile tasks.
//!
//! Implementations must be `Send + Sync`. The SQLite backend lives in
//! [`crate::sqlite_store`]; [`memory::MemoryStore`] backs tests.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`max_sequence`](ScopeLookup::max_sequence) | Highest task sequence in a feature |
//! | [`feature_id`](ScopeLookup::feature_id) / [`epic_id`](ScopeLookup::epic_id) | Scope existence |
//! | [`get_task`](TaskStore::get_task) | Task row by key |
//! | [`insert_task`](TaskStore::insert_task) / [`update_task`](TaskStore::update_task) | Import and reconcile |
//! | [`record_history`](TaskStore::record_history) | Append an audit note |
//! | [`known_file_paths`](TaskStore::known_file_paths) | Incremental sync filter |
//! | [`get_checkpoint`](TaskStore::get_checkpoint) / [`set_checkpoint`](TaskStore::set_checkpoint) | Last sync time |

pub mod memory;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Epic, Feature, NewTask, TaskRecord};

/// Scope queries used during key allocation.
#[async_trait]
pub trait ScopeLookup: Send + Sync {
    /// Highest sequence number among persisted tasks of `feature_key`, or 0.
    async fn max_sequence(&self, feature_key: &str) -> Result<u32>;

    /// Row id of the feature, if it exists.
    async fn feature_id(&self, feature_key: &str) -> Result<Option<i64>>;

    /// Row id of the epic, if it exists.
    async fn epic_id(&self, epic_key: &str) -> Result<Option<i64>>;
}

/// Task persistence used by the sync engine.
#[async_trait]
pub trait TaskStore: ScopeLookup {
    async fn get_task(&self, key: &str) -> Result<Option<TaskRecord>>;

    /// Insert with status `todo`. Returns the new row id.
    async fn insert_task(&self, task: &NewTask) -> Result<i64>;

    /// Overwrite the mutable columns of an existing row and bump `updated_at`.
    async fn update_task(&self, task: &TaskRecord) -> Result<()>;

    async fn record_history(&self, task_id: i64, note: &str) -> Result<()>;

    async fn create_epic(&self, key: &str, title: &str) -> Result<Epic>;

    async fn create_feature(&self, epic_id: i64, key: &str, title: &str) -> Result<Feature>;

    /// `file_path` of every task that has one.
    async fn known_file_paths(&self) -> Result<HashSet<String>>;

    async fn get_checkpoint(&self, name: &str) -> Result<Option<DateTime<Utc>>>;

    async fn set_checkpoint(&self, name: &str, at: DateTime<Utc>) -> Result<()>;
}
