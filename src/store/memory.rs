//! In-memory [`TaskStore`] for tests.
//!
//! All state sits behind a single `std::sync::RwLock`.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::keygen::parse_task_key;
use crate::models::{Epic, Feature, NewTask, TaskRecord};

use super::{ScopeLookup, TaskStore};

#[derive(Default)]
struct State {
    next_id: i64,
    epics: Vec<Epic>,
    features: Vec<Feature>,
    tasks: HashMap<String, TaskRecord>,
    history: Vec<(i64, String)>,
    checkpoints: HashMap<String, DateTime<Utc>>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    /// Seed a task row directly, bypassing the sync pipeline.
    pub fn seed_task(&self, feature_id: i64, key: &str, title: &str) -> Result<i64> {
        let mut state = self.write()?;
        let id = state.next_id();
        state.tasks.insert(
            key.to_string(),
            TaskRecord {
                id,
                feature_id,
                key: key.to_string(),
                title: title.to_string(),
                description: None,
                file_path: None,
                content_hash: None,
                status: "todo".to_string(),
                updated_at: Utc::now(),
            },
        );
        Ok(id)
    }

    pub fn tasks(&self) -> Result<Vec<TaskRecord>> {
        let mut tasks: Vec<TaskRecord> = self.read()?.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(tasks)
    }

    pub fn epics(&self) -> Result<Vec<Epic>> {
        Ok(self.read()?.epics.clone())
    }

    pub fn features(&self) -> Result<Vec<Feature>> {
        Ok(self.read()?.features.clone())
    }

    pub fn history(&self, task_id: i64) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .history
            .iter()
            .filter(|(id, _)| *id == task_id)
            .map(|(_, note)| note.clone())
            .collect())
    }
}

#[async_trait]
impl ScopeLookup for MemoryStore {
    async fn max_sequence(&self, feature_key: &str) -> Result<u32> {
        Ok(self
            .read()?
            .tasks
            .keys()
            .filter_map(|k| parse_task_key(k))
            .filter(|(scope, _)| *scope == feature_key)
            .map(|(_, seq)| seq)
            .max()
            .unwrap_or(0))
    }

    async fn feature_id(&self, feature_key: &str) -> Result<Option<i64>> {
        Ok(self
            .read()?
            .features
            .iter()
            .find(|f| f.key == feature_key)
            .map(|f| f.id))
    }

    async fn epic_id(&self, epic_key: &str) -> Result<Option<i64>> {
        Ok(self
            .read()?
            .epics
            .iter()
            .find(|e| e.key == epic_key)
            .map(|e| e.id))
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn get_task(&self, key: &str) -> Result<Option<TaskRecord>> {
        Ok(self.read()?.tasks.get(key).cloned())
    }

    async fn insert_task(&self, task: &NewTask) -> Result<i64> {
        let mut state = self.write()?;
        if state.tasks.contains_key(&task.key) {
            bail!("task '{}' already exists", task.key);
        }
        let id = state.next_id();
        state.tasks.insert(
            task.key.clone(),
            TaskRecord {
                id,
                feature_id: task.feature_id,
                key: task.key.clone(),
                title: task.title.clone(),
                description: task.description.clone(),
                file_path: Some(task.file_path.clone()),
                content_hash: Some(task.content_hash.clone()),
                status: "todo".to_string(),
                updated_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn update_task(&self, task: &TaskRecord) -> Result<()> {
        let mut state = self.write()?;
        let Some(existing) = state.tasks.get_mut(&task.key) else {
            bail!("task '{}' not found", task.key);
        };
        *existing = TaskRecord {
            updated_at: Utc::now(),
            ..task.clone()
        };
        Ok(())
    }

    async fn record_history(&self, task_id: i64, note: &str) -> Result<()> {
        self.write()?.history.push((task_id, note.to_string()));
        Ok(())
    }

    async fn create_epic(&self, key: &str, title: &str) -> Result<Epic> {
        let mut state = self.write()?;
        if state.epics.iter().any(|e| e.key == key) {
            bail!("epic '{}' already exists", key);
        }
        let epic = Epic {
            id: state.next_id(),
            key: key.to_string(),
            title: title.to_string(),
        };
        state.epics.push(epic.clone());
        Ok(epic)
    }

    async fn create_feature(&self, epic_id: i64, key: &str, title: &str) -> Result<Feature> {
        let mut state = self.write()?;
        if !state.epics.iter().any(|e| e.id == epic_id) {
            bail!("epic id {} not found", epic_id);
        }
        if state.features.iter().any(|f| f.key == key) {
            bail!("feature '{}' already exists", key);
        }
        let feature = Feature {
            id: state.next_id(),
            epic_id,
            key: key.to_string(),
            title: title.to_string(),
        };
        state.features.push(feature.clone());
        Ok(feature)
    }

    async fn known_file_paths(&self) -> Result<HashSet<String>> {
        Ok(self
            .read()?
            .tasks
            .values()
            .filter_map(|t| t.file_path.clone())
            .collect())
    }

    async fn get_checkpoint(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read()?.checkpoints.get(name).copied())
    }

    async fn set_checkpoint(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        self.write()?.checkpoints.insert(name.to_string(), at);
        Ok(())
    }
}
