//! SQLite-backed [`TaskStore`] implementation.
//!
//! Timestamps are stored as unix seconds; checkpoint cursors as unix
//! milliseconds in the `checkpoints.cursor` text column.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::keygen::parse_task_key;
use crate::models::{Epic, Feature, NewTask, TaskRecord};
use crate::store::{ScopeLookup, TaskStore};

/// SQLite implementation of [`TaskStore`] over the schema created by
/// [`crate::migrate`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn list_epics(&self) -> Result<Vec<Epic>> {
        let rows = sqlx::query("SELECT id, key, title FROM epics ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<Epic> {
                Ok(Epic {
                    id: row.try_get("id")?,
                    key: row.try_get("key")?,
                    title: row.try_get("title")?,
                })
            })
            .collect()
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, feature_id, key, title, description, file_path, content_hash,
                   status, updated_at
            FROM tasks ORDER BY key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    pub async fn history(&self, task_id: i64) -> Result<Vec<String>> {
        let notes: Vec<String> =
            sqlx::query_scalar("SELECT note FROM task_history WHERE task_id = ? ORDER BY id")
                .bind(task_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(notes)
    }
}

fn from_unix(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn task_from_row(row: &SqliteRow) -> Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.try_get("id")?,
        feature_id: row.try_get("feature_id")?,
        key: row.try_get("key")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        file_path: row.try_get("file_path")?,
        content_hash: row.try_get("content_hash")?,
        status: row.try_get("status")?,
        updated_at: from_unix(row.try_get("updated_at")?),
    })
}

#[async_trait]
impl ScopeLookup for SqliteStore {
    async fn max_sequence(&self, feature_key: &str) -> Result<u32> {
        let keys: Vec<String> = sqlx::query_scalar("SELECT key FROM tasks WHERE key LIKE ?")
            .bind(format!("T-{}-%", feature_key))
            .fetch_all(&self.pool)
            .await?;

        Ok(keys
            .iter()
            .filter_map(|k| parse_task_key(k))
            .filter(|(scope, _)| *scope == feature_key)
            .map(|(_, seq)| seq)
            .max()
            .unwrap_or(0))
    }

    async fn feature_id(&self, feature_key: &str) -> Result<Option<i64>> {
        let id = sqlx::query_scalar("SELECT id FROM features WHERE key = ?")
            .bind(feature_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn epic_id(&self, epic_key: &str) -> Result<Option<i64>> {
        let id = sqlx::query_scalar("SELECT id FROM epics WHERE key = ?")
            .bind(epic_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn get_task(&self, key: &str) -> Result<Option<TaskRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, feature_id, key, title, description, file_path, content_hash,
                   status, updated_at
            FROM tasks WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn insert_task(&self, task: &NewTask) -> Result<i64> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (feature_id, key, title, description, file_path, content_hash,
                               status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'todo', ?, ?)
            "#,
        )
        .bind(task.feature_id)
        .bind(&task.key)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.file_path)
        .bind(&task.content_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert task {}", task.key))?;

        Ok(result.last_insert_rowid())
    }

    async fn update_task(&self, task: &TaskRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET title = ?, description = ?, file_path = ?, content_hash = ?, updated_at = ?
            WHERE key = ?
            "#,
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.file_path)
        .bind(&task.content_hash)
        .bind(Utc::now().timestamp())
        .bind(&task.key)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update task {}", task.key))?;

        if result.rows_affected() == 0 {
            anyhow::bail!("task '{}' not found", task.key);
        }
        Ok(())
    }

    async fn record_history(&self, task_id: i64, note: &str) -> Result<()> {
        sqlx::query("INSERT INTO task_history (task_id, note, created_at) VALUES (?, ?, ?)")
            .bind(task_id)
            .bind(note)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_epic(&self, key: &str, title: &str) -> Result<Epic> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO epics (key, title, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(key)
        .bind(title)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create epic {}", key))?;

        Ok(Epic {
            id: result.last_insert_rowid(),
            key: key.to_string(),
            title: title.to_string(),
        })
    }

    async fn create_feature(&self, epic_id: i64, key: &str, title: &str) -> Result<Feature> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO features (epic_id, key, title, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(epic_id)
        .bind(key)
        .bind(title)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create feature {}", key))?;

        Ok(Feature {
            id: result.last_insert_rowid(),
            epic_id,
            key: key.to_string(),
            title: title.to_string(),
        })
    }

    async fn known_file_paths(&self) -> Result<HashSet<String>> {
        let paths: Vec<String> =
            sqlx::query_scalar("SELECT file_path FROM tasks WHERE file_path IS NOT NULL")
                .fetch_all(&self.pool)
                .await?;
        Ok(paths.into_iter().collect())
    }

    async fn get_checkpoint(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        let result: Option<Option<String>> =
            sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(result
            .flatten()
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis))
    }

    async fn set_checkpoint(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(at.timestamp_millis().to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn new_task(feature_id: i64, key: &str) -> NewTask {
        NewTask {
            feature_id,
            key: key.into(),
            title: "Title".into(),
            description: Some("Desc".into()),
            file_path: format!("/docs/{}.md", key),
            content_hash: "hash".into(),
        }
    }

    #[tokio::test]
    async fn test_scope_queries() {
        let store = store().await;
        let epic = store.create_epic("E04", "Search").await.unwrap();
        let feature = store.create_feature(epic.id, "E04-F02", "Cache").await.unwrap();
        let phased = store.create_feature(epic.id, "E04-P01-F02", "Phased").await.unwrap();

        store.insert_task(&new_task(feature.id, "T-E04-F02-001")).await.unwrap();
        store.insert_task(&new_task(feature.id, "T-E04-F02-003")).await.unwrap();
        store.insert_task(&new_task(phased.id, "T-E04-P01-F02-008")).await.unwrap();

        assert_eq!(store.max_sequence("E04-F02").await.unwrap(), 3);
        assert_eq!(store.max_sequence("E04-P01-F02").await.unwrap(), 8);
        assert_eq!(store.max_sequence("E09-F01").await.unwrap(), 0);
        assert_eq!(store.epic_id("E04").await.unwrap(), Some(epic.id));
        assert_eq!(store.feature_id("E04-F02").await.unwrap(), Some(feature.id));
        assert_eq!(store.feature_id("E04-F03").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_task_round_trip() {
        let store = store().await;
        let epic = store.create_epic("E01", "Setup").await.unwrap();
        let feature = store.create_feature(epic.id, "E01-F01", "Init").await.unwrap();
        let id = store.insert_task(&new_task(feature.id, "T-E01-F01-001")).await.unwrap();

        let mut task = store.get_task("T-E01-F01-001").await.unwrap().unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.status, "todo");
        assert_eq!(task.description.as_deref(), Some("Desc"));

        task.title = "Renamed".into();
        task.description = None;
        store.update_task(&task).await.unwrap();
        store.record_history(id, "Updated from file (1 conflicts resolved)").await.unwrap();

        let task = store.get_task("T-E01-F01-001").await.unwrap().unwrap();
        assert_eq!(task.title, "Renamed");
        assert_eq!(task.description, None);
        assert_eq!(store.history(id).await.unwrap().len(), 1);
        assert!(store
            .known_file_paths()
            .await
            .unwrap()
            .contains("/docs/T-E01-F01-001.md"));

        assert!(store.insert_task(&new_task(feature.id, "T-E01-F01-001")).await.is_err());
    }

    #[tokio::test]
    async fn test_checkpoint_round_trip() {
        let store = store().await;
        assert_eq!(store.get_checkpoint("docs").await.unwrap(), None);

        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        store.set_checkpoint("docs", at).await.unwrap();
        assert_eq!(store.get_checkpoint("docs").await.unwrap(), Some(at));

        let later = at + chrono::Duration::seconds(5);
        store.set_checkpoint("docs", later).await.unwrap();
        assert_eq!(store.get_checkpoint("docs").await.unwrap(), Some(later));
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let store = store().await;
        migrate_pool(store.pool()).await.unwrap();
        assert!(store.list_epics().await.unwrap().is_empty());
        assert!(store.list_tasks().await.unwrap().is_empty());
    }
}
