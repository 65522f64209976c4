use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use taskhub_core::models::{DeletedTask, Task};
use taskhub_core::protocol::tasks_json;

use crate::errors::{SyncClientError, SyncResult};
use crate::queries::{Queries, HISTORY_KEY, LAST_MODIFIED_KEY, TASKS_KEY};

/// Persistence adapter: durably stores the full task collection and a
/// companion last-modified stamp. Every save is a whole-collection
/// overwrite; concurrent writers racing on the same key are last-write-wins
/// at this layer.
pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    pub async fn open(database_url: &str) -> SyncResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::query(Queries::SCHEMA).execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Overwrite the stored collection and stamp the write time. Returns
    /// the recorded wall-clock millis so the caller can broadcast the same
    /// timestamp it persisted.
    pub async fn save(&self, tasks: &[Task]) -> SyncResult<i64> {
        let blob = tasks_json(tasks)?;
        let timestamp = Utc::now().timestamp_millis();

        let mut tx = self.pool.begin().await?;
        sqlx::query(Queries::PUT_VALUE)
            .bind(TASKS_KEY)
            .bind(&blob)
            .execute(&mut *tx)
            .await?;
        sqlx::query(Queries::PUT_VALUE)
            .bind(LAST_MODIFIED_KEY)
            .bind(timestamp.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(timestamp, count = tasks.len(), "saved task snapshot");
        Ok(timestamp)
    }

    /// Read the stored collection. A missing blob yields an empty
    /// collection; an unparseable one is discarded and reset to empty.
    pub async fn load(&self) -> SyncResult<Vec<Task>> {
        let Some(blob) = self.get(TASKS_KEY).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str::<Vec<Task>>(&blob) {
            Ok(tasks) => Ok(tasks),
            Err(e) => {
                tracing::error!("corrupted task snapshot, resetting to empty: {}", e);
                self.save(&[]).await?;
                Ok(Vec::new())
            }
        }
    }

    /// Wall-clock millis of the last save, if any save has happened.
    pub async fn last_modified(&self) -> SyncResult<Option<i64>> {
        let Some(value) = self.get(LAST_MODIFIED_KEY).await? else {
            return Ok(None);
        };
        value
            .parse::<i64>()
            .map(Some)
            .map_err(|e| SyncClientError::InvalidState(format!("bad last-modified stamp: {e}")))
    }

    /// Append a deletion record to the separate history store.
    pub async fn append_deleted(&self, record: &DeletedTask) -> SyncResult<()> {
        let mut history = self.deleted_tasks().await?;
        history.push(record.clone());
        let blob = serde_json::to_string(&history)?;

        sqlx::query(Queries::PUT_VALUE)
            .bind(HISTORY_KEY)
            .bind(&blob)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn deleted_tasks(&self) -> SyncResult<Vec<DeletedTask>> {
        let Some(blob) = self.get(HISTORY_KEY).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&blob) {
            Ok(records) => Ok(records),
            Err(e) => {
                tracing::error!("corrupted history blob, starting fresh: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        let row = sqlx::query(Queries::GET_VALUE)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskhub_core::models::Priority;
    use uuid::Uuid;

    async fn memory_store() -> SnapshotStore {
        let url = format!("file:{}?mode=memory&cache=shared", Uuid::new_v4());
        SnapshotStore::open(&url).await.unwrap()
    }

    fn task(id: i64) -> Task {
        Task {
            id,
            sequence: 1,
            title: format!("task {id}"),
            description: "notes".to_string(),
            start_date: Some(Utc::now()),
            end_date: None,
            completed: false,
            created_at: Utc::now(),
            created_by: "tester".to_string(),
            completed_at: None,
            priority: Priority::High,
        }
    }

    #[tokio::test]
    async fn load_of_empty_store_yields_empty_collection() {
        let store = memory_store().await;
        assert!(store.load().await.unwrap().is_empty());
        assert_eq!(store.last_modified().await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = memory_store().await;
        let tasks = vec![task(1), task(2)];

        let timestamp = store.save(&tasks).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded, tasks);
        assert_eq!(store.last_modified().await.unwrap(), Some(timestamp));
    }

    #[tokio::test]
    async fn saving_what_was_loaded_keeps_the_blob_identical() {
        let store = memory_store().await;
        store.save(&[task(1)]).await.unwrap();

        let first_blob = store.get(TASKS_KEY).await.unwrap().unwrap();
        let loaded = store.load().await.unwrap();
        store.save(&loaded).await.unwrap();
        let second_blob = store.get(TASKS_KEY).await.unwrap().unwrap();

        assert_eq!(first_blob, second_blob);
    }

    #[tokio::test]
    async fn corrupted_blob_resets_to_empty() {
        let store = memory_store().await;
        store.save(&[task(1)]).await.unwrap();

        sqlx::query(Queries::PUT_VALUE)
            .bind(TASKS_KEY)
            .bind("{definitely not json")
            .execute(&store.pool)
            .await
            .unwrap();

        assert!(store.load().await.unwrap().is_empty());
        // the reset is itself persisted
        let blob = store.get(TASKS_KEY).await.unwrap().unwrap();
        assert_eq!(blob, "[]");
    }

    #[tokio::test]
    async fn deletion_history_accumulates() {
        let store = memory_store().await;
        assert!(store.deleted_tasks().await.unwrap().is_empty());

        for id in [1, 2] {
            store
                .append_deleted(&DeletedTask {
                    task: task(id),
                    deleted_at: Utc::now(),
                    deleted_by: "tester".to_string(),
                })
                .await
                .unwrap();
        }

        let history = store.deleted_tasks().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].task.id, 1);
        assert_eq!(history[1].task.id, 2);
    }
}
