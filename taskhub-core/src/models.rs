use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A tracked task. Serialized field names match the stored snapshot blob
/// (camelCase keys under the `tasks_v1` storage key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique, assigned at creation, immutable afterwards.
    pub id: i64,
    /// 1-based position within the task's bucket. Recomputed on every
    /// structural change to the bucket; carries no meaning beyond the
    /// current array order.
    pub sequence: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub priority: Priority,
}

impl Task {
    pub fn bucket(&self) -> Bucket {
        if self.completed {
            Bucket::Completed
        } else {
            Bucket::Pending
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// The two partitions of the collection, determined solely by `completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Pending,
    Completed,
}

/// A task that was removed from the collection, kept in the separate
/// history store together with deletion metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedTask {
    #[serde(flatten)]
    pub task: Task,
    pub deleted_at: DateTime<Utc>,
    pub deleted_by: String,
}

/// Renumber both buckets so each forms a contiguous 1..N run in current
/// array order.
pub fn resequence(tasks: &mut [Task]) {
    let mut pending = 0u32;
    let mut completed = 0u32;
    for task in tasks.iter_mut() {
        if task.completed {
            completed += 1;
            task.sequence = completed;
        } else {
            pending += 1;
            task.sequence = pending;
        }
    }
}

pub fn bucket_tasks(tasks: &[Task], bucket: Bucket) -> Vec<&Task> {
    tasks.iter().filter(|t| t.bucket() == bucket).collect()
}

/// Tasks that have been completed at least once and not reopened since.
/// A derived read-only projection, not a separate record of past states.
pub fn completed_history(tasks: &[Task]) -> Vec<&Task> {
    tasks.iter().filter(|t| t.completed_at.is_some()).collect()
}
