pub mod sqlite;

use chrono::NaiveDate;
use taskflow_models::*;
use thiserror::Error;

use crate::query::BucketQuery;

/// Error type for storage operations.
///
/// `NotFound` covers both "no such task" and "not visible to the caller";
/// callers cannot tell the two apart.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Invalid(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("background query failed: {0}")]
    Background(#[from] tokio::task::JoinError),
}

impl StorageError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        StorageError::Invalid(msg.into())
    }
}

// --- Storage Traits ---

pub trait TaskStore: Send + Sync {
    fn create_task(&self, owner_id: &str, input: &CreateTask) -> Result<Task, StorageError>;
    /// All-or-nothing: one failing task rolls back the whole batch.
    fn create_tasks(&self, owner_id: &str, inputs: &[CreateTask])
        -> Result<Vec<Task>, StorageError>;
    fn get_task(&self, id: &str, user_id: &str) -> Result<Task, StorageError>;
    fn update_task(&self, id: &str, user_id: &str, patch: &UpdateTask)
        -> Result<Task, StorageError>;
    fn delete_task(&self, id: &str, user_id: &str) -> Result<(), StorageError>;

    // Transitions
    fn set_priority(&self, id: &str, user_id: &str, priority: Priority)
        -> Result<Task, StorageError>;
    fn toggle_complete(&self, id: &str, user_id: &str) -> Result<Task, StorageError>;
    fn set_status(
        &self,
        id: &str,
        user_id: &str,
        status: KanbanStatus,
        schedule: &StatusRequest,
    ) -> Result<Task, StorageError>;
    fn kanban_move(
        &self,
        id: &str,
        user_id: &str,
        status: KanbanStatus,
        schedule: &StatusRequest,
        order: i64,
    ) -> Result<Task, StorageError>;
    fn set_time_window(
        &self,
        id: &str,
        user_id: &str,
        window: &TimeWindowRequest,
    ) -> Result<Task, StorageError>;

    // Listing
    fn fetch_bucket(&self, query: &BucketQuery) -> Result<Vec<Task>, StorageError>;
    fn count_bucket(&self, query: &BucketQuery) -> Result<i64, StorageError>;
    fn tasks_on_date(&self, user_id: &str, day: NaiveDate) -> Result<Vec<Task>, StorageError>;
    fn tasks_in_range(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Task>, StorageError>;
}

pub trait UserStore: Send + Sync {
    fn create_user(&self, input: &CreateUser) -> Result<SessionUser, StorageError>;
    fn get_user(&self, id: &str) -> Result<Option<SessionUser>, StorageError>;
    fn get_user_by_email(&self, email: &str) -> Result<Option<SessionUser>, StorageError>;
    /// Returns the raw token; only its hash is stored.
    fn create_session(&self, user_id: &str, ttl_days: i64) -> Result<String, StorageError>;
    fn user_for_session(&self, token: &str) -> Result<Option<SessionUser>, StorageError>;
    fn purge_expired_sessions(&self) -> Result<usize, StorageError>;
}

pub trait SubscriptionStore: Send + Sync {
    fn subscription_for_customer(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<Subscription>, StorageError>;
    fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StorageError>;
}

/// Super-trait combining all domain stores.
pub trait StorageBackend: TaskStore + UserStore + SubscriptionStore {
    /// Flush the write-ahead log before shutdown.
    fn checkpoint(&self) -> Result<(), StorageError>;
}
