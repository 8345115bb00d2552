use chrono::NaiveDate;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use taskflow_models::*;

use crate::db_ops;
use crate::query::BucketQuery;
use crate::storage::*;

/// SQLite-backed storage implementation.
/// Wraps a `Mutex<Connection>` and delegates to `db_ops` functions.
pub struct SqliteBackend {
    pub conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// A panic while holding the lock leaves the connection usable; SQLite
    /// rolls back any open transaction when its guard is dropped.
    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TaskStore for SqliteBackend {
    fn create_task(&self, owner_id: &str, input: &CreateTask) -> Result<Task, StorageError> {
        db_ops::create_task(&self.lock(), owner_id, input)
    }
    fn create_tasks(
        &self,
        owner_id: &str,
        inputs: &[CreateTask],
    ) -> Result<Vec<Task>, StorageError> {
        db_ops::create_tasks(&self.lock(), owner_id, inputs)
    }
    fn get_task(&self, id: &str, user_id: &str) -> Result<Task, StorageError> {
        db_ops::get_task(&self.lock(), id, user_id)
    }
    fn update_task(
        &self,
        id: &str,
        user_id: &str,
        patch: &UpdateTask,
    ) -> Result<Task, StorageError> {
        db_ops::update_task(&self.lock(), id, user_id, patch)
    }
    fn delete_task(&self, id: &str, user_id: &str) -> Result<(), StorageError> {
        db_ops::delete_task(&self.lock(), id, user_id)
    }

    fn set_priority(
        &self,
        id: &str,
        user_id: &str,
        priority: Priority,
    ) -> Result<Task, StorageError> {
        db_ops::set_priority(&self.lock(), id, user_id, priority)
    }
    fn toggle_complete(&self, id: &str, user_id: &str) -> Result<Task, StorageError> {
        db_ops::toggle_complete(&self.lock(), id, user_id)
    }
    fn set_status(
        &self,
        id: &str,
        user_id: &str,
        status: KanbanStatus,
        schedule: &StatusRequest,
    ) -> Result<Task, StorageError> {
        db_ops::set_status(&self.lock(), id, user_id, status, schedule)
    }
    fn kanban_move(
        &self,
        id: &str,
        user_id: &str,
        status: KanbanStatus,
        schedule: &StatusRequest,
        order: i64,
    ) -> Result<Task, StorageError> {
        db_ops::kanban_move(&self.lock(), id, user_id, status, schedule, order)
    }
    fn set_time_window(
        &self,
        id: &str,
        user_id: &str,
        window: &TimeWindowRequest,
    ) -> Result<Task, StorageError> {
        db_ops::set_time_window(&self.lock(), id, user_id, window)
    }

    fn fetch_bucket(&self, query: &BucketQuery) -> Result<Vec<Task>, StorageError> {
        db_ops::fetch_bucket(&self.lock(), query)
    }
    fn count_bucket(&self, query: &BucketQuery) -> Result<i64, StorageError> {
        db_ops::count_bucket(&self.lock(), query)
    }
    fn tasks_on_date(&self, user_id: &str, day: NaiveDate) -> Result<Vec<Task>, StorageError> {
        db_ops::tasks_on_date(&self.lock(), user_id, day)
    }
    fn tasks_in_range(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Task>, StorageError> {
        db_ops::tasks_in_range(&self.lock(), user_id, from, to)
    }
}

impl UserStore for SqliteBackend {
    fn create_user(&self, input: &CreateUser) -> Result<SessionUser, StorageError> {
        db_ops::create_user(&self.lock(), input)
    }
    fn get_user(&self, id: &str) -> Result<Option<SessionUser>, StorageError> {
        db_ops::get_user(&self.lock(), id)
    }
    fn get_user_by_email(&self, email: &str) -> Result<Option<SessionUser>, StorageError> {
        db_ops::get_user_by_email(&self.lock(), email)
    }
    fn create_session(&self, user_id: &str, ttl_days: i64) -> Result<String, StorageError> {
        db_ops::create_session(&self.lock(), user_id, ttl_days)
    }
    fn user_for_session(&self, token: &str) -> Result<Option<SessionUser>, StorageError> {
        db_ops::user_for_session(&self.lock(), token)
    }
    fn purge_expired_sessions(&self) -> Result<usize, StorageError> {
        db_ops::purge_expired_sessions(&self.lock())
    }
}

impl SubscriptionStore for SqliteBackend {
    fn subscription_for_customer(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<Subscription>, StorageError> {
        db_ops::subscription_for_customer(&self.lock(), stripe_customer_id)
    }
    fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StorageError> {
        db_ops::upsert_subscription(&self.lock(), subscription)
    }
}

impl StorageBackend for SqliteBackend {
    fn checkpoint(&self) -> Result<(), StorageError> {
        self.lock()
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}
