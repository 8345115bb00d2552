//! Task list engine: turns list parameters into one filtered, sorted and
//! paginated query per display bucket and runs them side by side.

use std::sync::Arc;

use rusqlite::types::Value;
use taskflow_models::*;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PaginationConfig;
use crate::dates;
use crate::db;
use crate::storage::{StorageBackend, StorageError};

#[derive(Debug, Error, PartialEq)]
#[error("{0}")]
pub struct QueryError(pub String);

/// Conjunction of SQL clauses over `tasks t`, with positional `?` values in
/// clause order.
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    clauses: Vec<String>,
    values: Vec<Value>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, clause: impl Into<String>, values: impl IntoIterator<Item = Value>) {
        self.clauses.push(clause.into());
        self.values.extend(values);
    }

    pub fn push_sql(&mut self, clause: impl Into<String>) {
        self.clauses.push(clause.into());
    }

    pub fn and(mut self, other: &Predicate) -> Self {
        self.clauses.extend(other.clauses.iter().cloned());
        self.values.extend(other.values.iter().cloned());
        self
    }

    pub fn to_sql(&self) -> String {
        if self.clauses.is_empty() {
            "1=1".to_string()
        } else {
            self.clauses.join(" AND ")
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Tasks owned by or assigned to the user.
pub fn visibility(user_id: &str) -> Predicate {
    let mut p = Predicate::new();
    p.push(
        "(t.user_id = ? OR EXISTS (SELECT 1 FROM task_assignments a WHERE a.task_id = t.id AND a.user_id = ?))",
        [Value::Text(user_id.to_string()), Value::Text(user_id.to_string())],
    );
    p
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.limit as i64
    }

    fn parse(
        page: Option<&str>,
        limit: Option<&str>,
        bucket: Bucket,
        config: &PaginationConfig,
    ) -> Result<Self, QueryError> {
        let page = parse_number(page, &format!("{}Page", bucket.as_str()))?
            .filter(|p| *p >= 1)
            .unwrap_or(1);
        let limit = parse_number(limit, &format!("{}Limit", bucket.as_str()))?
            .filter(|l| *l >= 1)
            .unwrap_or(config.default_limit as i64)
            .min(config.max_limit as i64);
        Ok(Page {
            page: u32::try_from(page).unwrap_or(u32::MAX),
            limit: limit as u32,
        })
    }
}

fn parse_number(raw: Option<&str>, name: &str) -> Result<Option<i64>, QueryError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse::<i64>()
            .map(Some)
            .map_err(|_| QueryError(format!("{} must be a number, got '{}'", name, s))),
    }
}

/// Normalized, inclusive date bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl DateRange {
    /// `dateTo` covers its whole day (up to 23:59:59.999).
    pub fn parse(from: Option<&str>, to: Option<&str>) -> Result<Self, QueryError> {
        let day = |raw: Option<&str>, name: &str| -> Result<_, QueryError> {
            match raw.map(str::trim) {
                None | Some("") => Ok(None),
                Some(s) => dates::parse_day(s)
                    .map(Some)
                    .ok_or_else(|| QueryError(format!("Invalid {}: '{}'", name, s))),
            }
        };
        let from = day(from, "dateFrom")?.map(dates::start_of_day);
        let to = day(to, "dateTo")?.map(dates::end_of_day);
        Ok(DateRange { from, to })
    }

    pub fn is_empty(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    fn bounds(&self) -> (Vec<String>, Vec<Value>) {
        let mut clauses = vec![];
        let mut values = vec![];
        if let Some(ref from) = self.from {
            clauses.push("t.date >= ?".to_string());
            values.push(Value::Text(from.clone()));
        }
        if let Some(ref to) = self.to {
            clauses.push("t.date <= ?".to_string());
            values.push(Value::Text(to.clone()));
        }
        (clauses, values)
    }
}

/// Validated list parameters.
#[derive(Debug, Clone)]
pub struct TaskQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub scheduled: ScheduledFilter,
    pub dates: DateRange,
    pages: [(Bucket, Page); 4],
}

/// `None`, empty and the `all` sentinel mean "no filter".
fn filter_value(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|v| !v.is_empty() && *v != "all")
}

impl TaskQuery {
    pub fn from_params(params: &TaskListQuery, config: &PaginationConfig) -> Result<Self, QueryError> {
        let priority = match filter_value(params.priority.as_deref()) {
            Some(p) => Some(
                Priority::from_str(p)
                    .ok_or_else(|| QueryError(format!("Invalid priority filter: '{}'", p)))?,
            ),
            None => None,
        };
        let mut pages = [(Bucket::Todo, Page { page: 1, limit: config.default_limit }); 4];
        for (slot, bucket) in pages.iter_mut().zip(Bucket::ALL) {
            let (page, limit) = params.page_params(bucket);
            *slot = (bucket, Page::parse(page, limit, bucket, config)?);
        }
        Ok(TaskQuery {
            search: params
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            category: filter_value(params.category.as_deref()).map(str::to_string),
            priority,
            scheduled: ScheduledFilter::parse(params.scheduled.as_deref()),
            dates: DateRange::parse(params.date_from.as_deref(), params.date_to.as_deref())?,
            pages,
        })
    }

    pub fn page(&self, bucket: Bucket) -> Page {
        self.pages
            .iter()
            .find(|(b, _)| *b == bucket)
            .map(|(_, p)| *p)
            .unwrap_or(Page { page: 1, limit: 1 })
    }

    /// Visibility plus the filters shared by every bucket.
    fn shared_predicate(&self, user_id: &str) -> Predicate {
        let mut p = visibility(user_id);
        if let Some(ref search) = self.search {
            // Both sides fold with the same Unicode rules.
            let pattern = format!("%{}%", escape_like(&search.to_lowercase()));
            p.push(
                format!(
                    "({f}(t.title) LIKE ? ESCAPE '\\' OR {f}(COALESCE(t.description, '')) LIKE ? ESCAPE '\\')",
                    f = db::CASEFOLD_FN
                ),
                [Value::Text(pattern.clone()), Value::Text(pattern)],
            );
        }
        if let Some(ref category) = self.category {
            p.push("t.category = ?", [Value::Text(category.clone())]);
        }
        if let Some(priority) = self.priority {
            p.push("t.priority = ?", [Value::Text(priority.as_str().to_string())]);
        }
        p
    }

    fn bucket_predicate(&self, bucket: Bucket) -> Predicate {
        let mut p = Predicate::new();
        match bucket {
            Bucket::Todo => p.push_sql(
                "t.completed = 0 AND t.scheduled = 1 AND (t.status IS NULL OR t.status <> 'inprogress')",
            ),
            Bucket::InProgress => {
                p.push_sql("t.completed = 0 AND t.scheduled = 1 AND t.status = 'inprogress'")
            }
            Bucket::Completed => p.push_sql("t.completed = 1"),
            Bucket::Unscheduled => p.push_sql("t.completed = 0 AND t.scheduled = 0"),
        }
        if self.dates.is_empty() {
            return p;
        }
        let (clauses, values) = self.dates.bounds();
        if bucket == Bucket::Unscheduled {
            // Tasks without a date always pass the range on this bucket.
            p.push(format!("(t.date IS NULL OR ({}))", clauses.join(" AND ")), values);
        } else {
            p.push(clauses.join(" AND "), values);
        }
        p
    }
}

pub fn order_by(bucket: Bucket) -> &'static str {
    match bucket {
        Bucket::Todo | Bucket::InProgress => {
            "t.date IS NULL, t.date ASC, t.created_at ASC, t.rowid ASC"
        }
        Bucket::Completed => "t.date IS NULL, t.date DESC, t.created_at DESC, t.rowid DESC",
        Bucket::Unscheduled => "t.created_at DESC, t.rowid DESC",
    }
}

/// One fetch + count pair.
#[derive(Debug, Clone)]
pub struct BucketQuery {
    pub bucket: Bucket,
    pub predicate: Predicate,
    pub order_by: &'static str,
    pub page: Page,
}

/// Buckets suppressed by the `scheduled` parameter are left out of the plan.
pub fn plan(query: &TaskQuery, user_id: &str) -> Vec<BucketQuery> {
    let shared = query.shared_predicate(user_id);
    Bucket::ALL
        .into_iter()
        .filter(|b| query.scheduled.includes(*b))
        .map(|bucket| BucketQuery {
            bucket,
            predicate: shared.clone().and(&query.bucket_predicate(bucket)),
            order_by: order_by(bucket),
            page: query.page(bucket),
        })
        .collect()
}

/// Run every planned fetch and count concurrently. Each query sees its own
/// snapshot; there is no consistent read across buckets.
pub async fn list_tasks(
    storage: Arc<dyn StorageBackend>,
    query: &TaskQuery,
    user_id: &str,
) -> Result<TaskListResponse, StorageError> {
    run_plan(storage, plan(query, user_id)).await
}

/// Every spawned query is awaited even after a failure, so none is left
/// queued on the connection once the request returns. The first error wins.
pub async fn run_plan(
    storage: Arc<dyn StorageBackend>,
    plan: Vec<BucketQuery>,
) -> Result<TaskListResponse, StorageError> {
    let mut pending = Vec::new();
    for bucket_query in plan {
        let bucket_query = Arc::new(bucket_query);
        let fetch = {
            let storage = storage.clone();
            let q = bucket_query.clone();
            tokio::task::spawn_blocking(move || storage.fetch_bucket(&q))
        };
        let count = {
            let storage = storage.clone();
            let q = bucket_query.clone();
            tokio::task::spawn_blocking(move || storage.count_bucket(&q))
        };
        pending.push((bucket_query.bucket, fetch, count));
    }

    let mut response = TaskListResponse {
        success: true,
        ..Default::default()
    };
    let mut failure = None;
    for (bucket, fetch, count) in pending {
        let tasks = fetch.await.map_err(StorageError::from).and_then(|r| r);
        let total = count.await.map_err(StorageError::from).and_then(|r| r);
        match (tasks, total) {
            (Ok(tasks), Ok(total)) => {
                debug!(bucket = bucket.as_str(), returned = tasks.len(), total, "bucket loaded");
                response.set_bucket(bucket, tasks, total);
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(bucket = bucket.as_str(), error = %e, "bucket query failed");
                failure.get_or_insert(e);
            }
        }
    }
    if let Some(e) = failure {
        return Err(e);
    }

    response.message = if response.is_empty() {
        "No tasks found".to_string()
    } else {
        "Tasks retrieved".to_string()
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sqlite::SqliteBackend;
    use crate::storage::{TaskStore, UserStore};
    use std::sync::Mutex;

    fn params() -> TaskListQuery {
        TaskListQuery::default()
    }

    fn query(p: &TaskListQuery) -> TaskQuery {
        TaskQuery::from_params(p, &PaginationConfig::default()).unwrap()
    }

    fn backend() -> Arc<SqliteBackend> {
        let conn = db::init_db(":memory:").unwrap();
        Arc::new(SqliteBackend::new(Arc::new(Mutex::new(conn))))
    }

    fn user(storage: &SqliteBackend, name: &str) -> String {
        storage
            .create_user(&CreateUser::new(name, format!("{}@example.com", name)))
            .unwrap()
            .id
    }

    #[test]
    fn pagination_defaults_come_from_config() {
        let q = query(&params());
        assert_eq!(q.page(Bucket::Todo), Page { page: 1, limit: 2 });

        let config = PaginationConfig { default_limit: 10, max_limit: 20 };
        let mut p = params();
        p.completed_limit = Some("500".to_string());
        p.completed_page = Some("0".to_string());
        let q = TaskQuery::from_params(&p, &config).unwrap();
        assert_eq!(q.page(Bucket::Todo).limit, 10);
        assert_eq!(q.page(Bucket::Completed), Page { page: 1, limit: 20 });
    }

    #[test]
    fn non_numeric_paging_is_rejected() {
        let mut p = params();
        p.todo_page = Some("two".to_string());
        let err = TaskQuery::from_params(&p, &PaginationConfig::default()).unwrap_err();
        assert!(err.0.contains("todoPage"));
    }

    #[test]
    fn all_sentinel_disables_filters() {
        let mut p = params();
        p.category = Some("all".to_string());
        p.priority = Some("all".to_string());
        let q = query(&p);
        assert!(q.category.is_none());
        assert!(q.priority.is_none());
    }

    #[test]
    fn page_offset() {
        assert_eq!(Page { page: 2, limit: 2 }.offset(), 2);
        assert_eq!(Page { page: 1, limit: 5 }.offset(), 0);
    }

    #[test]
    fn scheduled_filter_prunes_plan() {
        let mut p = params();
        p.scheduled = Some("unscheduled".to_string());
        let buckets: Vec<Bucket> = plan(&query(&p), "u1").iter().map(|b| b.bucket).collect();
        assert_eq!(buckets, vec![Bucket::Completed, Bucket::Unscheduled]);

        p.scheduled = Some("scheduled".to_string());
        let buckets: Vec<Bucket> = plan(&query(&p), "u1").iter().map(|b| b.bucket).collect();
        assert_eq!(buckets, vec![Bucket::Todo, Bucket::InProgress, Bucket::Completed]);
    }

    #[test]
    fn unscheduled_date_range_admits_null_dates() {
        let mut p = params();
        p.date_from = Some("2024-01-01".to_string());
        p.date_to = Some("2024-01-31".to_string());
        let q = query(&p);
        assert_eq!(q.dates.to.as_deref(), Some("2024-01-31T23:59:59.999Z"));

        let planned = plan(&q, "u1");
        let unscheduled = planned.iter().find(|b| b.bucket == Bucket::Unscheduled).unwrap();
        assert!(unscheduled
            .predicate
            .to_sql()
            .contains("(t.date IS NULL OR (t.date >= ? AND t.date <= ?))"));
        let todo = planned.iter().find(|b| b.bucket == Bucket::Todo).unwrap();
        assert!(!todo.predicate.to_sql().contains("t.date IS NULL"));
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[tokio::test]
    async fn buckets_partition_tasks() {
        let storage = backend();
        let u1 = user(&storage, "ada");

        let a = storage
            .create_task(
                &u1,
                &CreateTask::new("Write report")
                    .scheduled_on("2024-03-01")
                    .with_priority("high")
                    .with_category("work"),
            )
            .unwrap();
        let b = storage.create_task(&u1, &CreateTask::new("Someday").unscheduled()).unwrap();
        let c = storage
            .create_task(&u1, &CreateTask::new("Done already").unscheduled().completed())
            .unwrap();
        let d = storage
            .create_task(
                &u1,
                &CreateTask::new("Started").scheduled_on("2024-03-02").with_status("inprogress"),
            )
            .unwrap();

        let mut p = params();
        p.category = Some("work".to_string());
        let listed = list_tasks(storage.clone(), &query(&p), &u1).await.unwrap();
        assert_eq!(listed.todo_total, 1);
        assert_eq!(listed.todo[0].id, a.id);
        assert_eq!(listed.unscheduled_total, 0);

        let listed = list_tasks(storage.clone(), &query(&params()), &u1).await.unwrap();
        assert_eq!(listed.todo.iter().map(|t| &t.id).collect::<Vec<_>>(), vec![&a.id]);
        assert_eq!(listed.unscheduled.iter().map(|t| &t.id).collect::<Vec<_>>(), vec![&b.id]);
        assert_eq!(listed.completed.iter().map(|t| &t.id).collect::<Vec<_>>(), vec![&c.id]);
        assert_eq!(listed.inprogress.iter().map(|t| &t.id).collect::<Vec<_>>(), vec![&d.id]);
    }

    #[tokio::test]
    async fn second_page_holds_the_remainder() {
        let storage = backend();
        let u1 = user(&storage, "ada");
        for day in ["2024-03-01", "2024-03-02", "2024-03-03"] {
            storage
                .create_task(&u1, &CreateTask::new(format!("Task {}", day)).scheduled_on(day))
                .unwrap();
        }
        let mut p = params();
        p.todo_page = Some("2".to_string());
        p.todo_limit = Some("2".to_string());
        let listed = list_tasks(storage.clone(), &query(&p), &u1).await.unwrap();
        assert_eq!(listed.todo_total, 3);
        assert_eq!(listed.todo.len(), 1);
        assert_eq!(listed.todo[0].title, "Task 2024-03-03");
    }

    #[tokio::test]
    async fn search_is_case_insensitive_over_title_and_description() {
        let storage = backend();
        let u1 = user(&storage, "ada");
        storage
            .create_task(&u1, &CreateTask::new("Quarterly REPORT").scheduled_on("2024-03-01"))
            .unwrap();
        storage
            .create_task(
                &u1,
                &CreateTask::new("Email")
                    .with_description("attach the report")
                    .scheduled_on("2024-03-02"),
            )
            .unwrap();
        storage
            .create_task(&u1, &CreateTask::new("Groceries").scheduled_on("2024-03-03"))
            .unwrap();

        let mut p = params();
        p.search = Some("Report".to_string());
        p.todo_limit = Some("10".to_string());
        let listed = list_tasks(storage.clone(), &query(&p), &u1).await.unwrap();
        assert_eq!(listed.todo_total, 2);
    }

    #[tokio::test]
    async fn search_folds_non_ascii_case() {
        let storage = backend();
        let u1 = user(&storage, "ada");
        storage
            .create_task(&u1, &CreateTask::new("CAFÉ meeting").scheduled_on("2024-03-01"))
            .unwrap();
        storage
            .create_task(&u1, &CreateTask::new("Überprüfung").scheduled_on("2024-03-02"))
            .unwrap();

        for (term, expected) in [
            ("café", "CAFÉ meeting"),
            ("CAFÉ", "CAFÉ meeting"),
            ("überprüfung", "Überprüfung"),
            ("ÜBERPRÜFUNG", "Überprüfung"),
        ] {
            let mut p = params();
            p.search = Some(term.to_string());
            let listed = list_tasks(storage.clone(), &query(&p), &u1).await.unwrap();
            assert_eq!(listed.todo_total, 1, "{term}");
            assert_eq!(listed.todo[0].title, expected);
        }
    }

    #[tokio::test]
    async fn failing_bucket_fails_the_list_and_leaves_storage_usable() {
        let storage = backend();
        let u1 = user(&storage, "ada");
        storage
            .create_task(&u1, &CreateTask::new("Plan").scheduled_on("2024-03-01"))
            .unwrap();

        let q = query(&params());
        let mut buckets = plan(&q, &u1);
        buckets[0].predicate.push_sql("t.no_such_column = 1");
        let err = run_plan(storage.clone(), buckets).await.unwrap_err();
        assert!(matches!(err, StorageError::Database(_)));

        // Later buckets were still awaited; nothing is holding the connection.
        let listed = list_tasks(storage.clone(), &q, &u1).await.unwrap();
        assert_eq!(listed.todo_total, 1);
        assert_eq!(listed.message, "Tasks retrieved");
    }

    #[tokio::test]
    async fn other_users_tasks_are_invisible() {
        let storage = backend();
        let u1 = user(&storage, "ada");
        let u2 = user(&storage, "bob");
        storage.create_task(&u1, &CreateTask::new("Private").unscheduled()).unwrap();
        storage
            .create_task(&u1, &CreateTask::new("Shared").unscheduled().assigned_to(&[u2.as_str()]))
            .unwrap();

        let listed = list_tasks(storage.clone(), &query(&params()), &u2).await.unwrap();
        assert_eq!(listed.unscheduled_total, 1);
        assert_eq!(listed.unscheduled[0].title, "Shared");
        assert_eq!(listed.unscheduled[0].assigned_to[0].name, "bob");
    }

    #[tokio::test]
    async fn suppressed_buckets_are_empty() {
        let storage = backend();
        let u1 = user(&storage, "ada");
        storage
            .create_task(&u1, &CreateTask::new("Dated").scheduled_on("2024-03-01"))
            .unwrap();
        let mut p = params();
        p.scheduled = Some("unscheduled".to_string());
        let listed = list_tasks(storage.clone(), &query(&p), &u1).await.unwrap();
        assert_eq!(listed.todo_total, 0);
        assert!(listed.todo.is_empty());
        assert_eq!(listed.message, "No tasks found");
    }
}
