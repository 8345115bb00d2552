use chrono::{Duration, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use taskflow_models::*;

use crate::dates;
use crate::policy::TaskOperation;
use crate::query::{self, BucketQuery, Page, Predicate};
use crate::storage::StorageError;

type Result<T> = std::result::Result<T, StorageError>;

/// Longest ancestor chain accepted when linking a task to a parent.
pub const MAX_PARENT_DEPTH: usize = 32;

// --- Helpers ---

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn hash_token(token: &str) -> String {
    sha256_hex(token)
}

fn normalize_ts(raw: Option<&str>, field: &str) -> Result<Option<String>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => dates::normalize(s)
            .map(Some)
            .ok_or_else(|| StorageError::invalid(format!("Invalid {}: '{}'", field, s))),
    }
}

fn parse_priority(raw: &str) -> Result<Priority> {
    Priority::from_str(raw.trim())
        .ok_or_else(|| StorageError::invalid(format!("Invalid priority: '{}'", raw)))
}

fn parse_status(raw: &str) -> Result<KanbanStatus> {
    KanbanStatus::from_str(raw.trim())
        .ok_or_else(|| StorageError::invalid(format!("Invalid status: '{}'", raw)))
}

fn check_order(order: i64) -> Result<i64> {
    if order < 1 {
        return Err(StorageError::invalid(format!(
            "Order must be a positive number, got {}",
            order
        )));
    }
    Ok(order)
}

fn check_duration(duration: Option<i64>) -> Result<Option<i64>> {
    match duration {
        Some(d) if d < 0 => Err(StorageError::invalid("Duration cannot be negative")),
        other => Ok(other),
    }
}

/// A `completed` status completes the task but keeps its prior workflow
/// status; any other status is stored verbatim.
fn resolve_state(
    completed: bool,
    scheduled: bool,
    status: Option<KanbanStatus>,
    prior_status: Option<&str>,
) -> TaskState {
    match status {
        Some(KanbanStatus::Completed) => TaskState::from_legacy(true, scheduled, prior_status),
        Some(s) => TaskState::from_legacy(completed, scheduled, Some(s.as_str())),
        None => TaskState::from_legacy(completed, scheduled, prior_status),
    }
}

// --- Tags, resources, assignments ---

fn load_tags(conn: &Connection, task_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT tag FROM task_tags WHERE task_id = ?1 ORDER BY tag")?;
    let tags = stmt
        .query_map(params![task_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(tags)
}

fn save_tags(conn: &Connection, task_id: &str, tags: &[String]) -> Result<()> {
    conn.execute("DELETE FROM task_tags WHERE task_id = ?1", params![task_id])?;
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO task_tags (task_id, tag) VALUES (?1, ?2)")?;
    for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        stmt.execute(params![task_id, tag])?;
    }
    Ok(())
}

fn load_resources(conn: &Connection, task_id: &str) -> Result<Vec<Resource>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, resource_type, category, url FROM task_resources
         WHERE task_id = ?1 ORDER BY position",
    )?;
    let resources = stmt
        .query_map(params![task_id], |row| {
            let category: String = row.get(3)?;
            Ok(Resource {
                id: row.get(0)?,
                name: row.get(1)?,
                resource_type: row.get(2)?,
                category: ResourceCategory::from_str(&category).unwrap_or(ResourceCategory::Note),
                url: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(resources)
}

/// Replace-all: every existing resource is dropped, ids are not preserved.
fn replace_resources(conn: &Connection, task_id: &str, resources: &[NewResource]) -> Result<()> {
    conn.execute("DELETE FROM task_resources WHERE task_id = ?1", params![task_id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO task_resources (id, task_id, position, name, resource_type, category, url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for (position, r) in resources.iter().enumerate() {
        if r.name.trim().is_empty() {
            return Err(StorageError::invalid("Resource name is required"));
        }
        stmt.execute(params![
            Uuid::new_v4().to_string(),
            task_id,
            position as i64,
            r.name.trim(),
            r.resource_type,
            r.category.as_str(),
            r.url,
        ])?;
    }
    Ok(())
}

fn load_assignees(conn: &Connection, task_id: &str) -> Result<Vec<AssignedUser>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.name, u.image FROM task_assignments a
         JOIN users u ON u.id = a.user_id
         WHERE a.task_id = ?1 ORDER BY a.rowid",
    )?;
    let users = stmt
        .query_map(params![task_id], |row| {
            Ok(AssignedUser {
                id: row.get(0)?,
                name: row.get(1)?,
                profile_pic: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(users)
}

/// Replace-all. Unknown user ids are rejected; duplicates collapse.
fn replace_assignees(conn: &Connection, task_id: &str, assignees: &[AssigneeRef]) -> Result<()> {
    conn.execute("DELETE FROM task_assignments WHERE task_id = ?1", params![task_id])?;
    let now = dates::now();
    for user_id in assignees.iter().map(|a| a.id().trim()) {
        if get_user(conn, user_id)?.is_none() {
            return Err(StorageError::invalid(format!("Unknown assignee: '{}'", user_id)));
        }
        conn.execute(
            "INSERT OR IGNORE INTO task_assignments (task_id, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![task_id, user_id, now],
        )?;
    }
    Ok(())
}

// --- Tasks ---

const TASK_COLS_T: &str = "t.id, t.title, t.description, t.priority, t.category, t.completed, t.scheduled, t.status, t.date, t.start_time, t.end_time, t.duration, t.sort_order, t.parent_id, t.user_id, t.created_at, t.updated_at";

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        priority: row.get(3)?,
        category: row.get(4)?,
        completed: row.get(5)?,
        scheduled: row.get(6)?,
        status: row.get(7)?,
        date: row.get(8)?,
        start_time: row.get(9)?,
        end_time: row.get(10)?,
        duration: row.get(11)?,
        order: row.get(12)?,
        tags: vec![],
        parent_id: row.get(13)?,
        user_id: row.get(14)?,
        resources: vec![],
        assigned_to: vec![],
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

fn hydrate(conn: &Connection, mut task: Task) -> Result<Task> {
    task.tags = load_tags(conn, &task.id)?;
    task.resources = load_resources(conn, &task.id)?;
    task.assigned_to = load_assignees(conn, &task.id)?;
    Ok(task)
}

/// Load without any access check.
fn load_task(conn: &Connection, id: &str) -> Result<Option<Task>> {
    let sql = format!("SELECT {} FROM tasks t WHERE t.id = ?1", TASK_COLS_T);
    match conn.query_row(&sql, params![id], row_to_task).optional()? {
        Some(task) => Ok(Some(hydrate(conn, task)?)),
        None => Ok(None),
    }
}

/// Load a task for `op`. Missing tasks and refused access both yield NotFound.
pub fn authorize(conn: &Connection, id: &str, user_id: &str, op: TaskOperation) -> Result<Task> {
    let task = load_task(conn, id)?.ok_or(StorageError::NotFound)?;
    let assignees = task.assigned_to.iter().map(|u| u.id.as_str());
    if op.access().permits(&task.user_id, assignees, user_id) {
        Ok(task)
    } else {
        tracing::debug!(task_id = id, user_id, op = op.as_str(), "access refused");
        Err(StorageError::NotFound)
    }
}

/// The parent must be visible to the writer, and linking must not close a
/// cycle or exceed [`MAX_PARENT_DEPTH`].
pub fn ensure_parent_allowed(
    conn: &Connection,
    task_id: Option<&str>,
    parent_id: &str,
    user_id: &str,
) -> Result<()> {
    if task_id == Some(parent_id) {
        return Err(StorageError::invalid("A task cannot be its own parent"));
    }
    let parent = match authorize(conn, parent_id, user_id, TaskOperation::Read) {
        Ok(parent) => parent,
        Err(StorageError::NotFound) => {
            return Err(StorageError::invalid(format!("Parent task not found: '{}'", parent_id)))
        }
        Err(e) => return Err(e),
    };

    let mut depth = 1;
    let mut current = parent.parent_id;
    while let Some(ancestor) = current {
        if task_id == Some(ancestor.as_str()) {
            return Err(StorageError::invalid("Parent link would create a cycle"));
        }
        depth += 1;
        if depth > MAX_PARENT_DEPTH {
            return Err(StorageError::invalid(format!(
                "Task hierarchy deeper than {} levels",
                MAX_PARENT_DEPTH
            )));
        }
        current = conn
            .query_row(
                "SELECT parent_id FROM tasks WHERE id = ?1",
                params![ancestor],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
    }
    Ok(())
}

fn insert_task(conn: &Connection, owner_id: &str, input: &CreateTask) -> Result<String> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(StorageError::invalid("Title is required"));
    }
    let priority = match input.priority.as_deref() {
        Some(p) => parse_priority(p)?,
        None => Priority::Medium,
    };
    let category = input
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CATEGORY);
    let date = normalize_ts(input.date.as_deref(), "date")?;
    let start_time = normalize_ts(input.start_time.as_deref(), "startTime")?;
    let end_time = normalize_ts(input.end_time.as_deref(), "endTime")?;
    let duration = check_duration(input.duration)?;
    let order = check_order(input.order.unwrap_or(DEFAULT_KANBAN_ORDER))?;
    let status = input.status.as_deref().map(parse_status).transpose()?;

    // Without an explicit flag a task is scheduled exactly when it has a date.
    let scheduled = input.scheduled.unwrap_or(date.is_some());
    let state = resolve_state(input.completed.unwrap_or(false), scheduled, status, None);
    let p = state.projection();

    if let Some(ref parent_id) = input.parent_id {
        if !parent_id.trim().is_empty() {
            ensure_parent_allowed(conn, None, parent_id.trim(), owner_id)?;
        }
    }
    let parent_id = input
        .parent_id
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    let id = Uuid::new_v4().to_string();
    let now = dates::now();
    conn.execute(
        "INSERT INTO tasks (id, user_id, parent_id, title, description, priority, category, completed, scheduled, status, date, start_time, end_time, duration, sort_order, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            id,
            owner_id,
            parent_id,
            title,
            input.description,
            priority.as_str(),
            category,
            p.completed,
            p.scheduled,
            p.status,
            date,
            start_time,
            end_time,
            duration,
            order,
            now,
            now,
        ],
    )?;

    if let Some(ref tags) = input.tags {
        save_tags(conn, &id, tags)?;
    }
    if let Some(ref resources) = input.resources {
        replace_resources(conn, &id, resources)?;
    }
    if let Some(ref assignees) = input.assigned_to {
        replace_assignees(conn, &id, assignees)?;
    }
    Ok(id)
}

pub fn create_task(conn: &Connection, owner_id: &str, input: &CreateTask) -> Result<Task> {
    let tx = conn.unchecked_transaction()?;
    let id = insert_task(&tx, owner_id, input)?;
    tx.commit()?;
    load_task(conn, &id)?.ok_or(StorageError::NotFound)
}

/// One transaction for the whole batch.
pub fn create_tasks(conn: &Connection, owner_id: &str, inputs: &[CreateTask]) -> Result<Vec<Task>> {
    let tx = conn.unchecked_transaction()?;
    let mut ids = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        let id = insert_task(&tx, owner_id, input).map_err(|e| match e {
            StorageError::Invalid(msg) => StorageError::Invalid(format!("Task {}: {}", i + 1, msg)),
            other => other,
        })?;
        ids.push(id);
    }
    tx.commit()?;
    ids.iter()
        .map(|id| load_task(conn, id)?.ok_or(StorageError::NotFound))
        .collect()
}

pub fn get_task(conn: &Connection, id: &str, user_id: &str) -> Result<Task> {
    authorize(conn, id, user_id, TaskOperation::Read)
}

pub fn update_task(conn: &Connection, id: &str, user_id: &str, patch: &UpdateTask) -> Result<Task> {
    let tx = conn.unchecked_transaction()?;
    let existing = authorize(&tx, id, user_id, TaskOperation::Update)?;

    let title = match patch.title.as_deref().map(str::trim) {
        Some("") => return Err(StorageError::invalid("Title cannot be empty")),
        Some(t) => t.to_string(),
        None => existing.title.clone(),
    };
    let description = match patch.description {
        Some(ref d) => d.clone(),
        None => existing.description.clone(),
    };
    let priority = match patch.priority.as_deref() {
        Some(p) => parse_priority(p)?.as_str().to_string(),
        None => existing.priority.clone(),
    };
    let category = match patch.category.as_deref().map(str::trim) {
        Some("") => return Err(StorageError::invalid("Category cannot be empty")),
        Some(c) => c.to_string(),
        None => existing.category.clone(),
    };
    let date = match patch.date {
        Some(ref d) => normalize_ts(d.as_deref(), "date")?,
        None => existing.date.clone(),
    };
    let start_time = match patch.start_time {
        Some(ref s) => normalize_ts(s.as_deref(), "startTime")?,
        None => existing.start_time.clone(),
    };
    let end_time = match patch.end_time {
        Some(ref e) => normalize_ts(e.as_deref(), "endTime")?,
        None => existing.end_time.clone(),
    };
    let duration = match patch.duration {
        Some(d) => check_duration(d)?,
        None => existing.duration,
    };
    let order = match patch.order {
        Some(o) => check_order(o)?,
        None => existing.order,
    };

    let status = patch.status.as_deref().map(parse_status).transpose()?;
    let state = resolve_state(
        patch.completed.unwrap_or(existing.completed),
        patch.scheduled.unwrap_or(existing.scheduled),
        status,
        existing.status.as_deref(),
    );
    let p = state.projection();

    let parent_id = match patch.parent_id {
        None => existing.parent_id.clone(),
        Some(ref parent) => match parent.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(parent) => {
                ensure_parent_allowed(&tx, Some(id), parent, user_id)?;
                Some(parent.to_string())
            }
        },
    };

    tx.execute(
        "UPDATE tasks SET title = ?1, description = ?2, priority = ?3, category = ?4, completed = ?5, scheduled = ?6, status = ?7, date = ?8, start_time = ?9, end_time = ?10, duration = ?11, sort_order = ?12, parent_id = ?13, updated_at = ?14 WHERE id = ?15",
        params![
            title,
            description,
            priority,
            category,
            p.completed,
            p.scheduled,
            p.status,
            date,
            start_time,
            end_time,
            duration,
            order,
            parent_id,
            dates::now(),
            id,
        ],
    )?;

    if let Some(ref tags) = patch.tags {
        save_tags(&tx, id, tags)?;
    }
    if let Some(ref resources) = patch.resources {
        replace_resources(&tx, id, resources)?;
    }
    if let Some(ref assignees) = patch.assigned_to {
        replace_assignees(&tx, id, assignees)?;
    }
    tx.commit()?;
    load_task(conn, id)?.ok_or(StorageError::NotFound)
}

pub fn delete_task(conn: &Connection, id: &str, user_id: &str) -> Result<()> {
    authorize(conn, id, user_id, TaskOperation::Delete)?;
    let deleted = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
    if deleted == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}

// --- Transitions ---

pub fn set_priority(conn: &Connection, id: &str, user_id: &str, priority: Priority) -> Result<Task> {
    authorize(conn, id, user_id, TaskOperation::SetPriority)?;
    conn.execute(
        "UPDATE tasks SET priority = ?1, updated_at = ?2 WHERE id = ?3",
        params![priority.as_str(), dates::now(), id],
    )?;
    load_task(conn, id)?.ok_or(StorageError::NotFound)
}

fn write_state(conn: &Connection, id: &str, state: TaskState) -> Result<()> {
    let p = state.projection();
    conn.execute(
        "UPDATE tasks SET completed = ?1, scheduled = ?2, status = ?3, updated_at = ?4 WHERE id = ?5",
        params![p.completed, p.scheduled, p.status, dates::now(), id],
    )?;
    Ok(())
}

pub fn toggle_complete(conn: &Connection, id: &str, user_id: &str) -> Result<Task> {
    let task = authorize(conn, id, user_id, TaskOperation::ToggleComplete)?;
    write_state(conn, id, task.state().toggle_completed())?;
    load_task(conn, id)?.ok_or(StorageError::NotFound)
}

/// Shared by the status and kanban endpoints. Moving to `unscheduled`
/// clears the schedule; other targets take any supplied schedule fields.
fn apply_transition(
    conn: &Connection,
    task: &Task,
    target: KanbanStatus,
    schedule: &StatusRequest,
    order: Option<i64>,
) -> Result<()> {
    let state = task.state().apply_status(target);
    let p = state.projection();

    let (date, start_time, end_time, duration) = if target == KanbanStatus::Unscheduled {
        (None, None, None, None)
    } else {
        let date = normalize_ts(schedule.date.as_deref(), "date")?.or_else(|| task.date.clone());
        let start = normalize_ts(schedule.start_time.as_deref(), "startTime")?
            .or_else(|| task.start_time.clone());
        let end = normalize_ts(schedule.end_time.as_deref(), "endTime")?
            .or_else(|| task.end_time.clone());
        let duration = check_duration(schedule.duration)?.or(task.duration);
        (date, start, end, duration)
    };
    let order = match order {
        Some(o) => check_order(o)?,
        None => task.order,
    };

    conn.execute(
        "UPDATE tasks SET completed = ?1, scheduled = ?2, status = ?3, date = ?4, start_time = ?5, end_time = ?6, duration = ?7, sort_order = ?8, updated_at = ?9 WHERE id = ?10",
        params![
            p.completed,
            p.scheduled,
            p.status,
            date,
            start_time,
            end_time,
            duration,
            order,
            dates::now(),
            task.id,
        ],
    )?;
    Ok(())
}

pub fn set_status(
    conn: &Connection,
    id: &str,
    user_id: &str,
    status: KanbanStatus,
    schedule: &StatusRequest,
) -> Result<Task> {
    let task = authorize(conn, id, user_id, TaskOperation::SetStatus)?;
    apply_transition(conn, &task, status, schedule, None)?;
    load_task(conn, id)?.ok_or(StorageError::NotFound)
}

pub fn kanban_move(
    conn: &Connection,
    id: &str,
    user_id: &str,
    status: KanbanStatus,
    schedule: &StatusRequest,
    order: i64,
) -> Result<Task> {
    let task = authorize(conn, id, user_id, TaskOperation::KanbanMove)?;
    apply_transition(conn, &task, status, schedule, Some(order))?;
    load_task(conn, id)?.ok_or(StorageError::NotFound)
}

/// Sets the window verbatim and marks the task scheduled. Status is untouched.
pub fn set_time_window(
    conn: &Connection,
    id: &str,
    user_id: &str,
    window: &TimeWindowRequest,
) -> Result<Task> {
    let task = authorize(conn, id, user_id, TaskOperation::SetTimeWindow)?;
    let date = normalize_ts(window.date.as_deref(), "date")?;
    let start = normalize_ts(window.start_time.as_deref(), "startTime")?;
    let end = normalize_ts(window.end_time.as_deref(), "endTime")?;
    let (date, start, end) = match (date, start, end) {
        (Some(d), Some(s), Some(e)) => (d, s, e),
        _ => {
            return Err(StorageError::invalid(
                "date, startTime and endTime are required",
            ))
        }
    };
    if end < start {
        return Err(StorageError::invalid("endTime must not be before startTime"));
    }
    let duration = match check_duration(window.duration)? {
        Some(d) => d,
        None => dates::minutes_between(&start, &end).unwrap_or(0),
    };

    let p = task.state().force_scheduled().projection();
    conn.execute(
        "UPDATE tasks SET date = ?1, start_time = ?2, end_time = ?3, duration = ?4, completed = ?5, scheduled = ?6, status = ?7, updated_at = ?8 WHERE id = ?9",
        params![date, start, end, duration, p.completed, p.scheduled, p.status, dates::now(), id],
    )?;
    load_task(conn, id)?.ok_or(StorageError::NotFound)
}

// --- Listing ---

fn select_tasks(
    conn: &Connection,
    predicate: &Predicate,
    order_by: &str,
    page: Option<Page>,
) -> Result<Vec<Task>> {
    let mut sql = format!(
        "SELECT {} FROM tasks t WHERE {} ORDER BY {}",
        TASK_COLS_T,
        predicate.to_sql(),
        order_by
    );
    let mut values: Vec<Value> = predicate.values().to_vec();
    if let Some(page) = page {
        sql.push_str(" LIMIT ? OFFSET ?");
        values.push(Value::Integer(page.limit as i64));
        values.push(Value::Integer(page.offset()));
    }
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), row_to_task)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(|t| hydrate(conn, t)).collect()
}

pub fn fetch_bucket(conn: &Connection, q: &BucketQuery) -> Result<Vec<Task>> {
    select_tasks(conn, &q.predicate, q.order_by, Some(q.page))
}

pub fn count_bucket(conn: &Connection, q: &BucketQuery) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM tasks t WHERE {}", q.predicate.to_sql());
    let count = conn.query_row(&sql, params_from_iter(q.predicate.values().iter()), |row| {
        row.get(0)
    })?;
    Ok(count)
}

fn date_window(from: NaiveDate, to: NaiveDate) -> [Value; 2] {
    [
        Value::Text(dates::start_of_day(from)),
        Value::Text(dates::end_of_day(to)),
    ]
}

pub fn tasks_on_date(conn: &Connection, user_id: &str, day: NaiveDate) -> Result<Vec<Task>> {
    let mut predicate = query::visibility(user_id);
    predicate.push("t.date >= ? AND t.date <= ?", date_window(day, day));
    select_tasks(
        conn,
        &predicate,
        "t.start_time IS NULL, t.start_time ASC, t.date ASC, t.created_at ASC",
        None,
    )
}

pub fn tasks_in_range(
    conn: &Connection,
    user_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<Task>> {
    if to < from {
        return Err(StorageError::invalid("endDate must not be before startDate"));
    }
    let mut predicate = query::visibility(user_id);
    predicate.push(
        "t.scheduled = 1 AND t.date >= ? AND t.date <= ?",
        date_window(from, to),
    );
    select_tasks(
        conn,
        &predicate,
        "t.date ASC, t.start_time IS NULL, t.start_time ASC, t.created_at ASC",
        None,
    )
}

// --- Users ---

const USER_COLS: &str = "id, email, name, lang, image, stripe_customer_id";

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<SessionUser> {
    Ok(SessionUser {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        lang: row.get(3)?,
        image: row.get(4)?,
        stripe_customer_id: row.get(5)?,
    })
}

pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<SessionUser> {
    let name = input.name.trim();
    let email = input.email.trim().to_lowercase();
    if name.is_empty() || email.is_empty() {
        return Err(StorageError::invalid("name and email are required"));
    }
    if get_user_by_email(conn, &email)?.is_some() {
        return Err(StorageError::invalid(format!(
            "A user with email '{}' already exists",
            email
        )));
    }
    let id = Uuid::new_v4().to_string();
    let now = dates::now();
    conn.execute(
        "INSERT INTO users (id, name, email, image, lang, stripe_customer_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            name,
            email,
            input.image,
            input.lang.as_deref().unwrap_or("en"),
            input.stripe_customer_id,
            now,
            now,
        ],
    )?;
    get_user(conn, &id)?.ok_or(StorageError::NotFound)
}

pub fn get_user(conn: &Connection, id: &str) -> Result<Option<SessionUser>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLS);
    Ok(conn.query_row(&sql, params![id], row_to_user).optional()?)
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<SessionUser>> {
    let sql = format!("SELECT {} FROM users WHERE email = ?1", USER_COLS);
    Ok(conn
        .query_row(&sql, params![email.trim().to_lowercase()], row_to_user)
        .optional()?)
}

// --- Sessions ---

/// The raw token is returned once; only its SHA-256 hash is persisted.
pub fn create_session(conn: &Connection, user_id: &str, ttl_days: i64) -> Result<String> {
    if get_user(conn, user_id)?.is_none() {
        return Err(StorageError::NotFound);
    }
    let token = format!("tf_{}", Uuid::new_v4().simple());
    let now = Utc::now();
    conn.execute(
        "INSERT INTO sessions (token_hash, user_id, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            hash_token(&token),
            user_id,
            dates::format_ts(now + Duration::days(ttl_days)),
            dates::format_ts(now),
        ],
    )?;
    Ok(token)
}

pub fn user_for_session(conn: &Connection, token: &str) -> Result<Option<SessionUser>> {
    let sql = "SELECT u.id, u.email, u.name, u.lang, u.image, u.stripe_customer_id
               FROM sessions s JOIN users u ON u.id = s.user_id
               WHERE s.token_hash = ?1 AND s.expires_at > ?2";
    Ok(conn
        .query_row(sql, params![hash_token(token), dates::now()], row_to_user)
        .optional()?)
}

pub fn purge_expired_sessions(conn: &Connection) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?1",
        params![dates::now()],
    )?)
}

// --- Subscriptions ---

pub fn subscription_for_customer(
    conn: &Connection,
    stripe_customer_id: &str,
) -> Result<Option<Subscription>> {
    Ok(conn
        .query_row(
            "SELECT id, plan, status, stripe_customer_id, stripe_subscription_id, billing, price, period_start, period_end
             FROM subscriptions WHERE stripe_customer_id = ?1
             ORDER BY updated_at DESC LIMIT 1",
            params![stripe_customer_id],
            |row| {
                Ok(Subscription {
                    id: row.get(0)?,
                    plan: row.get(1)?,
                    status: row.get(2)?,
                    stripe_customer_id: row.get(3)?,
                    stripe_subscription_id: row.get(4)?,
                    billing: row.get(5)?,
                    price: row.get(6)?,
                    period_start: row.get(7)?,
                    period_end: row.get(8)?,
                })
            },
        )
        .optional()?)
}

pub fn upsert_subscription(conn: &Connection, sub: &Subscription) -> Result<()> {
    conn.execute(
        "INSERT INTO subscriptions (id, plan, status, stripe_customer_id, stripe_subscription_id, billing, price, period_start, period_end, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
            plan = excluded.plan,
            status = excluded.status,
            stripe_customer_id = excluded.stripe_customer_id,
            stripe_subscription_id = excluded.stripe_subscription_id,
            billing = excluded.billing,
            price = excluded.price,
            period_start = excluded.period_start,
            period_end = excluded.period_end,
            updated_at = excluded.updated_at",
        params![
            sub.id,
            sub.plan,
            sub.status,
            sub.stripe_customer_id,
            sub.stripe_subscription_id,
            sub.billing,
            sub.price,
            sub.period_start,
            sub.period_end,
            dates::now(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup() -> (Connection, String, String) {
        let conn = db::init_db(":memory:").unwrap();
        let ada = create_user(&conn, &CreateUser::new("Ada", "ada@example.com")).unwrap();
        let bob = create_user(&conn, &CreateUser::new("Bob", "bob@example.com")).unwrap();
        (conn, ada.id, bob.id)
    }

    #[test]
    fn create_defaults_and_normalization() {
        let (conn, ada, _) = setup();
        let task = create_task(&conn, &ada, &CreateTask::new("  Plan  ").scheduled_on("2024-03-01"))
            .unwrap();
        assert_eq!(task.title, "Plan");
        assert_eq!(task.priority, "medium");
        assert_eq!(task.category, "general");
        assert_eq!(task.order, DEFAULT_KANBAN_ORDER);
        assert_eq!(task.date.as_deref(), Some("2024-03-01T00:00:00.000Z"));
        assert_eq!(task.status.as_deref(), Some("todo"));
        assert!(task.scheduled);

        let undated = create_task(&conn, &ada, &CreateTask::new("Later")).unwrap();
        assert_eq!(undated.bucket(), Bucket::Unscheduled);
    }

    #[test]
    fn invalid_priority_is_rejected() {
        let (conn, ada, _) = setup();
        let err = create_task(&conn, &ada, &CreateTask::new("x").with_priority("urgent")).unwrap_err();
        assert!(matches!(err, StorageError::Invalid(_)));
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let (conn, ada, _) = setup();
        let inputs = vec![
            CreateTask::new("first"),
            CreateTask::new("second").with_priority("bogus"),
        ];
        let err = create_tasks(&conn, &ada, &inputs).unwrap_err();
        assert!(err.to_string().starts_with("Task 2:"));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn unknown_assignee_rolls_back_create() {
        let (conn, ada, _) = setup();
        let err = create_task(&conn, &ada, &CreateTask::new("x").assigned_to(&["nobody"])).unwrap_err();
        assert!(matches!(err, StorageError::Invalid(_)));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn delete_is_owner_only_but_assignee_may_update() {
        let (conn, ada, bob) = setup();
        let task = create_task(&conn, &ada, &CreateTask::new("shared").assigned_to(&[bob.as_str()])).unwrap();

        let patch = UpdateTask {
            title: Some("renamed".to_string()),
            ..Default::default()
        };
        assert_eq!(update_task(&conn, &task.id, &bob, &patch).unwrap().title, "renamed");
        assert!(matches!(delete_task(&conn, &task.id, &bob), Err(StorageError::NotFound)));
        delete_task(&conn, &task.id, &ada).unwrap();
        assert!(matches!(get_task(&conn, &task.id, &ada), Err(StorageError::NotFound)));
    }

    #[test]
    fn strangers_get_not_found_everywhere() {
        let (conn, ada, bob) = setup();
        let task = create_task(&conn, &ada, &CreateTask::new("private")).unwrap();
        assert!(matches!(get_task(&conn, &task.id, &bob), Err(StorageError::NotFound)));
        assert!(matches!(
            set_priority(&conn, &task.id, &bob, Priority::Low),
            Err(StorageError::NotFound)
        ));
        assert!(matches!(toggle_complete(&conn, &task.id, &bob), Err(StorageError::NotFound)));
        assert!(matches!(
            set_status(&conn, &task.id, &bob, KanbanStatus::Todo, &StatusRequest::default()),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn update_replaces_resources_and_assignees() {
        let (conn, ada, bob) = setup();
        let mut input = CreateTask::new("with stuff").assigned_to(&[bob.as_str()]);
        input.resources = Some(vec![NewResource {
            name: "spec".to_string(),
            resource_type: "pdf".to_string(),
            category: ResourceCategory::File,
            url: None,
        }]);
        let task = create_task(&conn, &ada, &input).unwrap();
        assert_eq!(task.resources.len(), 1);
        assert_eq!(task.assigned_to[0].name, "Bob");

        let patch = UpdateTask {
            resources: Some(vec![]),
            assigned_to: Some(vec![]),
            ..Default::default()
        };
        let task = update_task(&conn, &task.id, &ada, &patch).unwrap();
        assert!(task.resources.is_empty());
        assert!(task.assigned_to.is_empty());
    }

    #[test]
    fn parent_cycles_are_rejected() {
        let (conn, ada, _) = setup();
        let a = create_task(&conn, &ada, &CreateTask::new("a")).unwrap();
        let b = create_task(&conn, &ada, &CreateTask::new("b").with_parent(&a.id)).unwrap();
        assert_eq!(b.parent_id.as_deref(), Some(a.id.as_str()));

        let patch = UpdateTask {
            parent_id: Some(Some(b.id.clone())),
            ..Default::default()
        };
        assert!(matches!(
            update_task(&conn, &a.id, &ada, &patch),
            Err(StorageError::Invalid(_))
        ));

        let own = UpdateTask {
            parent_id: Some(Some(a.id.clone())),
            ..Default::default()
        };
        assert!(update_task(&conn, &a.id, &ada, &own).is_err());

        let detach = UpdateTask {
            parent_id: Some(None),
            ..Default::default()
        };
        assert!(update_task(&conn, &b.id, &ada, &detach).unwrap().parent_id.is_none());
    }

    #[test]
    fn invisible_parent_is_rejected() {
        let (conn, ada, bob) = setup();
        let hidden = create_task(&conn, &ada, &CreateTask::new("hidden")).unwrap();
        let err = create_task(&conn, &bob, &CreateTask::new("child").with_parent(&hidden.id)).unwrap_err();
        assert!(matches!(err, StorageError::Invalid(_)));
    }

    #[test]
    fn deleting_parent_detaches_children() {
        let (conn, ada, _) = setup();
        let a = create_task(&conn, &ada, &CreateTask::new("a")).unwrap();
        let b = create_task(&conn, &ada, &CreateTask::new("b").with_parent(&a.id)).unwrap();
        delete_task(&conn, &a.id, &ada).unwrap();
        assert!(get_task(&conn, &b.id, &ada).unwrap().parent_id.is_none());
    }

    #[test]
    fn unscheduling_clears_schedule_and_todo_restores_it() {
        let (conn, ada, _) = setup();
        let mut input = CreateTask::new("meeting").scheduled_on("2024-03-01");
        input.start_time = Some("2024-03-01T09:00:00Z".to_string());
        input.duration = Some(30);
        let task = create_task(&conn, &ada, &input).unwrap();

        let task = kanban_move(
            &conn,
            &task.id,
            &ada,
            KanbanStatus::Unscheduled,
            &StatusRequest::default(),
            5,
        )
        .unwrap();
        assert!(!task.scheduled);
        assert!(task.date.is_none() && task.start_time.is_none() && task.duration.is_none());
        assert_eq!(task.order, 5);

        let schedule = StatusRequest {
            date: Some("2024-04-02".to_string()),
            ..Default::default()
        };
        let task = kanban_move(&conn, &task.id, &ada, KanbanStatus::Todo, &schedule, 7).unwrap();
        assert!(task.scheduled);
        assert_eq!(task.date.as_deref(), Some("2024-04-02T00:00:00.000Z"));
        assert_eq!(task.bucket(), Bucket::Todo);
    }

    #[test]
    fn completing_keeps_prior_status() {
        let (conn, ada, _) = setup();
        let task = create_task(
            &conn,
            &ada,
            &CreateTask::new("x").scheduled_on("2024-03-01").with_status("inprogress"),
        )
        .unwrap();
        let task = set_status(&conn, &task.id, &ada, KanbanStatus::Completed, &StatusRequest::default())
            .unwrap();
        assert!(task.completed);
        assert_eq!(task.status.as_deref(), Some("inprogress"));
        let task = toggle_complete(&conn, &task.id, &ada).unwrap();
        assert_eq!(task.bucket(), Bucket::InProgress);
    }

    #[test]
    fn toggle_twice_is_identity() {
        let (conn, ada, _) = setup();
        let task = create_task(&conn, &ada, &CreateTask::new("x").unscheduled()).unwrap();
        let once = toggle_complete(&conn, &task.id, &ada).unwrap();
        assert_eq!(once.bucket(), Bucket::Completed);
        let twice = toggle_complete(&conn, &task.id, &ada).unwrap();
        assert_eq!(twice.completed, task.completed);
        assert_eq!(twice.bucket(), Bucket::Unscheduled);
    }

    #[test]
    fn time_window_schedules_and_computes_duration() {
        let (conn, ada, _) = setup();
        let task = create_task(&conn, &ada, &CreateTask::new("x").unscheduled()).unwrap();
        let window = TimeWindowRequest {
            date: Some("2024-03-01".to_string()),
            start_time: Some("2024-03-01T09:00:00Z".to_string()),
            end_time: Some("2024-03-01T10:30:00Z".to_string()),
            duration: None,
        };
        let task = set_time_window(&conn, &task.id, &ada, &window).unwrap();
        assert!(task.scheduled);
        assert_eq!(task.duration, Some(90));
        assert_eq!(task.bucket(), Bucket::Todo);

        let backwards = TimeWindowRequest {
            end_time: Some("2024-03-01T08:00:00Z".to_string()),
            ..window
        };
        assert!(set_time_window(&conn, &task.id, &ada, &backwards).is_err());
    }

    #[test]
    fn tasks_by_date_and_range() {
        let (conn, ada, bob) = setup();
        create_task(&conn, &ada, &CreateTask::new("first").scheduled_on("2024-03-01")).unwrap();
        create_task(&conn, &ada, &CreateTask::new("second").scheduled_on("2024-03-05")).unwrap();
        create_task(&conn, &bob, &CreateTask::new("bob's").scheduled_on("2024-03-01")).unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let on_day = tasks_on_date(&conn, &ada, day).unwrap();
        assert_eq!(on_day.len(), 1);
        assert_eq!(on_day[0].title, "first");

        let to = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let in_range = tasks_in_range(&conn, &ada, day, to).unwrap();
        let titles: Vec<&str> = in_range.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["first", "second"]);
    }

    #[test]
    fn sessions_resolve_until_expiry() {
        let (conn, ada, _) = setup();
        let token = create_session(&conn, &ada, 1).unwrap();
        assert_eq!(user_for_session(&conn, &token).unwrap().unwrap().id, ada);
        assert!(user_for_session(&conn, "tf_bogus").unwrap().is_none());

        conn.execute("UPDATE sessions SET expires_at = '2000-01-01T00:00:00.000Z'", [])
            .unwrap();
        assert!(user_for_session(&conn, &token).unwrap().is_none());
        assert_eq!(purge_expired_sessions(&conn).unwrap(), 1);
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let (conn, _, _) = setup();
        assert!(create_user(&conn, &CreateUser::new("Again", "ADA@example.com")).is_err());
    }

    #[test]
    fn subscription_upsert_and_lookup() {
        let (conn, _, _) = setup();
        let mut sub = Subscription {
            id: "sub_1".to_string(),
            plan: "pro".to_string(),
            status: "active".to_string(),
            stripe_customer_id: "cus_1".to_string(),
            stripe_subscription_id: Some("stripe_sub_1".to_string()),
            billing: Some("monthly".to_string()),
            price: Some(9.99),
            period_start: None,
            period_end: None,
        };
        upsert_subscription(&conn, &sub).unwrap();
        sub.status = "canceled".to_string();
        upsert_subscription(&conn, &sub).unwrap();
        let found = subscription_for_customer(&conn, "cus_1").unwrap().unwrap();
        assert_eq!(found.status, "canceled");
        assert!(subscription_for_customer(&conn, "cus_2").unwrap().is_none());
    }
}
