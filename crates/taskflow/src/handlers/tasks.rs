use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde_json::Value;

use crate::app::AppState;
use crate::auth::require_user;
use crate::dates;
use crate::error::ApiError;
use crate::generator::{parse_generated_tasks, GeneratorError};
use crate::handlers::{body, query_params};
use crate::query::{self, TaskQuery};
use taskflow_models::*;

type TaskResult = Result<Json<ApiResponse<Task>>, ApiError>;

const INTERNAL: StatusCode = StatusCode::INTERNAL_SERVER_ERROR;

fn required_day(raw: Option<&str>, name: &str) -> Result<chrono::NaiveDate, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::validation(format!("{} is required", name)))?;
    dates::parse_day(raw).ok_or_else(|| ApiError::validation(format!("Invalid {}: '{}'", name, raw)))
}

// --- Create ---

pub async fn create_manual_task(
    State(state): State<AppState>,
    identity: Identity,
    payload: Result<Json<CreateTask>, JsonRejection>,
) -> TaskResult {
    let user = require_user(&identity)?;
    let input = body(payload)?;
    let task = state
        .storage
        .create_task(&user.id, &input)
        .map_err(|e| ApiError::from_storage(e, StatusCode::BAD_REQUEST, "Error creating task"))?;
    tracing::info!(task_id = %task.id, user_id = %user.id, "task created");
    Ok(Json(ApiResponse::ok("Task created successfully", task)))
}

pub async fn create_batch(
    State(state): State<AppState>,
    identity: Identity,
    payload: Result<Json<BatchCreateTasks>, JsonRejection>,
) -> Result<Json<ApiResponse<Vec<Task>>>, ApiError> {
    let user = require_user(&identity)?;
    let input = body(payload)?;
    if input.tasks.is_empty() {
        return Err(ApiError::validation("No task data provided"));
    }
    let tasks = state
        .storage
        .create_tasks(&user.id, &input.tasks)
        .map_err(|e| ApiError::from_storage(e, StatusCode::BAD_REQUEST, "Error saving tasks"))?;
    tracing::info!(count = tasks.len(), user_id = %user.id, "task batch saved");
    Ok(Json(ApiResponse::ok("Tasks saved successfully", tasks)))
}

/// Returns the generated tasks without saving them.
pub async fn generate_tasks(
    State(state): State<AppState>,
    identity: Identity,
    payload: Result<Json<GenerateTasksRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Vec<Value>>>, ApiError> {
    require_user(&identity)?;
    let input = body(payload)?;
    let prompt = input
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::validation("Prompt is required"))?;
    let date = match input.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(raw) => dates::parse_day(raw)
            .ok_or_else(|| ApiError::validation(format!("Invalid date: '{}'", raw)))?,
        None => chrono::Utc::now().date_naive(),
    };

    let generator = state.generator.as_ref().ok_or(GeneratorError::NotConfigured)?;
    let raw = generator
        .generate(prompt, &date.format("%Y-%m-%d").to_string())
        .await?;
    let tasks = parse_generated_tasks(&raw)?;
    Ok(Json(ApiResponse::ok("Tasks generated", tasks)))
}

// --- Read ---

pub async fn list_tasks(
    State(state): State<AppState>,
    identity: Identity,
    params: Result<Query<TaskListQuery>, QueryRejection>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let user = require_user(&identity)?;
    let params = query_params(params)?;
    let task_query = TaskQuery::from_params(&params, &state.config.pagination)?;
    let response = query::list_tasks(state.storage.clone(), &task_query, &user.id)
        .await
        .map_err(|e| ApiError::from_storage(e, INTERNAL, "Error fetching tasks"))?;
    Ok(Json(response))
}

pub async fn tasks_by_date(
    State(state): State<AppState>,
    identity: Identity,
    params: Result<Query<ByDateQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Task>>>, ApiError> {
    let user = require_user(&identity)?;
    let params = query_params(params)?;
    let day = required_day(params.date.as_deref(), "date")?;
    let tasks = state
        .storage
        .tasks_on_date(&user.id, day)
        .map_err(|e| ApiError::from_storage(e, INTERNAL, "Error fetching tasks"))?;
    Ok(Json(ApiResponse::ok("Tasks retrieved", tasks)))
}

pub async fn calendar_tasks(
    State(state): State<AppState>,
    identity: Identity,
    params: Result<Query<CalendarQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Task>>>, ApiError> {
    let user = require_user(&identity)?;
    let params = query_params(params)?;
    let from = required_day(params.start_date.as_deref(), "startDate")?;
    let to = required_day(params.end_date.as_deref(), "endDate")?;
    let tasks = state
        .storage
        .tasks_in_range(&user.id, from, to)
        .map_err(|e| ApiError::from_storage(e, INTERNAL, "Error fetching calendar tasks"))?;
    Ok(Json(ApiResponse::ok("Tasks retrieved", tasks)))
}

pub async fn get_task(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> TaskResult {
    let user = require_user(&identity)?;
    let task = state
        .storage
        .get_task(&id, &user.id)
        .map_err(|e| ApiError::from_storage(e, INTERNAL, "Error fetching task"))?;
    Ok(Json(ApiResponse::ok("Task retrieved", task)))
}

// --- Update / delete ---

pub async fn update_task(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
    payload: Result<Json<UpdateTask>, JsonRejection>,
) -> TaskResult {
    let user = require_user(&identity)?;
    let patch = body(payload)?;
    let task = state
        .storage
        .update_task(&id, &user.id, &patch)
        .map_err(|e| ApiError::from_storage(e, INTERNAL, "Error updating task"))?;
    Ok(Json(ApiResponse::ok("Task updated successfully", task)))
}

pub async fn delete_task(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let user = require_user(&identity)?;
    state
        .storage
        .delete_task(&id, &user.id)
        .map_err(|e| ApiError::from_storage(e, INTERNAL, "Error deleting task"))?;
    tracing::info!(task_id = %id, user_id = %user.id, "task deleted");
    Ok(Json(ApiResponse::message("Task deleted successfully", true)))
}

// --- Transitions ---

pub async fn set_priority(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
    payload: Result<Json<PriorityRequest>, JsonRejection>,
) -> TaskResult {
    let user = require_user(&identity)?;
    let input = body(payload)?;
    let raw = input
        .priority
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::validation("Priority is required"))?;
    let priority = Priority::from_str(raw)
        .ok_or_else(|| ApiError::validation(format!("Invalid priority: '{}'", raw)))?;
    let task = state
        .storage
        .set_priority(&id, &user.id, priority)
        .map_err(|e| ApiError::from_storage(e, INTERNAL, "Error updating priority"))?;
    Ok(Json(ApiResponse::ok("Priority updated successfully", task)))
}

pub async fn toggle_complete(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> TaskResult {
    let user = require_user(&identity)?;
    let task = state
        .storage
        .toggle_complete(&id, &user.id)
        .map_err(|e| ApiError::from_storage(e, INTERNAL, "Error updating task"))?;
    let message = if task.completed {
        "Task marked as completed"
    } else {
        "Task marked as not completed"
    };
    Ok(Json(ApiResponse::ok(message, task)))
}

fn required_status(raw: Option<&str>) -> Result<KanbanStatus, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::validation("Status is required"))?;
    KanbanStatus::from_str(raw)
        .ok_or_else(|| ApiError::validation(format!("Invalid status: '{}'", raw)))
}

pub async fn set_status(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> TaskResult {
    let user = require_user(&identity)?;
    let input = body(payload)?;
    let status = required_status(input.status.as_deref())?;
    let task = state
        .storage
        .set_status(&id, &user.id, status, &input)
        .map_err(|e| ApiError::from_storage(e, INTERNAL, "Error updating status"))?;
    Ok(Json(ApiResponse::ok("Status updated successfully", task)))
}

pub async fn kanban_move(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
    payload: Result<Json<KanbanRequest>, JsonRejection>,
) -> TaskResult {
    let user = require_user(&identity)?;
    let input = body(payload)?;
    let status = required_status(input.status.as_deref())?;
    let order = input.resolve_order();
    let task = state
        .storage
        .kanban_move(&id, &user.id, status, &input.status_request(), order)
        .map_err(|e| ApiError::from_storage(e, INTERNAL, "Error moving task"))?;
    Ok(Json(ApiResponse::ok("Task moved successfully", task)))
}

pub async fn set_times(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
    payload: Result<Json<TimeWindowRequest>, JsonRejection>,
) -> TaskResult {
    let user = require_user(&identity)?;
    let input = body(payload)?;
    let missing = [&input.date, &input.start_time, &input.end_time]
        .iter()
        .any(|v| v.as_deref().map_or(true, |s| s.trim().is_empty()));
    if missing {
        return Err(ApiError::validation("date, startTime and endTime are required"));
    }
    let task = state
        .storage
        .set_time_window(&id, &user.id, &input)
        .map_err(|e| ApiError::from_storage(e, INTERNAL, "Error updating task times"))?;
    Ok(Json(ApiResponse::ok("Task times updated successfully", task)))
}
