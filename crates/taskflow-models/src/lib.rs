use serde::{Deserialize, Deserializer, Serialize};

// --- Enums ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceCategory {
    File,
    Link,
    Note,
}

impl ResourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceCategory::File => "file",
            ResourceCategory::Link => "link",
            ResourceCategory::Note => "note",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "file" => Some(ResourceCategory::File),
            "link" => Some(ResourceCategory::Link),
            "note" => Some(ResourceCategory::Note),
            _ => None,
        }
    }
}

/// Target value of the status and kanban endpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KanbanStatus {
    Unscheduled,
    Todo,
    InProgress,
    Completed,
}

impl KanbanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KanbanStatus::Unscheduled => "unscheduled",
            KanbanStatus::Todo => "todo",
            KanbanStatus::InProgress => "inprogress",
            KanbanStatus::Completed => "completed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unscheduled" => Some(KanbanStatus::Unscheduled),
            "todo" => Some(KanbanStatus::Todo),
            "inprogress" => Some(KanbanStatus::InProgress),
            "completed" => Some(KanbanStatus::Completed),
            _ => None,
        }
    }
}

/// Display section a task lands in when listed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Todo,
    InProgress,
    Completed,
    Unscheduled,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [
        Bucket::Todo,
        Bucket::InProgress,
        Bucket::Completed,
        Bucket::Unscheduled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Todo => "todo",
            Bucket::InProgress => "inprogress",
            Bucket::Completed => "completed",
            Bucket::Unscheduled => "unscheduled",
        }
    }
}

/// The `scheduled` list parameter: gates which buckets are queried at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduledFilter {
    #[default]
    All,
    Scheduled,
    Unscheduled,
}

impl ScheduledFilter {
    /// Unknown or missing values behave like `all`.
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("scheduled") => ScheduledFilter::Scheduled,
            Some("unscheduled") => ScheduledFilter::Unscheduled,
            _ => ScheduledFilter::All,
        }
    }

    pub fn includes(&self, bucket: Bucket) -> bool {
        match (self, bucket) {
            (ScheduledFilter::All, _) => true,
            (_, Bucket::Completed) => true,
            (ScheduledFilter::Scheduled, b) => b != Bucket::Unscheduled,
            (ScheduledFilter::Unscheduled, b) => b == Bucket::Unscheduled,
        }
    }
}

// --- Workflow state ---

/// The non-completed states a task can be in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OpenState {
    Unscheduled,
    Todo,
    InProgress,
}

impl OpenState {
    pub fn scheduled(&self) -> bool {
        !matches!(self, OpenState::Unscheduled)
    }

    pub fn status(&self) -> &'static str {
        match self {
            OpenState::Unscheduled => "unscheduled",
            OpenState::Todo => "todo",
            OpenState::InProgress => "inprogress",
        }
    }
}

/// Single source of truth for a task's workflow position.
///
/// Storage and the wire format still carry the legacy `completed`,
/// `scheduled` and `status` columns; they are always written from
/// [`TaskState::projection`] so they cannot contradict each other.
/// A completed task remembers the open state it will return to when reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Open(OpenState),
    Completed { reopen_to: OpenState },
}

/// Legacy column values derived from a [`TaskState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateProjection {
    pub completed: bool,
    pub scheduled: bool,
    pub status: &'static str,
}

impl TaskState {
    pub fn from_legacy(completed: bool, scheduled: bool, status: Option<&str>) -> Self {
        let open = if !scheduled {
            OpenState::Unscheduled
        } else if status == Some("inprogress") {
            OpenState::InProgress
        } else {
            OpenState::Todo
        };
        if completed {
            TaskState::Completed { reopen_to: open }
        } else {
            TaskState::Open(open)
        }
    }

    pub fn projection(&self) -> StateProjection {
        let (completed, open) = match *self {
            TaskState::Open(open) => (false, open),
            TaskState::Completed { reopen_to } => (true, reopen_to),
        };
        StateProjection {
            completed,
            scheduled: open.scheduled(),
            status: open.status(),
        }
    }

    pub fn bucket(&self) -> Bucket {
        match self {
            TaskState::Completed { .. } => Bucket::Completed,
            TaskState::Open(OpenState::Unscheduled) => Bucket::Unscheduled,
            TaskState::Open(OpenState::Todo) => Bucket::Todo,
            TaskState::Open(OpenState::InProgress) => Bucket::InProgress,
        }
    }

    fn open_state(&self) -> OpenState {
        match *self {
            TaskState::Open(open) => open,
            TaskState::Completed { reopen_to } => reopen_to,
        }
    }

    /// Status / kanban transition. Completing keeps the prior workflow
    /// status, with one exception: completing through this transition always
    /// leaves the task scheduled, so an unscheduled task stores status `todo`
    /// and reopens into the todo column. [`toggle_completed`](Self::toggle_completed)
    /// does not make that change.
    pub fn apply_status(&self, target: KanbanStatus) -> Self {
        match target {
            KanbanStatus::Unscheduled => TaskState::Open(OpenState::Unscheduled),
            KanbanStatus::Todo => TaskState::Open(OpenState::Todo),
            KanbanStatus::InProgress => TaskState::Open(OpenState::InProgress),
            KanbanStatus::Completed => {
                let reopen_to = match self.open_state() {
                    OpenState::Unscheduled => OpenState::Todo,
                    open => open,
                };
                TaskState::Completed { reopen_to }
            }
        }
    }

    /// Flip completion without touching scheduling or status.
    pub fn toggle_completed(&self) -> Self {
        match *self {
            TaskState::Open(open) => TaskState::Completed { reopen_to: open },
            TaskState::Completed { reopen_to } => TaskState::Open(reopen_to),
        }
    }

    /// Setting an explicit time window always marks the task scheduled.
    pub fn force_scheduled(&self) -> Self {
        match *self {
            TaskState::Open(OpenState::Unscheduled) => TaskState::Open(OpenState::Todo),
            TaskState::Completed {
                reopen_to: OpenState::Unscheduled,
            } => TaskState::Completed {
                reopen_to: OpenState::Todo,
            },
            other => other,
        }
    }
}

// --- Domain models ---

pub const DEFAULT_KANBAN_ORDER: i64 = 1000;
pub const DEFAULT_CATEGORY: &str = "general";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: String,
    pub category: String,
    pub completed: bool,
    pub scheduled: bool,
    pub status: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    /// Minutes
    pub duration: Option<i64>,
    pub order: i64,
    pub tags: Vec<String>,
    pub parent_id: Option<String>,
    /// Owner
    pub user_id: String,
    pub resources: Vec<Resource>,
    pub assigned_to: Vec<AssignedUser>,
    pub created_at: String,
    pub updated_at: String,
}

impl Task {
    pub fn state(&self) -> TaskState {
        TaskState::from_legacy(self.completed, self.scheduled, self.status.as_deref())
    }

    pub fn bucket(&self) -> Bucket {
        self.state().bucket()
    }

    pub fn is_assignee(&self, user_id: &str) -> bool {
        self.assigned_to.iter().any(|u| u.id == user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub category: ResourceCategory,
    pub url: Option<String>,
}

/// Public profile of an assignee, denormalized onto every listed task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssignedUser {
    pub id: String,
    pub name: String,
    pub profile_pic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub lang: String,
    pub image: Option<String>,
    pub stripe_customer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub plan: String,
    pub status: String,
    pub stripe_customer_id: String,
    pub stripe_subscription_id: Option<String>,
    pub billing: Option<String>,
    pub price: Option<f64>,
    pub period_start: Option<String>,
    pub period_end: Option<String>,
}

// --- DTOs ---

/// Accepts `null` as `Some(None)` so patches can tell "clear" from "absent".
fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewResource {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub category: ResourceCategory,
    pub url: Option<String>,
}

/// Assignees arrive either as bare user ids or as `{id, name, profilePic}` objects.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AssigneeRef {
    Id(String),
    User { id: String },
}

impl AssigneeRef {
    pub fn id(&self) -> &str {
        match self {
            AssigneeRef::Id(id) => id,
            AssigneeRef::User { id } => id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub completed: Option<bool>,
    pub scheduled: Option<bool>,
    pub status: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration: Option<i64>,
    pub order: Option<i64>,
    pub tags: Option<Vec<String>>,
    pub parent_id: Option<String>,
    pub resources: Option<Vec<NewResource>>,
    pub assigned_to: Option<Vec<AssigneeRef>>,
}

impl CreateTask {
    /// Minimal input for tests and the CLI.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            priority: None,
            category: None,
            completed: None,
            scheduled: None,
            status: None,
            date: None,
            start_time: None,
            end_time: None,
            duration: None,
            order: None,
            tags: None,
            parent_id: None,
            resources: None,
            assigned_to: None,
        }
    }

    pub fn scheduled_on(mut self, date: impl Into<String>) -> Self {
        self.scheduled = Some(true);
        self.date = Some(date.into());
        self
    }

    pub fn unscheduled(mut self) -> Self {
        self.scheduled = Some(false);
        self
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn completed(mut self) -> Self {
        self.completed = Some(true);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn assigned_to(mut self, user_ids: &[&str]) -> Self {
        self.assigned_to = Some(
            user_ids
                .iter()
                .map(|id| AssigneeRef::Id(id.to_string()))
                .collect(),
        );
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTask {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub completed: Option<bool>,
    pub scheduled: Option<bool>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub date: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub start_time: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub end_time: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub duration: Option<Option<i64>>,
    pub order: Option<i64>,
    pub tags: Option<Vec<String>>,
    /// Absent: untouched. `null` or `""`: detach from parent. Otherwise: new parent.
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<String>>,
    pub resources: Option<Vec<NewResource>>,
    pub assigned_to: Option<Vec<AssigneeRef>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    pub lang: Option<String>,
    pub image: Option<String>,
    pub stripe_customer_id: Option<String>,
}

impl CreateUser {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            lang: None,
            image: None,
            stripe_customer_id: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_stripe_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.stripe_customer_id = Some(customer_id.into());
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchCreateTasks {
    pub tasks: Vec<CreateTask>,
}

#[derive(Debug, Deserialize)]
pub struct PriorityRequest {
    pub priority: Option<String>,
}

/// Body of the status endpoint. Scheduling fields are optional and only
/// honoured for scheduled targets.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub status: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KanbanRequest {
    pub status: Option<String>,
    /// Number or numeric string
    pub order: Option<serde_json::Value>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration: Option<i64>,
}

impl KanbanRequest {
    /// `max(1, order or 1000)`: a missing, zero or non-numeric order falls
    /// back to [`DEFAULT_KANBAN_ORDER`], anything below 1 is raised to 1.
    pub fn resolve_order(&self) -> i64 {
        let parsed = match &self.order {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed {
            Some(v) if v.is_finite() && v != 0.0 => v.max(1.0).floor() as i64,
            _ => DEFAULT_KANBAN_ORDER,
        }
    }

    pub fn status_request(&self) -> StatusRequest {
        StatusRequest {
            status: self.status.clone(),
            date: self.date.clone(),
            start_time: self.start_time.clone(),
            end_time: self.end_time.clone(),
            duration: self.duration,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindowRequest {
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration: Option<i64>,
}

/// Raw query string of the task list endpoint. Numbers stay strings until
/// the query engine validates them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub scheduled: Option<String>,
    pub priority: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub todo_page: Option<String>,
    pub todo_limit: Option<String>,
    pub inprogress_page: Option<String>,
    pub inprogress_limit: Option<String>,
    pub completed_page: Option<String>,
    pub completed_limit: Option<String>,
    pub unscheduled_page: Option<String>,
    pub unscheduled_limit: Option<String>,
}

impl TaskListQuery {
    pub fn page_params(&self, bucket: Bucket) -> (Option<&str>, Option<&str>) {
        let (page, limit) = match bucket {
            Bucket::Todo => (&self.todo_page, &self.todo_limit),
            Bucket::InProgress => (&self.inprogress_page, &self.inprogress_limit),
            Bucket::Completed => (&self.completed_page, &self.completed_limit),
            Bucket::Unscheduled => (&self.unscheduled_page, &self.unscheduled_limit),
        };
        (page.as_deref(), limit.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListResponse {
    pub success: bool,
    pub message: String,
    pub todo: Vec<Task>,
    pub todo_total: i64,
    pub inprogress: Vec<Task>,
    pub inprogress_total: i64,
    pub completed: Vec<Task>,
    pub completed_total: i64,
    pub unscheduled: Vec<Task>,
    pub unscheduled_total: i64,
}

impl TaskListResponse {
    pub fn set_bucket(&mut self, bucket: Bucket, tasks: Vec<Task>, total: i64) {
        let (slot, count) = match bucket {
            Bucket::Todo => (&mut self.todo, &mut self.todo_total),
            Bucket::InProgress => (&mut self.inprogress, &mut self.inprogress_total),
            Bucket::Completed => (&mut self.completed, &mut self.completed_total),
            Bucket::Unscheduled => (&mut self.unscheduled, &mut self.unscheduled_total),
        };
        *slot = tasks;
        *count = total;
    }

    pub fn is_empty(&self) -> bool {
        self.todo_total + self.inprogress_total + self.completed_total + self.unscheduled_total
            == 0
    }
}

#[derive(Debug, Deserialize)]
pub struct ByDateQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateTasksRequest {
    pub prompt: Option<String>,
    pub date: Option<String>,
}

/// JSON envelope shared by every endpoint except the task list.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub message: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            success: true,
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>, success: bool) -> Self {
        Self {
            message: message.into(),
            success,
            data: None,
        }
    }
}

// --- Identity (from auth) ---

#[derive(Debug, Clone)]
pub enum Identity {
    User(SessionUser),
    Anonymous,
}

impl Identity {
    pub fn user(&self) -> Option<&SessionUser> {
        match self {
            Identity::User(user) => Some(user),
            Identity::Anonymous => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user().map(|u| u.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_triples_classify_into_buckets() {
        assert_eq!(TaskState::from_legacy(true, false, None).bucket(), Bucket::Completed);
        assert_eq!(
            TaskState::from_legacy(true, true, Some("inprogress")).bucket(),
            Bucket::Completed
        );
        assert_eq!(
            TaskState::from_legacy(false, true, Some("inprogress")).bucket(),
            Bucket::InProgress
        );
        assert_eq!(TaskState::from_legacy(false, true, None).bucket(), Bucket::Todo);
        assert_eq!(
            TaskState::from_legacy(false, true, Some("unscheduled")).bucket(),
            Bucket::Todo
        );
        assert_eq!(
            TaskState::from_legacy(false, false, Some("inprogress")).bucket(),
            Bucket::Unscheduled
        );
    }

    #[test]
    fn projection_reclassifies_to_same_state() {
        let states = [
            TaskState::Open(OpenState::Unscheduled),
            TaskState::Open(OpenState::Todo),
            TaskState::Open(OpenState::InProgress),
            TaskState::Completed { reopen_to: OpenState::Unscheduled },
            TaskState::Completed { reopen_to: OpenState::InProgress },
        ];
        for state in states {
            let p = state.projection();
            assert_eq!(TaskState::from_legacy(p.completed, p.scheduled, Some(p.status)), state);
        }
    }

    #[test]
    fn toggle_completion_twice_restores_state() {
        let start = TaskState::Open(OpenState::Unscheduled);
        let done = start.toggle_completed();
        assert_eq!(done.bucket(), Bucket::Completed);
        assert!(!done.projection().scheduled);
        assert_eq!(done.toggle_completed(), start);
    }

    #[test]
    fn completing_via_status_keeps_prior_status() {
        let state = TaskState::Open(OpenState::InProgress).apply_status(KanbanStatus::Completed);
        let p = state.projection();
        assert!(p.completed);
        assert!(p.scheduled);
        assert_eq!(p.status, "inprogress");

        let from_unscheduled =
            TaskState::Open(OpenState::Unscheduled).apply_status(KanbanStatus::Completed);
        let p = from_unscheduled.projection();
        assert!(p.scheduled);
        assert_eq!(p.status, "todo");
        assert_eq!(
            from_unscheduled.toggle_completed(),
            TaskState::Open(OpenState::Todo)
        );
    }

    #[test]
    fn force_scheduled_only_moves_unscheduled() {
        assert_eq!(
            TaskState::Open(OpenState::Unscheduled).force_scheduled(),
            TaskState::Open(OpenState::Todo)
        );
        assert_eq!(
            TaskState::Open(OpenState::InProgress).force_scheduled(),
            TaskState::Open(OpenState::InProgress)
        );
    }

    #[test]
    fn scheduled_filter_gates_buckets() {
        let f = ScheduledFilter::parse(Some("unscheduled"));
        assert!(!f.includes(Bucket::Todo));
        assert!(!f.includes(Bucket::InProgress));
        assert!(f.includes(Bucket::Unscheduled));
        assert!(f.includes(Bucket::Completed));

        let f = ScheduledFilter::parse(Some("scheduled"));
        assert!(f.includes(Bucket::Todo));
        assert!(!f.includes(Bucket::Unscheduled));

        assert_eq!(ScheduledFilter::parse(Some("bogus")), ScheduledFilter::All);
    }

    #[test]
    fn kanban_order_resolution() {
        let mut req = KanbanRequest::default();
        assert_eq!(req.resolve_order(), DEFAULT_KANBAN_ORDER);
        req.order = Some(serde_json::json!("abc"));
        assert_eq!(req.resolve_order(), DEFAULT_KANBAN_ORDER);
        req.order = Some(serde_json::json!("42"));
        assert_eq!(req.resolve_order(), 42);
        req.order = Some(serde_json::json!(7.9));
        assert_eq!(req.resolve_order(), 7);
    }

    #[test]
    fn kanban_order_clamps_instead_of_rejecting() {
        let mut req = KanbanRequest::default();
        req.order = Some(serde_json::json!(0));
        assert_eq!(req.resolve_order(), DEFAULT_KANBAN_ORDER);
        req.order = Some(serde_json::json!("0"));
        assert_eq!(req.resolve_order(), DEFAULT_KANBAN_ORDER);
        req.order = Some(serde_json::json!(-3));
        assert_eq!(req.resolve_order(), 1);
        req.order = Some(serde_json::json!(0.5));
        assert_eq!(req.resolve_order(), 1);
    }

    #[test]
    fn update_distinguishes_null_from_absent() {
        let patch: UpdateTask = serde_json::from_str(r#"{"parentId": null}"#).unwrap();
        assert_eq!(patch.parent_id, Some(None));
        let patch: UpdateTask = serde_json::from_str(r#"{"title": "x"}"#).unwrap();
        assert_eq!(patch.parent_id, None);
        let patch: UpdateTask = serde_json::from_str(r#"{"parentId": "p1"}"#).unwrap();
        assert_eq!(patch.parent_id, Some(Some("p1".to_string())));
    }

    #[test]
    fn assignees_accept_ids_and_objects() {
        let input: CreateTask = serde_json::from_str(
            r#"{"title": "t", "assignedTo": ["u1", {"id": "u2", "name": "Bo", "profilePic": null}]}"#,
        )
        .unwrap();
        let ids: Vec<&str> = input.assigned_to.as_ref().unwrap().iter().map(|a| a.id()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);
    }
}
