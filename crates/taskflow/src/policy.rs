/// Per-task operations that go through an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOperation {
    Read,
    Update,
    Delete,
    SetPriority,
    ToggleComplete,
    SetStatus,
    KanbanMove,
    SetTimeWindow,
}

/// Who may perform an operation on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Owner,
    OwnerOrAssignee,
}

impl TaskOperation {
    /// Delete is owner-only; every other operation is open to assignees too.
    pub const fn access(self) -> Access {
        match self {
            TaskOperation::Delete => Access::Owner,
            TaskOperation::Read
            | TaskOperation::Update
            | TaskOperation::SetPriority
            | TaskOperation::ToggleComplete
            | TaskOperation::SetStatus
            | TaskOperation::KanbanMove
            | TaskOperation::SetTimeWindow => Access::OwnerOrAssignee,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOperation::Read => "read",
            TaskOperation::Update => "update",
            TaskOperation::Delete => "delete",
            TaskOperation::SetPriority => "set_priority",
            TaskOperation::ToggleComplete => "toggle_complete",
            TaskOperation::SetStatus => "set_status",
            TaskOperation::KanbanMove => "kanban_move",
            TaskOperation::SetTimeWindow => "set_time_window",
        }
    }
}

impl Access {
    pub fn permits<'a>(
        &self,
        owner_id: &str,
        mut assignee_ids: impl Iterator<Item = &'a str>,
        user_id: &str,
    ) -> bool {
        if owner_id == user_id {
            return true;
        }
        match self {
            Access::Owner => false,
            Access::OwnerOrAssignee => assignee_ids.any(|id| id == user_id),
        }
    }
}
