use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ErrorKind;

/// Kinds of remote operation the client performs. Used for logging and to
/// pick the friendly failure sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    ArchiveEmail,
    MarkRead,
    MarkUnread,
    ConvertToTask,
    CompleteTask,
    DeleteTask,
    LoadSummary,
    LoadPlan,
    RegeneratePlan,
    UpgradeSubscription,
    LoadNotifications,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArchiveEmail => "archive_email",
            Self::MarkRead => "mark_read",
            Self::MarkUnread => "mark_unread",
            Self::ConvertToTask => "convert_to_task",
            Self::CompleteTask => "complete_task",
            Self::DeleteTask => "delete_task",
            Self::LoadSummary => "load_summary",
            Self::LoadPlan => "load_plan",
            Self::RegeneratePlan => "regenerate_plan",
            Self::UpgradeSubscription => "upgrade_subscription",
            Self::LoadNotifications => "load_notifications",
        }
    }

    /// Verb phrase used in user-facing sentences ("Failed to archive email.").
    pub fn description(&self) -> &'static str {
        match self {
            Self::ArchiveEmail => "archive email",
            Self::MarkRead => "mark email as read",
            Self::MarkUnread => "mark email as unread",
            Self::ConvertToTask => "convert email to task",
            Self::CompleteTask => "complete task",
            Self::DeleteTask => "delete task",
            Self::LoadSummary => "load summary",
            Self::LoadPlan => "load your plan",
            Self::RegeneratePlan => "regenerate your plan",
            Self::UpgradeSubscription => "upgrade your subscription",
            Self::LoadNotifications => "load notifications",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized outcome of a remote action.
///
/// `success == false` always carries a non-empty, user-presentable `message`
/// and an `error_kind`; `success == true` never carries an `error_kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult<D> {
    pub success: bool,
    pub action_id: String,
    pub message: String,
    pub data: Option<D>,
    pub error_kind: Option<ErrorKind>,
    pub attempts: u32,
}

impl<D> ActionResult<D> {
    pub fn succeeded(data: D, attempts: u32) -> Self {
        Self {
            success: true,
            action_id: Uuid::new_v4().to_string(),
            message: String::new(),
            data: Some(data),
            error_kind: None,
            attempts,
        }
    }

    pub fn failed(kind: ErrorKind, message: String, attempts: u32) -> Self {
        Self {
            success: false,
            action_id: Uuid::new_v4().to_string(),
            message,
            data: None,
            error_kind: Some(kind),
            attempts,
        }
    }

    /// The error text a view should show, if any.
    pub fn error(&self) -> Option<&str> {
        if self.success {
            None
        } else {
            Some(self.message.as_str())
        }
    }

    pub fn map<U>(self, f: impl FnOnce(D) -> U) -> ActionResult<U> {
        ActionResult {
            success: self.success,
            action_id: self.action_id,
            message: self.message,
            data: self.data.map(f),
            error_kind: self.error_kind,
            attempts: self.attempts,
        }
    }
}

/// Per-call-chain retry bookkeeping. Lives on the executor's stack only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    pub operation: Operation,
    pub resource_id: String,
    pub attempt: u32,
    pub last_error_kind: Option<ErrorKind>,
}

impl RetryContext {
    pub fn new(operation: Operation, resource_id: &str) -> Self {
        Self {
            operation,
            resource_id: resource_id.to_string(),
            attempt: 0,
            last_error_kind: None,
        }
    }
}

/// Options the user picked when turning an email into a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertOptions {
    pub title: Option<String>,
    pub due: Option<NaiveDate>,
    pub list_id: Option<String>,
    /// Archive the source email once the task exists.
    pub archive_email: bool,
}

/// A user action described as plain data, so it can be replayed verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingAction {
    Archive { email_id: String },
    MarkRead { email_id: String, read: bool },
    ConvertToTask { email_id: String, options: ConvertOptions },
    CompleteTask { task_id: String },
    DeleteTask { task_id: String },
}

impl PendingAction {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Archive { .. } => Operation::ArchiveEmail,
            Self::MarkRead { read: true, .. } => Operation::MarkRead,
            Self::MarkRead { read: false, .. } => Operation::MarkUnread,
            Self::ConvertToTask { .. } => Operation::ConvertToTask,
            Self::CompleteTask { .. } => Operation::CompleteTask,
            Self::DeleteTask { .. } => Operation::DeleteTask,
        }
    }

    pub fn resource_id(&self) -> &str {
        match self {
            Self::Archive { email_id }
            | Self::MarkRead { email_id, .. }
            | Self::ConvertToTask { email_id, .. } => email_id,
            Self::CompleteTask { task_id } | Self::DeleteTask { task_id } => task_id,
        }
    }
}

/// The context kept for "retry last failed action".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAction {
    pub action: PendingAction,
    pub kind: ErrorKind,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_carries_message_and_kind() {
        let r: ActionResult<()> =
            ActionResult::failed(ErrorKind::Forbidden, "No access.".into(), 1);
        assert!(!r.success);
        assert_eq!(r.error(), Some("No access."));
        assert_eq!(r.error_kind, Some(ErrorKind::Forbidden));
        assert!(r.data.is_none());
    }

    #[test]
    fn success_has_no_error() {
        let r = ActionResult::succeeded(7, 2);
        assert!(r.success);
        assert_eq!(r.error(), None);
        assert_eq!(r.map(|n| n * 2).data, Some(14));
    }

    #[test]
    fn mark_read_operation_follows_flag() {
        let read = PendingAction::MarkRead { email_id: "e1".into(), read: true };
        let unread = PendingAction::MarkRead { email_id: "e1".into(), read: false };
        assert_eq!(read.operation(), Operation::MarkRead);
        assert_eq!(unread.operation(), Operation::MarkUnread);
        assert_eq!(unread.resource_id(), "e1");
    }
}
