use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    OneTime,
    Daily,
    Social,
}

impl_enum_str!(TaskType, OneTime => "ONE_TIME", Daily => "DAILY", Social => "SOCIAL");

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Task already completed")]
    AlreadyCompleted,
    #[error("Daily task already completed today")]
    CompletedToday,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskProgress {
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// How a completion may be written once it is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionGuard {
    /// First completion: the row must still be uncompleted.
    FirstTime,
    /// Daily re-arm: the stored completion must be older than this instant.
    CompletedBefore(DateTime<Utc>),
}

/// Start of the UTC calendar day containing `now`.
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

/// Decides whether a task can be completed at `now`.
///
/// One-time and social tasks complete once. Daily tasks re-arm when the UTC
/// calendar day changes; the completed flag itself never goes back to false.
pub fn check_completion(
    task_type: TaskType,
    progress: TaskProgress,
    now: DateTime<Utc>,
) -> Result<CompletionGuard, TaskError> {
    if !progress.completed {
        return Ok(CompletionGuard::FirstTime);
    }

    match (task_type, progress.completed_at) {
        (TaskType::Daily, Some(completed_at)) => {
            let today = day_start(now);
            if completed_at < today {
                Ok(CompletionGuard::CompletedBefore(today))
            } else {
                Err(TaskError::CompletedToday)
            }
        }
        (TaskType::Daily, None) => Ok(CompletionGuard::CompletedBefore(day_start(now))),
        _ => Err(TaskError::AlreadyCompleted),
    }
}
