// ABOUTME: Typed errors returned by the job scheduler
// ABOUTME: Lets callers tell validation failures from unknown ids and storage faults

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Failed to persist jobs: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl SchedulerError {
    /// True for errors caused by the caller's input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidSchedule { .. }
                | SchedulerError::MissingField(_)
                | SchedulerError::InvalidJob(_)
        )
    }
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
