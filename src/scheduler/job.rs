// ABOUTME: Job definitions, API input shapes and execution records
// ABOUTME: Jobs persist with credentials; views handed to callers are redacted

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use super::cron::CronSchedule;
use super::error::{SchedulerError, SchedulerResult};
use crate::clone::CloneResult;
use crate::profile::{ConnectionProfile, Role};

/// A named recurring clone between two fixed profiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub name: String,
    pub schedule: String,
    pub source: ConnectionProfile,
    pub target: ConnectionProfile,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Parse the stored schedule.
    pub fn cron(&self) -> SchedulerResult<CronSchedule> {
        parse_schedule(&self.schedule)
    }

    /// Next trigger time in local time, for enabled jobs.
    pub fn next_run(&self) -> Option<DateTime<Local>> {
        if !self.enabled {
            return None;
        }
        self.cron().ok()?.next_after(&Local::now())
    }

    pub fn view(&self) -> JobView {
        JobView {
            id: self.id.clone(),
            name: self.name.clone(),
            schedule: self.schedule.clone(),
            source: self.source.redacted(),
            target: self.target.redacted(),
            enabled: self.enabled,
            created_at: self.created_at,
            next_run: self.next_run(),
            last_run: None,
        }
    }
}

/// Validate a cron expression, naming it in the error.
pub fn parse_schedule(expression: &str) -> SchedulerResult<CronSchedule> {
    CronSchedule::parse(expression).map_err(|e| SchedulerError::InvalidSchedule {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Body of a job-creation request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub name: Option<String>,
    pub schedule: Option<String>,
    pub source: Option<ConnectionProfile>,
    pub target: Option<ConnectionProfile>,
    pub enabled: Option<bool>,
}

impl NewJob {
    /// Check every field and build the job. Nothing is stored on error.
    pub fn into_job(self) -> SchedulerResult<Job> {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or(SchedulerError::MissingField("name"))?;
        let schedule = self
            .schedule
            .filter(|s| !s.trim().is_empty())
            .ok_or(SchedulerError::MissingField("schedule"))?;
        let source = self
            .source
            .ok_or(SchedulerError::MissingField("source"))?
            .with_role(Role::Source);
        let target = self
            .target
            .ok_or(SchedulerError::MissingField("target"))?
            .with_role(Role::Target);

        parse_schedule(&schedule)?;
        crate::clone::ReadOnlyGuard::check_profiles(&source, &target)
            .map_err(|e| SchedulerError::InvalidJob(format!("{:#}", e)))?;

        Ok(Job {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            schedule: schedule.trim().to_string(),
            source,
            target,
            enabled: self.enabled.unwrap_or(true),
            created_at: Utc::now(),
        })
    }
}

/// Body of a job-update request. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub enabled: Option<bool>,
    pub name: Option<String>,
    pub schedule: Option<String>,
}

/// Job as shown to API and CLI callers: passwords masked, schedule info
/// added.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    pub name: String,
    pub schedule: String,
    pub source: ConnectionProfile,
    pub target: ConnectionProfile,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub next_run: Option<DateTime<Local>>,
    pub last_run: Option<ExecutionRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Scheduled,
    Manual,
}

/// One finished execution of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub job_id: String,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tables_cloned: usize,
    pub views_cloned: usize,
    pub failed_rows: u64,
}

impl ExecutionRecord {
    pub fn from_result(
        job_id: &str,
        trigger: RunTrigger,
        started_at: DateTime<Utc>,
        result: &CloneResult,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            trigger,
            started_at,
            finished_at: Utc::now(),
            duration_ms: result.duration_ms,
            success: result.success,
            error: result.error.clone(),
            tables_cloned: result.tables_cloned,
            views_cloned: result.views_cloned,
            failed_rows: result.failed_rows,
        }
    }
}
