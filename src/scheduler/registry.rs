// ABOUTME: Registry of jobs with one cancellable trigger task per enabled job
// ABOUTME: Runs clone sessions on schedule or on demand and records their outcome

use anyhow::Result;
use chrono::{Local, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cron::CronSchedule;
use super::error::{SchedulerError, SchedulerResult};
use super::job::{parse_schedule, ExecutionRecord, Job, JobUpdate, JobView, NewJob, RunTrigger};
use super::store::JobStore;
use crate::clone::CloneRunner;
use crate::config::DEFAULT_HISTORY_LIMIT;
use crate::logs::{LogEntry, LogLevel, LogStore};

struct JobEntry {
    job: Job,
    trigger: Option<CancellationToken>,
    history: VecDeque<ExecutionRecord>,
    /// Set when the job is deleted so in-flight runs stop writing logs.
    removed: Arc<AtomicBool>,
}

impl JobEntry {
    fn new(job: Job) -> Self {
        Self {
            job,
            trigger: None,
            history: VecDeque::new(),
            removed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn disarm(&mut self) {
        if let Some(token) = self.trigger.take() {
            token.cancel();
        }
    }
}

struct Shared {
    jobs: RwLock<HashMap<String, JobEntry>>,
    store: JobStore,
    logs: Arc<LogStore>,
    runner: CloneRunner,
    history_limit: AtomicUsize,
    shutdown: CancellationToken,
}

/// Schedules and runs clone jobs. Cloning the handle shares the registry.
#[derive(Clone)]
pub struct JobScheduler {
    shared: Arc<Shared>,
}

impl JobScheduler {
    pub fn new(store: JobStore, logs: Arc<LogStore>, runner: CloneRunner) -> Self {
        Self {
            shared: Arc::new(Shared {
                jobs: RwLock::new(HashMap::new()),
                store,
                logs,
                runner,
                history_limit: AtomicUsize::new(DEFAULT_HISTORY_LIMIT),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Cap on in-memory execution records per job. Applies to every handle
    /// sharing this registry.
    pub fn with_history_limit(self, limit: usize) -> Self {
        self.set_history_limit(limit);
        self
    }

    pub fn set_history_limit(&self, limit: usize) {
        self.shared
            .history_limit
            .store(limit.max(1), Ordering::SeqCst);
    }

    pub fn logs(&self) -> &Arc<LogStore> {
        &self.shared.logs
    }

    /// Reload persisted jobs and arm the enabled ones. Jobs that can no
    /// longer be scheduled are skipped and logged. Returns the number of
    /// jobs restored.
    pub async fn start(&self) -> Result<usize> {
        let persisted = self.shared.store.load().await?;
        let mut jobs = self.shared.jobs.write().await;
        let mut restored = 0;

        for job in persisted {
            if let Err(e) = job.cron() {
                tracing::error!("Skipping job '{}' ({}): {}", job.name, job.id, e);
                self.shared
                    .logs
                    .record(
                        LogEntry::new(
                            LogLevel::Error,
                            format!("Failed to restore job '{}': {}", job.name, e),
                        )
                        .for_job(&job.id, &job.name),
                    )
                    .await;
                continue;
            }

            let id = job.id.clone();
            let mut entry = JobEntry::new(job);
            if entry.job.enabled {
                self.shared.arm(&mut entry);
            }
            jobs.insert(id, entry);
            restored += 1;
        }

        tracing::info!("Scheduler started with {} job(s)", restored);
        Ok(restored)
    }

    /// Validate and register a new job, then persist the job set.
    pub async fn create(&self, new_job: NewJob) -> SchedulerResult<Job> {
        let job = new_job.into_job()?;
        let id = job.id.clone();

        let mut jobs = self.shared.jobs.write().await;
        jobs.insert(id.clone(), JobEntry::new(job.clone()));
        if let Err(e) = self.shared.persist(&jobs).await {
            jobs.remove(&id);
            return Err(SchedulerError::Storage(e));
        }
        if job.enabled {
            if let Some(entry) = jobs.get_mut(&id) {
                self.shared.arm(entry);
            }
        }
        drop(jobs);

        tracing::info!("Created job '{}' ({}) with schedule '{}'", job.name, job.id, job.schedule);
        self.shared
            .logs
            .record(
                LogEntry::new(
                    LogLevel::Info,
                    format!("Job '{}' created with schedule '{}'", job.name, job.schedule),
                )
                .for_job(&job.id, &job.name),
            )
            .await;
        Ok(job)
    }

    /// All jobs, oldest first, with passwords masked.
    pub async fn list(&self) -> Vec<JobView> {
        let jobs = self.shared.jobs.read().await;
        let mut views: Vec<JobView> = jobs.values().map(view_of).collect();
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        views
    }

    pub async fn get(&self, id: &str) -> SchedulerResult<JobView> {
        let jobs = self.shared.jobs.read().await;
        jobs.get(id)
            .map(view_of)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    /// Apply an update. A new schedule is validated before anything changes;
    /// the trigger is re-armed when the schedule or enabled flag changes.
    pub async fn update(&self, id: &str, update: JobUpdate) -> SchedulerResult<Job> {
        let schedule = match &update.schedule {
            Some(expression) => {
                parse_schedule(expression)?;
                Some(expression.trim().to_string())
            }
            None => None,
        };
        let name = match &update.name {
            Some(name) if name.trim().is_empty() => return Err(SchedulerError::MissingField("name")),
            Some(name) => Some(name.trim().to_string()),
            None => None,
        };

        let mut jobs = self.shared.jobs.write().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        let previous = entry.job.clone();
        if let Some(name) = name {
            entry.job.name = name;
        }
        if let Some(schedule) = schedule {
            entry.job.schedule = schedule;
        }
        if let Some(enabled) = update.enabled {
            entry.job.enabled = enabled;
        }

        if let Err(e) = self.shared.persist(&jobs).await {
            if let Some(entry) = jobs.get_mut(id) {
                entry.job = previous;
            }
            return Err(SchedulerError::Storage(e));
        }

        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        let rearm = previous.schedule != entry.job.schedule || previous.enabled != entry.job.enabled;
        if rearm {
            entry.disarm();
            if entry.job.enabled {
                self.shared.arm(entry);
            }
        }
        let job = entry.job.clone();
        drop(jobs);

        let message = match (previous.enabled, job.enabled) {
            (false, true) => format!("Job '{}' enabled", job.name),
            (true, false) => format!("Job '{}' disabled", job.name),
            _ => format!("Job '{}' updated", job.name),
        };
        tracing::info!("{}", message);
        self.shared
            .logs
            .record(LogEntry::new(LogLevel::Info, message).for_job(&job.id, &job.name))
            .await;
        Ok(job)
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> SchedulerResult<Job> {
        self.update(
            id,
            JobUpdate {
                enabled: Some(enabled),
                ..JobUpdate::default()
            },
        )
        .await
    }

    /// Stop the trigger and forget the job. A run already in progress
    /// finishes but writes no further log entries.
    pub async fn delete(&self, id: &str) -> SchedulerResult<()> {
        let mut jobs = self.shared.jobs.write().await;
        let mut entry = jobs
            .remove(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;

        if let Err(e) = self.shared.persist(&jobs).await {
            jobs.insert(id.to_string(), entry);
            return Err(SchedulerError::Storage(e));
        }
        entry.disarm();
        entry.removed.store(true, Ordering::SeqCst);
        drop(jobs);

        tracing::info!("Deleted job '{}' ({})", entry.job.name, id);
        Ok(())
    }

    /// Start an out-of-schedule run. The job's trigger is not touched.
    pub async fn run_now(&self, id: &str) -> SchedulerResult<JoinHandle<ExecutionRecord>> {
        let (job, removed) = {
            let jobs = self.shared.jobs.read().await;
            let entry = jobs
                .get(id)
                .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
            (entry.job.clone(), Arc::clone(&entry.removed))
        };
        let shared = Arc::clone(&self.shared);
        Ok(tokio::spawn(async move {
            shared.execute(job, RunTrigger::Manual, removed).await
        }))
    }

    /// Execution history, newest first.
    pub async fn history(&self, id: &str) -> SchedulerResult<Vec<ExecutionRecord>> {
        let jobs = self.shared.jobs.read().await;
        let entry = jobs
            .get(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        Ok(entry.history.iter().rev().cloned().collect())
    }

    /// Whether the job currently has a live trigger.
    pub async fn is_armed(&self, id: &str) -> bool {
        let jobs = self.shared.jobs.read().await;
        jobs.get(id)
            .and_then(|e| e.trigger.as_ref())
            .is_some_and(|t| !t.is_cancelled())
    }

    /// Cancel every trigger. Runs already started are left to finish.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let mut jobs = self.shared.jobs.write().await;
        for entry in jobs.values_mut() {
            entry.disarm();
        }
        tracing::info!("Scheduler stopped");
    }
}

fn view_of(entry: &JobEntry) -> JobView {
    let mut view = entry.job.view();
    view.last_run = entry.history.back().cloned();
    view
}

impl Shared {
    async fn persist(&self, jobs: &HashMap<String, JobEntry>) -> Result<()> {
        let mut list: Vec<Job> = jobs.values().map(|e| e.job.clone()).collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        self.store.save(&list).await
    }

    /// Spawn the trigger task for an entry whose schedule has been validated.
    fn arm(self: &Arc<Self>, entry: &mut JobEntry) {
        let cron = match entry.job.cron() {
            Ok(cron) => cron,
            Err(e) => {
                tracing::error!("Cannot arm job '{}': {}", entry.job.name, e);
                return;
            }
        };
        entry.disarm();
        let token = self.shutdown.child_token();
        entry.trigger = Some(token.clone());

        let shared = Arc::clone(self);
        let job_id = entry.job.id.clone();
        tokio::spawn(async move { shared.trigger_loop(job_id, cron, token).await });
    }

    async fn trigger_loop(self: Arc<Self>, job_id: String, cron: CronSchedule, token: CancellationToken) {
        loop {
            let now = Local::now();
            let Some(next) = cron.next_after(&now) else {
                tracing::warn!("Schedule '{}' of job {} never fires again", cron, job_id);
                return;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            let snapshot = {
                let jobs = self.jobs.read().await;
                jobs.get(&job_id)
                    .filter(|e| e.job.enabled)
                    .map(|e| (e.job.clone(), Arc::clone(&e.removed)))
            };
            let Some((job, removed)) = snapshot else {
                return;
            };

            // Runs are detached so a slow clone never delays the next trigger
            let shared = Arc::clone(&self);
            tokio::spawn(async move {
                shared.execute(job, RunTrigger::Scheduled, removed).await;
            });
        }
    }

    /// Run one clone for `job`, forwarding its events to the log store.
    async fn execute(
        self: Arc<Self>,
        job: Job,
        trigger: RunTrigger,
        removed: Arc<AtomicBool>,
    ) -> ExecutionRecord {
        let started_at = Utc::now();
        let trigger_label = match trigger {
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Manual => "manual",
        };
        tracing::info!("Starting {} run of job '{}'", trigger_label, job.name);
        self.log_for_job(
            &job,
            &removed,
            LogEntry::new(
                LogLevel::Info,
                format!("Starting {} run of job '{}'", trigger_label, job.name),
            )
            .with_metadata(serde_json::json!({ "trigger": trigger })),
        )
        .await;

        let mut session = self
            .runner
            .session(&job.source, &job.target)
            .with_label(job.name.clone());
        let mut events = session.subscribe();

        let forward = async {
            while let Some(event) = events.recv().await {
                if let Some(entry) = event.log_entry() {
                    self.log_for_job(&job, &removed, entry).await;
                }
            }
        };
        let (result, ()) = tokio::join!(session.run(), forward);

        let record = ExecutionRecord::from_result(&job.id, trigger, started_at, &result);
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(&job.id) {
            entry.history.push_back(record.clone());
            let limit = self.history_limit.load(Ordering::SeqCst);
            while entry.history.len() > limit {
                entry.history.pop_front();
            }
        }
        record
    }

    async fn log_for_job(&self, job: &Job, removed: &AtomicBool, entry: LogEntry) {
        if removed.load(Ordering::SeqCst) {
            return;
        }
        self.logs.record(entry.for_job(&job.id, &job.name)).await;
    }
}
