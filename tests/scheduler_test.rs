// ABOUTME: Job scheduler behaviour: validation, persistence, triggers and history
// ABOUTME: Jobs run real clone sessions against the in-memory MySQL stand-in

use chrono::Utc;
use database_cloner::clone::CloneRunner;
use database_cloner::logs::{LogLevel, LogQuery, LogStore};
use database_cloner::profile::{ConnectionProfile, Role};
use database_cloner::row::RowValue;
use database_cloner::scheduler::{
    Job, JobScheduler, JobStore, JobUpdate, NewJob, RunTrigger, SchedulerError,
};
use database_cloner::testing::{MemoryConnector, MemoryServer, TableSpec};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn source_profile() -> ConnectionProfile {
    ConnectionProfile::new("source-host", 3306, "reader", "pw", Some("shop".into()), Role::Source)
}

fn target_profile() -> ConnectionProfile {
    ConnectionProfile::new("target-host", 3306, "writer", "pw", Some("shop_copy".into()), Role::Target)
}

fn runner() -> CloneRunner {
    let source = MemoryServer::new();
    source.add_table("shop", TableSpec::new("items").column("id").primary_key(&["id"]));
    source.load_rows(
        "shop",
        "items",
        (1..=10).map(|i| vec![RowValue::Int(i)]).collect(),
    );
    CloneRunner::new(Arc::new(MemoryConnector::new(source, MemoryServer::new())))
}

fn scheduler_at(path: &Path) -> JobScheduler {
    JobScheduler::new(
        JobStore::new(path),
        Arc::new(LogStore::in_memory(1000)),
        runner(),
    )
}

fn new_job(name: &str, schedule: &str, enabled: bool) -> NewJob {
    NewJob {
        name: Some(name.to_string()),
        schedule: Some(schedule.to_string()),
        source: Some(source_profile()),
        target: Some(target_profile()),
        enabled: Some(enabled),
    }
}

async fn job_logs(scheduler: &JobScheduler, job_id: &str) -> usize {
    scheduler
        .logs()
        .query(&LogQuery {
            job_id: Some(job_id.to_string()),
            ..LogQuery::default()
        })
        .await
        .total
}

#[tokio::test]
async fn test_invalid_schedule_rejected_and_not_persisted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("jobs.json");
    let scheduler = scheduler_at(&path);

    let err = scheduler
        .create(new_job("nightly", "not-a-cron", true))
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));
    assert!(err.to_string().contains("not-a-cron"));
    assert!(scheduler.list().await.is_empty());
    assert!(JobStore::new(&path).load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_fields_rejected() {
    let dir = tempdir().unwrap();
    let scheduler = scheduler_at(&dir.path().join("jobs.json"));

    let mut job = new_job("nightly", "0 2 * * *", true);
    job.source = None;
    let err = scheduler.create(job).await.unwrap_err();

    assert!(matches!(err, SchedulerError::MissingField("source")));
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_created_job_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("jobs.json");

    let scheduler = scheduler_at(&path);
    let job = scheduler
        .create(new_job("nightly", "0 2 * * *", true))
        .await
        .unwrap();
    assert!(scheduler.is_armed(&job.id).await);
    scheduler.shutdown().await;

    let restarted = scheduler_at(&path);
    assert_eq!(restarted.start().await.unwrap(), 1);
    let view = restarted.get(&job.id).await.unwrap();
    assert_eq!(view.name, "nightly");
    assert_eq!(view.schedule, "0 2 * * *");
    assert!(view.next_run.is_some());
    assert_eq!(view.source.password, "***");
    assert!(restarted.is_armed(&job.id).await);
    restarted.shutdown().await;
}

#[tokio::test]
async fn test_disable_and_enable_keep_the_job() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("jobs.json");
    let scheduler = scheduler_at(&path);
    let job = scheduler
        .create(new_job("nightly", "0 2 * * *", true))
        .await
        .unwrap();

    let disabled = scheduler.set_enabled(&job.id, false).await.unwrap();
    assert!(!disabled.enabled);
    assert!(!scheduler.is_armed(&job.id).await);
    assert_eq!(scheduler.list().await.len(), 1);
    assert!(scheduler.get(&job.id).await.unwrap().next_run.is_none());

    let persisted = JobStore::new(&path).load().await.unwrap();
    assert!(!persisted[0].enabled);

    scheduler.set_enabled(&job.id, true).await.unwrap();
    assert!(scheduler.is_armed(&job.id).await);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_update_validates_schedule_first() {
    let dir = tempdir().unwrap();
    let scheduler = scheduler_at(&dir.path().join("jobs.json"));
    let job = scheduler
        .create(new_job("nightly", "0 2 * * *", true))
        .await
        .unwrap();

    let err = scheduler
        .update(
            &job.id,
            JobUpdate {
                name: Some("renamed".into()),
                schedule: Some("99 * * * *".into()),
                ..JobUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
    let unchanged = scheduler.get(&job.id).await.unwrap();
    assert_eq!(unchanged.name, "nightly");
    assert_eq!(unchanged.schedule, "0 2 * * *");

    let updated = scheduler
        .update(
            &job.id,
            JobUpdate {
                schedule: Some("30 4 * * MON-FRI".into()),
                ..JobUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.schedule, "30 4 * * MON-FRI");
    assert!(scheduler.is_armed(&job.id).await);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let scheduler = JobScheduler::new(
        JobStore::in_memory(),
        Arc::new(LogStore::in_memory(100)),
        runner(),
    );
    assert!(matches!(scheduler.get("nope").await, Err(SchedulerError::NotFound(_))));
    assert!(matches!(scheduler.delete("nope").await, Err(SchedulerError::NotFound(_))));
    assert!(matches!(scheduler.run_now("nope").await, Err(SchedulerError::NotFound(_))));
    assert!(matches!(scheduler.history("nope").await, Err(SchedulerError::NotFound(_))));
}

#[tokio::test]
async fn test_manual_run_logs_and_records_history() {
    let dir = tempdir().unwrap();
    let scheduler = scheduler_at(&dir.path().join("jobs.json"));
    let job = scheduler
        .create(new_job("nightly", "0 2 * * *", false))
        .await
        .unwrap();

    let record = scheduler.run_now(&job.id).await.unwrap().await.unwrap();

    assert!(record.success, "run failed: {:?}", record.error);
    assert_eq!(record.trigger, RunTrigger::Manual);
    assert_eq!(record.tables_cloned, 1);

    let page = scheduler
        .logs()
        .query(&LogQuery {
            job_id: Some(job.id.clone()),
            ..LogQuery::default()
        })
        .await;
    // Newest first: the success entry closes the run
    assert_eq!(page.logs[0].level, LogLevel::Success);
    assert!(page.logs[0].message.starts_with("Database cloned successfully!"));
    assert!(page
        .logs
        .iter()
        .any(|e| e.message == "Starting manual run of job 'nightly'"));
    assert!(page.logs.iter().all(|e| e.job_name.as_deref() == Some("nightly")));

    let history = scheduler.history(&job.id).await.unwrap();
    assert_eq!(history, vec![record.clone()]);
    assert_eq!(scheduler.get(&job.id).await.unwrap().last_run, Some(record));
}

#[tokio::test]
async fn test_history_is_capped_newest_first() {
    let dir = tempdir().unwrap();
    let scheduler = scheduler_at(&dir.path().join("jobs.json")).with_history_limit(2);
    let job = scheduler
        .create(new_job("nightly", "0 2 * * *", false))
        .await
        .unwrap();

    let mut records = Vec::new();
    for _ in 0..3 {
        records.push(scheduler.run_now(&job.id).await.unwrap().await.unwrap());
    }

    let history = scheduler.history(&job.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0], records[2]);
    assert_eq!(history[1], records[1]);
}

#[tokio::test]
async fn test_history_limit_applies_to_shared_handles() {
    let dir = tempdir().unwrap();
    let scheduler = scheduler_at(&dir.path().join("jobs.json"));
    let api_handle = scheduler.clone();
    let scheduler = scheduler.with_history_limit(1);
    let job = api_handle
        .create(new_job("nightly", "0 2 * * *", false))
        .await
        .unwrap();

    api_handle.run_now(&job.id).await.unwrap().await.unwrap();
    let second = api_handle.run_now(&job.id).await.unwrap().await.unwrap();

    let history = scheduler.history(&job.id).await.unwrap();
    assert_eq!(history, vec![second]);
}

#[tokio::test]
async fn test_schedule_fires_and_delete_stops_it() {
    let dir = tempdir().unwrap();
    let scheduler = scheduler_at(&dir.path().join("jobs.json"));
    let job = scheduler
        .create(new_job("every second", "* * * * * *", true))
        .await
        .unwrap();

    let mut fired = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let history = scheduler.history(&job.id).await.unwrap();
        if history.iter().any(|r| r.trigger == RunTrigger::Scheduled) {
            fired = true;
            break;
        }
    }
    assert!(fired, "scheduled run did not fire");

    scheduler.delete(&job.id).await.unwrap();
    assert!(scheduler.list().await.is_empty());

    // Let any run that was already going finish, then watch for new output
    tokio::time::sleep(Duration::from_millis(300)).await;
    let before = job_logs(&scheduler, &job.id).await;
    tokio::time::sleep(Duration::from_millis(2200)).await;
    assert_eq!(job_logs(&scheduler, &job.id).await, before);
}

#[tokio::test]
async fn test_restart_skips_unschedulable_jobs() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("jobs.json");
    let job = |id: &str, schedule: &str| Job {
        id: id.to_string(),
        name: format!("job {}", id),
        schedule: schedule.to_string(),
        source: source_profile(),
        target: target_profile(),
        enabled: true,
        created_at: Utc::now(),
    };
    JobStore::new(&path)
        .save(&[job("good", "0 3 * * *"), job("bad", "61 * * * *")])
        .await
        .unwrap();

    let scheduler = scheduler_at(&path);
    assert_eq!(scheduler.start().await.unwrap(), 1);

    let ids: Vec<String> = scheduler.list().await.into_iter().map(|j| j.id).collect();
    assert_eq!(ids, vec!["good"]);
    let errors = scheduler
        .logs()
        .query(&LogQuery {
            level: Some(LogLevel::Error),
            ..LogQuery::default()
        })
        .await;
    assert_eq!(errors.total, 1);
    assert!(errors.logs[0].message.starts_with("Failed to restore job 'job bad'"));
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_disarms_every_job() {
    let dir = tempdir().unwrap();
    let scheduler = scheduler_at(&dir.path().join("jobs.json"));
    let a = scheduler.create(new_job("a", "0 1 * * *", true)).await.unwrap();
    let b = scheduler.create(new_job("b", "0 2 * * *", true)).await.unwrap();

    scheduler.shutdown().await;

    assert!(!scheduler.is_armed(&a.id).await);
    assert!(!scheduler.is_armed(&b.id).await);
    assert_eq!(scheduler.list().await.len(), 2);
}
