// ABOUTME: Cron-scheduled clone jobs
// ABOUTME: Parsing, persistence and the runtime registry that fires clone sessions

pub mod cron;
pub mod error;
pub mod job;
pub mod registry;
pub mod store;

pub use cron::{CronError, CronSchedule};
pub use error::{SchedulerError, SchedulerResult};
pub use job::{parse_schedule, ExecutionRecord, Job, JobUpdate, JobView, NewJob, RunTrigger};
pub use registry::JobScheduler;
pub use store::JobStore;
