// ABOUTME: Library root for database-cloner
// ABOUTME: Exposes the clone engine, scheduler, log store and HTTP API modules

pub mod clone;
pub mod config;
pub mod engine;
pub mod logs;
pub mod mysql;
pub mod profile;
pub mod row;
pub mod scheduler;
pub mod server;
pub mod testing;
pub mod utils;

pub use clone::{BatchCopyResult, CloneEvent, CloneResult, CloneRunner, CloneSession, CopyStatus};
pub use config::AppConfig;
pub use engine::{Connector, SourceDatabase, TargetDatabase};
pub use logs::{LogEntry, LogLevel, LogStore};
pub use profile::{ConnectionProfile, Role};
pub use scheduler::{Job, JobScheduler, JobStore};
