// ABOUTME: End-to-end clone run: preconditions, schema, data, routines
// ABOUTME: Owns both connections and releases them exactly once on every exit path

use anyhow::{bail, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use super::copier::{BatchCopyResult, BatchRowCopier};
use super::events::{CloneEvent, EventEmitter};
use super::guard::ReadOnlyGuard;
use super::routines::{RoutineCounts, RoutineReplicator};
use super::schema::SchemaReplicator;
use crate::engine::{Connector, ObjectKind, SourceDatabase, TargetDatabase};
use crate::profile::{ConnectionProfile, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "role", rename_all = "camelCase")]
pub enum SessionState {
    Connecting(Role),
    EnforcingReadOnly,
    ReplicatingSchema,
    CopyingTables,
    ReplicatingRoutines,
    Finalizing,
    Succeeded,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Succeeded | SessionState::Failed)
    }
}

/// Final summary of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CloneResult {
    pub tables_cloned: usize,
    pub views_cloned: usize,
    pub procedures_cloned: usize,
    pub functions_cloned: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub failed_rows: u64,
    pub tables: Vec<BatchCopyResult>,
    pub duration_ms: u64,
}

impl CloneResult {
    /// Tables whose post-copy counts differ.
    pub fn mismatched_tables(&self) -> impl Iterator<Item = &BatchCopyResult> {
        self.tables
            .iter()
            .filter(|t| t.status == super::copier::CopyStatus::Mismatch)
    }
}

struct RunSummary {
    tables: Vec<BatchCopyResult>,
    routines: RoutineCounts,
}

/// One clone from a source profile to a target profile.
pub struct CloneSession {
    connector: Arc<dyn Connector>,
    source: ConnectionProfile,
    target: ConnectionProfile,
    events: EventEmitter,
    max_failed_rows: Option<u64>,
    state: SessionState,
}

impl CloneSession {
    /// Build a session. Profiles are re-tagged with their roles so a profile
    /// can never reach the wrong side.
    pub fn new(
        connector: Arc<dyn Connector>,
        source: &ConnectionProfile,
        target: &ConnectionProfile,
    ) -> Self {
        Self {
            connector,
            source: source.with_role(Role::Source),
            target: target.with_role(Role::Target),
            events: EventEmitter::new(),
            max_failed_rows: None,
            state: SessionState::Connecting(Role::Source),
        }
    }

    /// Fail the run when more rows than this could not be copied.
    pub fn with_max_failed_rows(mut self, max_failed_rows: Option<u64>) -> Self {
        self.max_failed_rows = max_failed_rows;
        self
    }

    /// Label used for tracing output.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.events = self.events.with_label(label);
        self
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<CloneEvent> {
        self.events.subscribe()
    }

    pub fn add_subscriber(&mut self, tx: UnboundedSender<CloneEvent>) {
        self.events.add_subscriber(tx);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run to a terminal state. Never returns an error: failures are folded
    /// into the result and the final event.
    pub async fn run(mut self) -> CloneResult {
        let started = Instant::now();
        let mut source: Option<Box<dyn SourceDatabase>> = None;
        let mut target: Option<Box<dyn TargetDatabase>> = None;

        let outcome = self.execute(&mut source, &mut target).await;
        if outcome.is_ok() {
            self.transition(SessionState::Finalizing);
        }
        self.release(source, target).await;

        let mut result = match outcome {
            Ok(summary) => self.summarize(summary),
            Err(err) => CloneResult {
                error: Some(format!("{:#}", err)),
                ..CloneResult::default()
            },
        };
        result.duration_ms = started.elapsed().as_millis() as u64;

        let message = if result.success {
            self.transition(SessionState::Succeeded);
            format!(
                "Database cloned successfully! {} tables, {} views copied. Source database remains untouched.",
                result.tables_cloned, result.views_cloned
            )
        } else {
            self.transition(SessionState::Failed);
            result.error.clone().unwrap_or_else(|| "Clone failed".to_string())
        };

        self.events.emit(CloneEvent::Finished {
            result: result.clone(),
            message,
        });
        result
    }

    async fn execute(
        &mut self,
        source_slot: &mut Option<Box<dyn SourceDatabase>>,
        target_slot: &mut Option<Box<dyn TargetDatabase>>,
    ) -> Result<RunSummary> {
        let events = self.events.clone();

        self.transition(SessionState::Connecting(Role::Source));
        ReadOnlyGuard::check_profiles(&self.source, &self.target)?;
        events.progress("Connecting to source database...");
        let source = source_slot.insert(self.connector.connect_source(&self.source).await?);

        self.transition(SessionState::EnforcingReadOnly);
        ReadOnlyGuard::enforce(source.as_mut()).await?;
        events.progress("Source database connected (READ-ONLY mode enforced)");

        self.transition(SessionState::Connecting(Role::Target));
        events.progress("Connecting to target database...");
        let target = target_slot.insert(self.connector.connect_target(&self.target).await?);

        self.transition(SessionState::ReplicatingSchema);
        let schema = SchemaReplicator::new(&events);
        schema
            .prepare_target(target.as_mut(), self.target.database_name()?)
            .await?;
        schema.clean_target(target.as_mut()).await?;

        events.progress("Fetching table list from source...");
        let tables = source.list_objects(ObjectKind::Table).await?;
        events.progress(format!("Found {} tables to clone", tables.len()));
        for table in &tables {
            schema
                .create_table(source.as_mut(), target.as_mut(), table)
                .await?;
        }

        self.transition(SessionState::CopyingTables);
        let copier = BatchRowCopier::new(&events);
        let mut results = Vec::with_capacity(tables.len());
        for (i, table) in tables.iter().enumerate() {
            events.progress(format!(
                "Cloning table {}/{}: {}",
                i + 1,
                tables.len(),
                table
            ));
            results.push(
                copier
                    .copy_table(source.as_mut(), target.as_mut(), table)
                    .await?,
            );
        }
        target.set_foreign_key_checks(true).await?;

        self.transition(SessionState::ReplicatingRoutines);
        let source_database = self.source.database_name()?.to_string();
        let routines = RoutineReplicator::new(&events, &source_database)
            .replicate(source.as_mut(), target.as_mut())
            .await?;

        Ok(RunSummary {
            tables: results,
            routines,
        })
    }

    fn summarize(&self, summary: RunSummary) -> CloneResult {
        let failed_rows: u64 = summary.tables.iter().map(|t| t.failed_rows).sum();
        let mut result = CloneResult {
            tables_cloned: summary.tables.len(),
            views_cloned: summary.routines.views,
            procedures_cloned: summary.routines.procedures,
            functions_cloned: summary.routines.functions,
            success: true,
            error: None,
            failed_rows,
            tables: summary.tables,
            duration_ms: 0,
        };

        if let Err(err) = check_failed_rows(failed_rows, self.max_failed_rows) {
            result.success = false;
            result.error = Some(err.to_string());
        }
        result
    }

    /// Close whichever connections were opened. Close errors are logged and
    /// never replace the run's outcome.
    async fn release(
        &self,
        source: Option<Box<dyn SourceDatabase>>,
        target: Option<Box<dyn TargetDatabase>>,
    ) {
        if let Some(source) = source {
            if let Err(err) = source.close().await {
                tracing::warn!("{:#}", err);
            }
        }
        if let Some(target) = target {
            if let Err(err) = target.close().await {
                tracing::warn!("{:#}", err);
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        self.state = next;
        self.events.emit(CloneEvent::StateChanged { state: next });
    }
}

fn check_failed_rows(failed_rows: u64, max_failed_rows: Option<u64>) -> Result<()> {
    match max_failed_rows {
        Some(max) if failed_rows > max => bail!(
            "{} rows failed to copy, more than the allowed {}",
            failed_rows,
            max
        ),
        _ => Ok(()),
    }
}

/// Shared factory for sessions: one connector and one failure policy.
#[derive(Clone)]
pub struct CloneRunner {
    connector: Arc<dyn Connector>,
    max_failed_rows: Option<u64>,
}

impl CloneRunner {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            max_failed_rows: None,
        }
    }

    pub fn with_max_failed_rows(mut self, max_failed_rows: Option<u64>) -> Self {
        self.max_failed_rows = max_failed_rows;
        self
    }

    pub fn session(&self, source: &ConnectionProfile, target: &ConnectionProfile) -> CloneSession {
        CloneSession::new(Arc::clone(&self.connector), source, target)
            .with_max_failed_rows(self.max_failed_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_row_policy() {
        assert!(check_failed_rows(10, None).is_ok());
        assert!(check_failed_rows(3, Some(3)).is_ok());
        let err = check_failed_rows(4, Some(3)).unwrap_err();
        assert_eq!(err.to_string(), "4 rows failed to copy, more than the allowed 3");
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Succeeded.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Finalizing.is_terminal());
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_value(SessionState::Connecting(Role::Target)).unwrap(),
            serde_json::json!({"state": "connecting", "role": "target"})
        );
        assert_eq!(
            serde_json::to_value(SessionState::CopyingTables).unwrap(),
            serde_json::json!({"state": "copyingTables"})
        );
    }
}
