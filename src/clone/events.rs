// ABOUTME: Progress events emitted by a clone session
// ABOUTME: Fan-out emitter that never blocks on slow or dropped subscribers

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::copier::{BatchCopyResult, CopyStatus};
use super::session::{CloneResult, SessionState};
use crate::logs::{LogEntry, LogLevel};

/// One step of a clone run, in emission order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CloneEvent {
    StateChanged { state: SessionState },
    Progress { message: String },
    Warning { message: String },
    TableCopied { result: BatchCopyResult, message: String },
    Finished { result: CloneResult, message: String },
}

/// Line of the streamed clone response: `{"status": ..., "message": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireMessage {
    pub status: &'static str,
    pub message: String,
}

impl CloneEvent {
    /// Human-readable text, if the event carries any.
    pub fn message(&self) -> Option<&str> {
        match self {
            CloneEvent::StateChanged { .. } => None,
            CloneEvent::Progress { message }
            | CloneEvent::Warning { message }
            | CloneEvent::TableCopied { message, .. }
            | CloneEvent::Finished { message, .. } => Some(message),
        }
    }

    pub fn is_warning(&self) -> bool {
        match self {
            CloneEvent::Warning { .. } => true,
            CloneEvent::TableCopied { result, .. } => result.status == CopyStatus::Mismatch,
            _ => false,
        }
    }

    /// Durable log entry for the event. Plain progress lines and state
    /// changes only go to tracing.
    pub fn log_entry(&self) -> Option<LogEntry> {
        match self {
            CloneEvent::StateChanged { .. } | CloneEvent::Progress { .. } => None,
            CloneEvent::Warning { message } => Some(LogEntry::new(LogLevel::Warning, message.trim())),
            CloneEvent::TableCopied { result, message } => {
                let level = match result.status {
                    CopyStatus::Ok => LogLevel::Info,
                    CopyStatus::Mismatch => LogLevel::Warning,
                };
                Some(LogEntry::new(level, message.trim()).with_metadata(
                    serde_json::to_value(result).unwrap_or(serde_json::Value::Null),
                ))
            }
            CloneEvent::Finished { result, message } => {
                let level = if result.success {
                    LogLevel::Success
                } else {
                    LogLevel::Error
                };
                Some(
                    LogEntry::new(level, message.clone()).with_metadata(serde_json::json!({
                        "durationMs": result.duration_ms,
                        "tablesCloned": result.tables_cloned,
                        "viewsCloned": result.views_cloned,
                        "proceduresCloned": result.procedures_cloned,
                        "functionsCloned": result.functions_cloned,
                        "failedRows": result.failed_rows,
                    })),
                )
            }
        }
    }

    /// Map to the streamed wire format. State changes are not streamed.
    pub fn to_wire(&self) -> Option<WireMessage> {
        let status = match self {
            CloneEvent::StateChanged { .. } => return None,
            CloneEvent::Finished { result, .. } if result.success => "success",
            CloneEvent::Finished { .. } => "error",
            _ => "progress",
        };
        Some(WireMessage {
            status,
            message: self.message().unwrap_or_default().to_string(),
        })
    }
}

/// Sends every event to all subscribers and mirrors it to tracing.
///
/// Subscribers are unbounded channels: emitting never waits, and a closed
/// receiver is simply skipped.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    subscribers: Vec<UnboundedSender<CloneEvent>>,
    label: Option<String>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix tracing output with a label such as a job name.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<CloneEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn add_subscriber(&mut self, tx: UnboundedSender<CloneEvent>) {
        self.subscribers.push(tx);
    }

    pub fn emit(&self, event: CloneEvent) {
        self.trace(&event);
        for subscriber in &self.subscribers {
            let _ = subscriber.send(event.clone());
        }
    }

    pub fn progress(&self, message: impl Into<String>) {
        self.emit(CloneEvent::Progress {
            message: message.into(),
        });
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(CloneEvent::Warning {
            message: message.into(),
        });
    }

    fn trace(&self, event: &CloneEvent) {
        let label = self.label.as_deref().unwrap_or("clone");
        match event {
            CloneEvent::StateChanged { state } => {
                tracing::debug!("[{}] state -> {:?}", label, state)
            }
            CloneEvent::Finished { result, message } if !result.success => {
                tracing::error!("[{}] {}", label, message)
            }
            _ if event.is_warning() => {
                tracing::warn!("[{}] {}", label, event.message().unwrap_or_default().trim())
            }
            _ => tracing::info!("[{}] {}", label, event.message().unwrap_or_default().trim()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_all_subscribers() {
        let mut emitter = EventEmitter::new();
        let mut a = emitter.subscribe();
        let mut b = emitter.subscribe();
        emitter.progress("hello");
        assert_eq!(a.try_recv().unwrap().message(), Some("hello"));
        assert_eq!(b.try_recv().unwrap().message(), Some("hello"));
    }

    #[test]
    fn test_dropped_subscriber_is_ignored() {
        let mut emitter = EventEmitter::new();
        let dropped = emitter.subscribe();
        let mut kept = emitter.subscribe();
        drop(dropped);
        emitter.warning("still delivered");
        let event = kept.try_recv().unwrap();
        assert!(event.is_warning());
    }

    #[test]
    fn test_progress_is_not_logged() {
        let event = CloneEvent::Progress {
            message: "Connecting to source database...".into(),
        };
        assert!(event.log_entry().is_none());
    }

    #[test]
    fn test_mismatch_is_logged_as_warning() {
        let event = CloneEvent::TableCopied {
            result: BatchCopyResult {
                table_name: "t".into(),
                expected_rows: 2,
                copied_rows: 2,
                failed_rows: 0,
                source_rows: 2,
                target_rows: 1,
                status: CopyStatus::Mismatch,
            },
            message: "  ⚠️ WARNING: t mismatch! Source: 2, Target: 1, Copied: 2".into(),
        };
        let entry = event.log_entry().unwrap();
        assert_eq!(entry.level, LogLevel::Warning);
        assert!(entry.message.starts_with("⚠️"));
        assert_eq!(entry.metadata["targetRows"], 1);
    }

    #[test]
    fn test_finished_maps_to_success_or_error() {
        let ok = CloneEvent::Finished {
            result: CloneResult {
                success: true,
                ..CloneResult::default()
            },
            message: "done".into(),
        };
        assert_eq!(ok.log_entry().unwrap().level, LogLevel::Success);

        let failed = CloneEvent::Finished {
            result: CloneResult::default(),
            message: "boom".into(),
        };
        assert_eq!(failed.log_entry().unwrap().level, LogLevel::Error);
    }

    #[test]
    fn test_wire_format() {
        let event = CloneEvent::Progress {
            message: "Connecting to source database...".into(),
        };
        assert_eq!(
            serde_json::to_value(event.to_wire().unwrap()).unwrap(),
            serde_json::json!({"status": "progress", "message": "Connecting to source database..."})
        );
        let state = CloneEvent::StateChanged {
            state: SessionState::CopyingTables,
        };
        assert!(state.to_wire().is_none());
    }
}
