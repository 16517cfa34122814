// ABOUTME: Copies one table's rows from source to target in ordered windows
// ABOUTME: Multi-row insert per window with row-by-row fallback and count verification

use anyhow::Result;
use serde::Serialize;
use std::slice;

use super::events::{CloneEvent, EventEmitter};
use crate::engine::{SourceDatabase, TableDescriptor, TargetDatabase};
use crate::row::Row;
use crate::utils::truncate_message;

/// Rows read from the source per window.
pub const BATCH_SIZE: usize = 500;

/// MySQL's prepared statement placeholder limit.
const MAX_PLACEHOLDERS: usize = 65_535;

/// Progress is reported each time this many rows have been processed.
const PROGRESS_INTERVAL: u64 = 1000;

const BATCH_ERROR_CHARS: usize = 150;
const ROW_ERROR_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CopyStatus {
    Ok,
    Mismatch,
}

/// Outcome of copying one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCopyResult {
    pub table_name: String,
    pub expected_rows: u64,
    pub copied_rows: u64,
    pub failed_rows: u64,
    pub source_rows: u64,
    pub target_rows: u64,
    pub status: CopyStatus,
}

pub struct BatchRowCopier<'a> {
    events: &'a EventEmitter,
}

impl<'a> BatchRowCopier<'a> {
    pub fn new(events: &'a EventEmitter) -> Self {
        Self { events }
    }

    /// Copy every row of `table`. Insert failures are recovered row by row
    /// and counted; read and count failures are returned as errors.
    pub async fn copy_table(
        &self,
        source: &mut dyn SourceDatabase,
        target: &mut dyn TargetDatabase,
        table: &str,
    ) -> Result<BatchCopyResult> {
        let descriptor = TableDescriptor {
            name: table.to_string(),
            ordering_columns: source.ordering_columns(table).await?,
        };
        tracing::debug!(
            "Ordering '{}' by ({})",
            table,
            descriptor.ordering_columns.join(", ")
        );

        let expected_rows = source.count_rows(table).await?;
        self.events
            .progress(format!("  {}: {} rows to copy", table, expected_rows));

        let mut offset: u64 = 0;
        let mut copied_rows: u64 = 0;
        let mut failed_rows: u64 = 0;

        loop {
            if offset > 0 && offset >= expected_rows {
                break;
            }

            let rows = source.read_batch(&descriptor, BATCH_SIZE, offset).await?;
            if rows.is_empty() {
                break;
            }

            let (copied, failed) = self.insert_window(target, table, &rows, offset).await;
            copied_rows += copied;
            failed_rows += failed;
            offset += rows.len() as u64;

            if offset % PROGRESS_INTERVAL == 0 || offset == expected_rows {
                self.events.progress(format!(
                    "  {}: {}/{} rows processed...",
                    table, offset, expected_rows
                ));
            }

            if rows.len() < BATCH_SIZE {
                break;
            }
        }

        if failed_rows > 0 {
            self.events
                .warning(format!("  ⚠️ {}: {} rows failed to copy!", table, failed_rows));
        }

        let source_rows = source.count_rows(table).await?;
        let target_rows = target.count_rows(table).await?;
        let status = if source_rows == target_rows {
            CopyStatus::Ok
        } else {
            CopyStatus::Mismatch
        };

        let result = BatchCopyResult {
            table_name: table.to_string(),
            expected_rows,
            copied_rows,
            failed_rows,
            source_rows,
            target_rows,
            status,
        };
        let message = match status {
            CopyStatus::Ok => format!("  ✓ {}: {} rows copied successfully", table, target_rows),
            CopyStatus::Mismatch => format!(
                "  ⚠️ WARNING: {} mismatch! Source: {}, Target: {}, Copied: {}",
                table, source_rows, target_rows, copied_rows
            ),
        };
        self.events.emit(CloneEvent::TableCopied {
            result: result.clone(),
            message,
        });

        Ok(result)
    }

    /// Insert one window. Returns `(copied, failed)`.
    async fn insert_window(
        &self,
        target: &mut dyn TargetDatabase,
        table: &str,
        rows: &[Row],
        offset: u64,
    ) -> (u64, u64) {
        let columns = rows.first().map_or(1, |r| r.len().max(1));
        let rows_per_insert = (MAX_PLACEHOLDERS / columns).max(1);

        let mut copied = 0;
        let mut failed = 0;
        for (chunk_index, chunk) in rows.chunks(rows_per_insert).enumerate() {
            let err = match target.insert_rows(table, chunk).await {
                Ok(()) => {
                    copied += chunk.len() as u64;
                    continue;
                }
                Err(err) => err,
            };

            self.events.progress(format!(
                "  {}: Batch insert failed, trying row by row...",
                table
            ));
            self.events.progress(format!(
                "  Error: {}",
                truncate_message(&format!("{:#}", err), BATCH_ERROR_CHARS)
            ));

            let chunk_start = offset + (chunk_index * rows_per_insert) as u64;
            for (i, row) in chunk.iter().enumerate() {
                match target.insert_rows(table, slice::from_ref(row)).await {
                    Ok(()) => copied += 1,
                    Err(err) => {
                        failed += 1;
                        self.events.warning(format!(
                            "  ⚠️ Row {} failed: {}",
                            chunk_start + i as u64 + 1,
                            truncate_message(&format!("{:#}", err), ROW_ERROR_CHARS)
                        ));
                    }
                }
            }
        }
        (copied, failed)
    }
}
