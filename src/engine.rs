// ABOUTME: Driver-neutral interfaces the clone engine runs against
// ABOUTME: Implemented by the mysql_async driver and by the in-memory test driver

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

use crate::profile::ConnectionProfile;
use crate::row::Row;

/// Kinds of schema objects the engine tears down and recreates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Table,
    View,
    Procedure,
    Function,
}

impl ObjectKind {
    /// SQL keyword used in `DROP <kind>` / `SHOW CREATE <kind>`.
    pub fn keyword(&self) -> &'static str {
        match self {
            ObjectKind::Table => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::Procedure => "PROCEDURE",
            ObjectKind::Function => "FUNCTION",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
            ObjectKind::Procedure => "procedure",
            ObjectKind::Function => "function",
        };
        f.write_str(label)
    }
}

/// A table plus the columns used to make paginated reads deterministic.
///
/// `ordering_columns` is the primary key when one exists, otherwise the first
/// column by ordinal position. It is never assumed to be unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
    pub ordering_columns: Vec<String>,
}

/// Read side of a clone. Every implementation must reject writes once
/// `enforce_read_only` has succeeded.
#[async_trait]
pub trait SourceDatabase: Send {
    /// Put the session in read-only transaction mode and confirm the server
    /// reports it as such.
    async fn enforce_read_only(&mut self) -> Result<()>;

    /// Names of the objects of `kind` in the source database, sorted.
    async fn list_objects(&mut self, kind: ObjectKind) -> Result<Vec<String>>;

    /// The server's `SHOW CREATE` statement for an object.
    async fn show_create(&mut self, kind: ObjectKind, name: &str) -> Result<String>;

    /// Primary-key columns in ordinal order, or the first column if the
    /// table has no primary key.
    async fn ordering_columns(&mut self, table: &str) -> Result<Vec<String>>;

    async fn count_rows(&mut self, table: &str) -> Result<u64>;

    /// Read one window of rows ordered by the descriptor's ordering columns.
    async fn read_batch(
        &mut self,
        table: &TableDescriptor,
        limit: usize,
        offset: u64,
    ) -> Result<Vec<Row>>;

    /// Release the connection. Called exactly once per session.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Write side of a clone.
#[async_trait]
pub trait TargetDatabase: Send {
    /// Create the database if missing and make it the session default.
    async fn use_database(&mut self, name: &str) -> Result<()>;

    /// Session settings needed to reproduce source data exactly.
    async fn prepare_session(&mut self) -> Result<()>;

    async fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<()>;

    async fn list_objects(&mut self, kind: ObjectKind) -> Result<Vec<String>>;

    async fn drop_object(&mut self, kind: ObjectKind, name: &str) -> Result<()>;

    /// Execute a DDL statement verbatim.
    async fn execute(&mut self, statement: &str) -> Result<()>;

    /// Insert all `rows` with a single multi-row INSERT. Rows must share one
    /// column list.
    async fn insert_rows(&mut self, table: &str, rows: &[Row]) -> Result<()>;

    async fn count_rows(&mut self, table: &str) -> Result<u64>;

    /// Release the connection. Called exactly once per session.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens connections for a session.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_source(&self, profile: &ConnectionProfile) -> Result<Box<dyn SourceDatabase>>;

    async fn connect_target(&self, profile: &ConnectionProfile) -> Result<Box<dyn TargetDatabase>>;
}
