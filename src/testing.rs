// ABOUTME: In-memory MySQL stand-in implementing the engine traits
// ABOUTME: Used by unit and integration tests to drive full clone sessions without a server

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::engine::{Connector, ObjectKind, SourceDatabase, TableDescriptor, TargetDatabase};
use crate::profile::ConnectionProfile;
use crate::row::{Row, RowValue};

/// Column of an in-memory table. Text columns may carry a length limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub max_len: Option<usize>,
}

/// Table definition that renders to, and parses from, `SHOW CREATE TABLE`
/// style DDL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    /// Add an integer column.
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(ColumnSpec {
            name: name.into(),
            max_len: None,
        });
        self
    }

    /// Add a `varchar(max_len)` column.
    pub fn text_column(mut self, name: impl Into<String>, max_len: usize) -> Self {
        self.columns.push(ColumnSpec {
            name: name.into(),
            max_len: Some(max_len),
        });
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// DDL as a MySQL 8 server would print it.
    pub fn ddl(&self) -> String {
        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| match c.max_len {
                Some(len) => format!(
                    "  `{}` varchar({}) COLLATE utf8mb4_0900_ai_ci DEFAULT NULL",
                    c.name, len
                ),
                None => format!("  `{}` bigint NOT NULL", c.name),
            })
            .collect();
        if !self.primary_key.is_empty() {
            let key = self
                .primary_key
                .iter()
                .map(|c| format!("`{}`", c))
                .collect::<Vec<_>>()
                .join(",");
            lines.push(format!("  PRIMARY KEY ({})", key));
        }
        format!(
            "CREATE TABLE `{}` (\n{}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci",
            self.name,
            lines.join(",\n")
        )
    }

    /// Parse DDL produced by `ddl`.
    pub fn parse(ddl: &str) -> Result<Self> {
        let mut lines = ddl.lines();
        let header = lines.next().unwrap_or_default();
        let name = backtick_idents(header)
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("You have an error in your SQL syntax near '{}'", header))?;

        let mut spec = TableSpec::new(name);
        for line in lines {
            let line = line.trim().trim_end_matches(',');
            if line.starts_with('`') {
                let column = backtick_idents(line).into_iter().next().unwrap_or_default();
                let max_len = line
                    .split_once("varchar(")
                    .and_then(|(_, rest)| rest.split_once(')'))
                    .and_then(|(len, _)| len.parse::<usize>().ok());
                spec.columns.push(ColumnSpec {
                    name: column,
                    max_len,
                });
            } else if line.starts_with("PRIMARY KEY") {
                spec.primary_key = backtick_idents(line);
            }
        }
        if spec.columns.is_empty() {
            bail!("A table must have at least 1 column");
        }
        Ok(spec)
    }
}

/// Identifiers quoted with backticks, in order of appearance.
fn backtick_idents(s: &str) -> Vec<String> {
    s.split('`')
        .skip(1)
        .step_by(2)
        .map(str::to_string)
        .collect()
}

/// First backtick-quoted identifier after `keyword`.
fn ident_after(statement: &str, keyword: &str) -> Option<String> {
    let (_, rest) = statement.split_once(keyword)?;
    backtick_idents(rest.trim_start()).into_iter().next()
}

#[derive(Debug, Clone)]
struct MemoryTable {
    spec: TableSpec,
    ddl: String,
    rows: Vec<Vec<RowValue>>,
}

#[derive(Debug, Default)]
struct MemoryDatabase {
    tables: BTreeMap<String, MemoryTable>,
    views: BTreeMap<String, String>,
    procedures: BTreeMap<String, String>,
    functions: BTreeMap<String, String>,
}

impl MemoryDatabase {
    fn names(&self, kind: ObjectKind) -> Vec<String> {
        match kind {
            ObjectKind::Table => self.tables.keys().cloned().collect(),
            ObjectKind::View => self.views.keys().cloned().collect(),
            ObjectKind::Procedure => self.procedures.keys().cloned().collect(),
            ObjectKind::Function => self.functions.keys().cloned().collect(),
        }
    }

    fn routines_mut(&mut self, kind: ObjectKind) -> Option<&mut BTreeMap<String, String>> {
        match kind {
            ObjectKind::Table => None,
            ObjectKind::View => Some(&mut self.views),
            ObjectKind::Procedure => Some(&mut self.procedures),
            ObjectKind::Function => Some(&mut self.functions),
        }
    }

    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables
            .get(name)
            .ok_or_else(|| anyhow!("Table '{}' doesn't exist", name))
    }
}

#[derive(Debug, Default)]
struct ServerState {
    databases: HashMap<String, MemoryDatabase>,
    journal: Vec<String>,
    refuse_read_only: bool,
    unreachable: bool,
    discard_inserts: HashSet<String>,
    opened: usize,
    closed: usize,
}

impl ServerState {
    fn database(&self, name: &str) -> Result<&MemoryDatabase> {
        self.databases
            .get(name)
            .ok_or_else(|| anyhow!("Unknown database '{}'", name))
    }

    fn database_mut(&mut self, name: &str) -> Result<&mut MemoryDatabase> {
        self.databases
            .get_mut(name)
            .ok_or_else(|| anyhow!("Unknown database '{}'", name))
    }
}

/// A shared in-memory server. Clones refer to the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_database(&self, database: &str) {
        self.lock().databases.entry(database.to_string()).or_default();
    }

    pub fn add_table(&self, database: &str, spec: TableSpec) {
        let mut state = self.lock();
        let db = state.databases.entry(database.to_string()).or_default();
        db.tables.insert(
            spec.name.clone(),
            MemoryTable {
                ddl: spec.ddl(),
                spec,
                rows: Vec::new(),
            },
        );
    }

    /// Append rows to an existing table, bypassing all checks.
    pub fn load_rows(&self, database: &str, table: &str, rows: Vec<Vec<RowValue>>) {
        let mut state = self.lock();
        if let Some(t) = state
            .databases
            .get_mut(database)
            .and_then(|db| db.tables.get_mut(table))
        {
            t.rows.extend(rows);
        }
    }

    /// Add a view, procedure or function with the given definition.
    pub fn add_object(&self, database: &str, kind: ObjectKind, name: &str, ddl: &str) {
        let mut state = self.lock();
        let db = state.databases.entry(database.to_string()).or_default();
        if let Some(objects) = db.routines_mut(kind) {
            objects.insert(name.to_string(), ddl.to_string());
        }
    }

    pub fn rows(&self, database: &str, table: &str) -> Vec<Vec<RowValue>> {
        self.lock()
            .databases
            .get(database)
            .and_then(|db| db.tables.get(table))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, database: &str, table: &str) -> usize {
        self.rows(database, table).len()
    }

    pub fn object_names(&self, database: &str, kind: ObjectKind) -> Vec<String> {
        self.lock()
            .databases
            .get(database)
            .map(|db| db.names(kind))
            .unwrap_or_default()
    }

    /// Total number of tables, views and routines in `database`.
    pub fn object_count(&self, database: &str) -> usize {
        [
            ObjectKind::Table,
            ObjectKind::View,
            ObjectKind::Procedure,
            ObjectKind::Function,
        ]
        .into_iter()
        .map(|kind| self.object_names(database, kind).len())
        .sum()
    }

    /// Stored definition of any object.
    pub fn definition(&self, database: &str, kind: ObjectKind, name: &str) -> Option<String> {
        let state = self.lock();
        let db = state.databases.get(database)?;
        match kind {
            ObjectKind::Table => db.tables.get(name).map(|t| t.ddl.clone()),
            ObjectKind::View => db.views.get(name).cloned(),
            ObjectKind::Procedure => db.procedures.get(name).cloned(),
            ObjectKind::Function => db.functions.get(name).cloned(),
        }
    }

    /// Every operation performed against this server, in order.
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    /// Make `SET SESSION TRANSACTION READ ONLY` fail.
    pub fn refuse_read_only(&self, refuse: bool) {
        self.lock().refuse_read_only = refuse;
    }

    /// Make new connections fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Accept inserts into `table` without storing them.
    pub fn discard_inserts(&self, table: &str) {
        self.lock().discard_inserts.insert(table.to_string());
    }

    pub fn open_connections(&self) -> usize {
        let state = self.lock();
        state.opened - state.closed
    }

    pub fn closed_connections(&self) -> usize {
        self.lock().closed
    }

    fn connect(&self, label: &str) -> Result<()> {
        let mut state = self.lock();
        if state.unreachable {
            bail!("Can't connect to MySQL server (connection refused)");
        }
        state.opened += 1;
        state.journal.push(format!("{}: connect", label));
        Ok(())
    }

    fn close(&self, label: &str) {
        let mut state = self.lock();
        state.closed += 1;
        state.journal.push(format!("{}: close", label));
    }
}

/// Connector handing out sessions against two in-memory servers.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    source: MemoryServer,
    target: MemoryServer,
}

impl MemoryConnector {
    pub fn new(source: MemoryServer, target: MemoryServer) -> Self {
        Self { source, target }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect_source(&self, profile: &ConnectionProfile) -> Result<Box<dyn SourceDatabase>> {
        let database = profile.database_name()?.to_string();
        self.source.connect("source")?;
        self.source
            .lock()
            .database(&database)
            .with_context(|| format!("Failed to connect to source database {}", profile))?;
        Ok(Box::new(MemorySource {
            server: self.source.clone(),
            database,
        }))
    }

    async fn connect_target(&self, _profile: &ConnectionProfile) -> Result<Box<dyn TargetDatabase>> {
        self.target.connect("target")?;
        Ok(Box::new(MemoryTarget {
            server: self.target.clone(),
            database: None,
        }))
    }
}

struct MemorySource {
    server: MemoryServer,
    database: String,
}

#[async_trait]
impl SourceDatabase for MemorySource {
    async fn enforce_read_only(&mut self) -> Result<()> {
        let mut state = self.server.lock();
        if state.refuse_read_only {
            bail!("Access denied; you need the SYSTEM_VARIABLES_ADMIN privilege for this operation");
        }
        state.journal.push("source: read only".to_string());
        Ok(())
    }

    async fn list_objects(&mut self, kind: ObjectKind) -> Result<Vec<String>> {
        Ok(self.server.lock().database(&self.database)?.names(kind))
    }

    async fn show_create(&mut self, kind: ObjectKind, name: &str) -> Result<String> {
        self.server
            .definition(&self.database, kind, name)
            .ok_or_else(|| anyhow!("{} '{}' doesn't exist", kind, name))
    }

    async fn ordering_columns(&mut self, table: &str) -> Result<Vec<String>> {
        let state = self.server.lock();
        let spec = &state.database(&self.database)?.table(table)?.spec;
        if !spec.primary_key.is_empty() {
            return Ok(spec.primary_key.clone());
        }
        Ok(spec.columns.iter().take(1).map(|c| c.name.clone()).collect())
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64> {
        let state = self.server.lock();
        Ok(state.database(&self.database)?.table(table)?.rows.len() as u64)
    }

    async fn read_batch(
        &mut self,
        table: &TableDescriptor,
        limit: usize,
        offset: u64,
    ) -> Result<Vec<Row>> {
        let mut state = self.server.lock();
        state.journal.push(format!(
            "source: read {} offset={} limit={}",
            table.name, offset, limit
        ));
        let stored = state.database(&self.database)?.table(&table.name)?;

        let columns: Vec<String> = stored.spec.columns.iter().map(|c| c.name.clone()).collect();
        let order: Vec<usize> = table
            .ordering_columns
            .iter()
            .filter_map(|name| columns.iter().position(|c| c == name))
            .collect();

        let mut rows = stored.rows.clone();
        rows.sort_by(|a, b| {
            order
                .iter()
                .map(|&i| compare_values(&a[i], &b[i]))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });

        let columns = Arc::new(columns);
        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit)
            .map(|values| Row::new(Arc::clone(&columns), values))
            .collect())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.server.close("source");
        Ok(())
    }
}

struct MemoryTarget {
    server: MemoryServer,
    database: Option<String>,
}

impl MemoryTarget {
    fn database(&self) -> Result<&str> {
        self.database
            .as_deref()
            .ok_or_else(|| anyhow!("No database selected"))
    }

    fn create_table(&self, statement: &str) -> Result<String> {
        if let Some(collation) = statement
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .find(|token| token.contains("_0900_"))
        {
            bail!("Unknown collation: '{}'", collation);
        }
        let spec = TableSpec::parse(statement)?;
        let name = spec.name.clone();

        let database = self.database()?.to_string();
        let mut state = self.server.lock();
        let db = state.database_mut(&database)?;
        if db.tables.contains_key(&name) {
            bail!("Table '{}' already exists", name);
        }
        db.tables.insert(
            name.clone(),
            MemoryTable {
                spec,
                ddl: statement.to_string(),
                rows: Vec::new(),
            },
        );
        Ok(name)
    }

    fn create_routine(&self, kind: ObjectKind, statement: &str) -> Result<String> {
        if statement.contains("DEFINER=`") {
            bail!("Access denied; you need (at least one of) the SUPER or SET_USER_ID privilege(s) for this operation");
        }
        let name = ident_after(statement, &format!(" {} ", kind.keyword()))
            .ok_or_else(|| anyhow!("You have an error in your SQL syntax"))?;

        let database = self.database()?.to_string();
        let mut state = self.server.lock();
        let db = state.database_mut(&database)?;

        if kind == ObjectKind::View {
            if let Some(referenced) = ident_after(&statement.to_ascii_lowercase(), " from ") {
                let known = db.tables.contains_key(&referenced) || db.views.contains_key(&referenced);
                if !known {
                    bail!("Table '{}.{}' doesn't exist", database, referenced);
                }
            }
        }

        let objects = db
            .routines_mut(kind)
            .ok_or_else(|| anyhow!("Unsupported object kind"))?;
        if objects.contains_key(&name) {
            bail!("{} '{}' already exists", kind.keyword(), name);
        }
        objects.insert(name.clone(), statement.to_string());
        Ok(name)
    }
}

#[async_trait]
impl TargetDatabase for MemoryTarget {
    async fn use_database(&mut self, name: &str) -> Result<()> {
        self.server.create_database(name);
        self.server
            .lock()
            .journal
            .push(format!("target: use {}", name));
        self.database = Some(name.to_string());
        Ok(())
    }

    async fn prepare_session(&mut self) -> Result<()> {
        self.server
            .lock()
            .journal
            .push("target: sql_mode".to_string());
        Ok(())
    }

    async fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<()> {
        self.server
            .lock()
            .journal
            .push(format!("target: foreign_key_checks={}", u8::from(enabled)));
        Ok(())
    }

    async fn list_objects(&mut self, kind: ObjectKind) -> Result<Vec<String>> {
        let database = self.database()?.to_string();
        Ok(self.server.object_names(&database, kind))
    }

    async fn drop_object(&mut self, kind: ObjectKind, name: &str) -> Result<()> {
        let database = self.database()?.to_string();
        let mut state = self.server.lock();
        let db = state.database_mut(&database)?;
        match kind {
            ObjectKind::Table => {
                db.tables.remove(name);
            }
            _ => {
                if let Some(objects) = db.routines_mut(kind) {
                    objects.remove(name);
                }
            }
        }
        state.journal.push(format!("target: drop {} {}", kind, name));
        Ok(())
    }

    async fn execute(&mut self, statement: &str) -> Result<()> {
        let head = statement.trim_start().to_ascii_uppercase();
        let (kind, name) = if head.starts_with("CREATE TABLE") {
            (ObjectKind::Table, self.create_table(statement)?)
        } else {
            let kind = [ObjectKind::View, ObjectKind::Procedure, ObjectKind::Function]
                .into_iter()
                .find(|kind| head.contains(&format!(" {} ", kind.keyword())))
                .ok_or_else(|| anyhow!("Unsupported statement"))?;
            (kind, self.create_routine(kind, statement)?)
        };
        self.server
            .lock()
            .journal
            .push(format!("target: create {} {}", kind, name));
        Ok(())
    }

    async fn insert_rows(&mut self, table: &str, rows: &[Row]) -> Result<()> {
        let database = self.database()?.to_string();
        let mut state = self.server.lock();
        let discard = state.discard_inserts.contains(table);
        let db = state.database_mut(&database)?;
        let stored = db
            .tables
            .get_mut(table)
            .ok_or_else(|| anyhow!("Table '{}' doesn't exist", table))?;

        for (index, row) in rows.iter().enumerate() {
            for (column, value) in row.iter() {
                let spec = stored
                    .spec
                    .columns
                    .iter()
                    .find(|c| c.name == column)
                    .ok_or_else(|| anyhow!("Unknown column '{}' in 'field list'", column))?;
                if let Some(max) = spec.max_len {
                    if value.display_len() > max {
                        bail!(
                            "Data too long for column '{}' at row {}",
                            column,
                            index + 1
                        );
                    }
                }
            }
        }

        if !discard {
            stored
                .rows
                .extend(rows.iter().map(|row| row.values().to_vec()));
        }
        state
            .journal
            .push(format!("target: insert {} rows={}", table, rows.len()));
        Ok(())
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64> {
        let database = self.database()?.to_string();
        let state = self.server.lock();
        Ok(state.database(&database)?.table(table)?.rows.len() as u64)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.server.close("target");
        Ok(())
    }
}

/// Total order over values of the same kind; mixed kinds compare by tag.
fn compare_values(a: &RowValue, b: &RowValue) -> Ordering {
    match (a, b) {
        (RowValue::Int(x), RowValue::Int(y)) => x.cmp(y),
        (RowValue::UInt(x), RowValue::UInt(y)) => x.cmp(y),
        (RowValue::Double(x), RowValue::Double(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (RowValue::Text(x), RowValue::Text(y)) => x.cmp(y),
        (RowValue::Bytes(x), RowValue::Bytes(y)) => x.cmp(y),
        (RowValue::DateTime(x), RowValue::DateTime(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn rank(value: &RowValue) -> u8 {
    match value {
        RowValue::Null => 0,
        RowValue::Int(_) | RowValue::UInt(_) => 1,
        RowValue::Float(_) | RowValue::Double(_) => 2,
        RowValue::DateTime(_) | RowValue::Time(_) => 3,
        RowValue::Text(_) | RowValue::Json(_) => 4,
        RowValue::Bytes(_) => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_spec_round_trips_through_ddl() {
        let spec = TableSpec::new("orders")
            .column("customer_id")
            .column("order_id")
            .text_column("note", 10)
            .primary_key(&["customer_id", "order_id"]);
        let parsed = TableSpec::parse(&spec.ddl()).unwrap();
        assert_eq!(parsed, spec);
    }

    #[tokio::test]
    async fn test_target_rejects_unknown_collation_and_definer() {
        let server = MemoryServer::new();
        let connector = MemoryConnector::new(server.clone(), server.clone());
        let profile = ConnectionProfile::from_url(
            "mysql://root@localhost/copy",
            crate::profile::Role::Target,
        )
        .unwrap();
        let mut target = connector.connect_target(&profile).await.unwrap();
        target.use_database("copy").await.unwrap();

        let ddl = TableSpec::new("t").column("id").ddl();
        let err = target.execute(&ddl).await.unwrap_err();
        assert!(err.to_string().contains("Unknown collation"));

        let view = "CREATE DEFINER=`root`@`%` VIEW `v` AS select 1";
        assert!(target.execute(view).await.is_err());
        assert!(target.execute("CREATE VIEW `v` AS select 1").await.is_ok());
        assert_eq!(server.object_names("copy", ObjectKind::View), vec!["v"]);
    }
}
