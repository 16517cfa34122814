// ABOUTME: Write side of a MySQL clone
// ABOUTME: Creates the target database, runs DDL and multi-row inserts

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Value};

use super::value::to_mysql;
use crate::engine::{ObjectKind, TargetDatabase};
use crate::row::Row;
use crate::utils::quote_mysql_ident;

/// Character set and collation for databases created on the target.
pub const DEFAULT_CHARSET: &str = "utf8mb4";
pub const DEFAULT_COLLATION: &str = "utf8mb4_unicode_ci";

/// Target connection. Opened without a default database; `use_database`
/// binds it.
pub struct MysqlTarget {
    conn: Conn,
    database: Option<String>,
}

impl MysqlTarget {
    pub fn new(conn: Conn) -> Self {
        Self {
            conn,
            database: None,
        }
    }

    fn database(&self) -> Result<&str> {
        match self.database.as_deref() {
            Some(db) => Ok(db),
            None => bail!("Target database has not been selected"),
        }
    }
}

/// Build `INSERT INTO t (c1, ..) VALUES (?, ..), (?, ..)` for `rows`, using
/// the column list of the first row.
pub fn build_insert(table: &str, rows: &[Row]) -> Result<(String, Vec<Value>)> {
    let Some(first) = rows.first() else {
        bail!("No rows to insert into '{}'", table);
    };
    let columns = first.columns();
    if columns.is_empty() {
        bail!("Rows for '{}' have no columns", table);
    }

    let column_list = columns
        .iter()
        .map(|c| quote_mysql_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let tuple = format!("({})", vec!["?"; columns.len()].join(", "));
    let values_clause = vec![tuple.as_str(); rows.len()].join(", ");

    let mut params = Vec::with_capacity(rows.len() * columns.len());
    for row in rows {
        if row.columns() != columns {
            bail!("Rows for '{}' do not share one column list", table);
        }
        params.extend(row.values().iter().map(to_mysql));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_mysql_ident(table),
        column_list,
        values_clause
    );
    Ok((sql, params))
}

#[async_trait]
impl TargetDatabase for MysqlTarget {
    async fn use_database(&mut self, name: &str) -> Result<()> {
        let create = format!(
            "CREATE DATABASE IF NOT EXISTS {} CHARACTER SET {} COLLATE {}",
            quote_mysql_ident(name),
            DEFAULT_CHARSET,
            DEFAULT_COLLATION
        );
        self.conn
            .query_drop(create)
            .await
            .with_context(|| format!("Failed to create target database '{}'", name))?;
        self.conn
            .query_drop(format!("USE {}", quote_mysql_ident(name)))
            .await
            .with_context(|| format!("Failed to select target database '{}'", name))?;

        self.database = Some(name.to_string());
        Ok(())
    }

    async fn prepare_session(&mut self) -> Result<()> {
        // Permissive mode so zero dates and truncated legacy values load as-is
        self.conn
            .query_drop("SET SESSION sql_mode = 'NO_ENGINE_SUBSTITUTION'")
            .await
            .context("Failed to set target sql_mode")
    }

    async fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<()> {
        let value = if enabled { 1 } else { 0 };
        self.conn
            .query_drop(format!("SET FOREIGN_KEY_CHECKS = {}", value))
            .await
            .with_context(|| format!("Failed to set FOREIGN_KEY_CHECKS = {}", value))
    }

    async fn list_objects(&mut self, kind: ObjectKind) -> Result<Vec<String>> {
        let database = self.database()?.to_string();
        super::list_objects(&mut self.conn, &database, kind).await
    }

    async fn drop_object(&mut self, kind: ObjectKind, name: &str) -> Result<()> {
        let statement = format!("DROP {} IF EXISTS {}", kind.keyword(), quote_mysql_ident(name));
        self.conn
            .query_drop(statement)
            .await
            .with_context(|| format!("Failed to drop {} '{}'", kind, name))
    }

    async fn execute(&mut self, statement: &str) -> Result<()> {
        self.conn
            .query_drop(statement)
            .await
            .map_err(anyhow::Error::from)
    }

    async fn insert_rows(&mut self, table: &str, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let (sql, params) = build_insert(table, rows)?;
        self.conn
            .exec_drop(sql, params)
            .await
            .map_err(anyhow::Error::from)
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64> {
        super::count_rows(&mut self.conn, table).await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        super::disconnect(self.conn, "target").await
    }
}
