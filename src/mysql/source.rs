// ABOUTME: Read-only source side of a MySQL clone
// ABOUTME: Enforces and verifies read-only mode, reads DDL and ordered row windows

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::Conn;
use std::sync::Arc;

use super::value::{column_names, row_from_mysql};
use crate::engine::{ObjectKind, SourceDatabase, TableDescriptor};
use crate::row::Row;
use crate::utils::quote_mysql_ident;

/// Source connection bound to a single database.
pub struct MysqlSource {
    conn: Conn,
    database: String,
}

impl MysqlSource {
    pub fn new(conn: Conn, database: String) -> Self {
        Self { conn, database }
    }

    /// Read the session read-only flag. MySQL 8 and MariaDB 10.3+ expose
    /// `transaction_read_only`; older servers only `tx_read_only`.
    async fn session_read_only(&mut self) -> Result<bool> {
        let flag: Option<i64> = match self
            .conn
            .query_first::<i64, _>("SELECT @@SESSION.transaction_read_only")
            .await
        {
            Ok(flag) => flag,
            Err(_) => self
                .conn
                .query_first::<i64, _>("SELECT @@SESSION.tx_read_only")
                .await
                .context("Failed to read session read-only flag")?,
        };
        Ok(flag.unwrap_or(0) == 1)
    }
}

#[async_trait]
impl SourceDatabase for MysqlSource {
    async fn enforce_read_only(&mut self) -> Result<()> {
        self.conn
            .query_drop("SET SESSION TRANSACTION READ ONLY")
            .await
            .context("Failed to put source session in read-only mode")?;

        if !self.session_read_only().await? {
            bail!("Source session did not report read-only mode after enforcement");
        }

        tracing::info!("Source session for '{}' is read-only", self.database);
        Ok(())
    }

    async fn list_objects(&mut self, kind: ObjectKind) -> Result<Vec<String>> {
        super::list_objects(&mut self.conn, &self.database, kind).await
    }

    async fn show_create(&mut self, kind: ObjectKind, name: &str) -> Result<String> {
        let query = format!("SHOW CREATE {} {}", kind.keyword(), quote_mysql_ident(name));
        let row: mysql_async::Row = self
            .conn
            .query_first::<mysql_async::Row, _>(query)
            .await
            .with_context(|| format!("Failed to read definition of {} '{}'", kind, name))?
            .ok_or_else(|| anyhow::anyhow!("{} '{}' not found on source", kind, name))?;

        // Column is "Create Table", "Create View", "Create Procedure", ...
        let column = match kind {
            ObjectKind::Table => "Create Table",
            ObjectKind::View => "Create View",
            ObjectKind::Procedure => "Create Procedure",
            ObjectKind::Function => "Create Function",
        };

        match row.get::<Option<String>, _>(column) {
            Some(Some(ddl)) => Ok(ddl),
            // NULL body means the user lacks privileges to see the routine
            Some(None) => bail!(
                "Definition of {} '{}' is not visible to the source user",
                kind,
                name
            ),
            None => bail!("SHOW CREATE {} returned no '{}' column", kind.keyword(), column),
        }
    }

    async fn ordering_columns(&mut self, table: &str) -> Result<Vec<String>> {
        let primary_key: Vec<String> = self
            .conn
            .exec::<String, _, _>(
                "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
                 ORDER BY ORDINAL_POSITION",
                (&self.database, table),
            )
            .await
            .with_context(|| format!("Failed to read primary key of '{}'", table))?;

        if !primary_key.is_empty() {
            return Ok(primary_key);
        }

        let first: Option<String> = self
            .conn
            .exec_first(
                "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                 ORDER BY ORDINAL_POSITION LIMIT 1",
                (&self.database, table),
            )
            .await
            .with_context(|| format!("Failed to read columns of '{}'", table))?;

        match first {
            Some(column) => Ok(vec![column]),
            None => bail!("Table '{}' has no columns", table),
        }
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64> {
        super::count_rows(&mut self.conn, table).await
    }

    async fn read_batch(
        &mut self,
        table: &TableDescriptor,
        limit: usize,
        offset: u64,
    ) -> Result<Vec<Row>> {
        let order_by = table
            .ordering_columns
            .iter()
            .map(|c| quote_mysql_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "SELECT * FROM {} ORDER BY {} LIMIT ? OFFSET ?",
            quote_mysql_ident(&table.name),
            order_by
        );

        let rows: Vec<mysql_async::Row> = self
            .conn
            .exec::<mysql_async::Row, _, _>(query, (limit as u64, offset))
            .await
            .with_context(|| {
                format!(
                    "Failed to read rows {}..{} of '{}'",
                    offset,
                    offset + limit as u64,
                    table.name
                )
            })?;

        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let columns = Arc::new(column_names(first));

        Ok(rows
            .into_iter()
            .map(|row| row_from_mysql(row, Arc::clone(&columns)))
            .collect())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        super::disconnect(self.conn, "source").await
    }
}
