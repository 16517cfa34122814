// ABOUTME: mysql_async driver for the clone engine
// ABOUTME: Opens source/target connections and shares catalog queries between them

pub mod source;
pub mod target;
pub mod value;

use anyhow::{Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder};
use std::time::Duration;

use crate::engine::{Connector, ObjectKind, SourceDatabase, TargetDatabase};
use crate::profile::ConnectionProfile;
use crate::utils::quote_mysql_ident;

pub use source::MysqlSource;
pub use target::MysqlTarget;

/// Connector that opens one dedicated `mysql_async::Conn` per side.
///
/// No pool is used: a session owns exactly two connections and releases
/// both when it ends.
#[derive(Debug, Clone)]
pub struct MysqlConnector {
    connect_timeout: Duration,
}

impl MysqlConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn open(&self, profile: &ConnectionProfile, database: Option<&str>) -> Result<Conn> {
        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(profile.host.clone())
            .tcp_port(profile.port)
            .user(Some(profile.user.clone()))
            .pass(Some(profile.password.clone()))
            .db_name(database.map(str::to_string))
            .prefer_socket(false)
            .init(vec!["SET NAMES utf8mb4"])
            .into();

        tracing::debug!("Connecting to {} database {}", profile.role, profile);

        let conn = tokio::time::timeout(self.connect_timeout, Conn::new(opts))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Timed out after {:?} connecting to {} database {}",
                    self.connect_timeout,
                    profile.role,
                    profile
                )
            })?
            .with_context(|| format!("Failed to connect to {} database {}", profile.role, profile))?;

        Ok(conn)
    }
}

impl Default for MysqlConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Connector for MysqlConnector {
    async fn connect_source(&self, profile: &ConnectionProfile) -> Result<Box<dyn SourceDatabase>> {
        let database = profile.database_name()?.to_string();
        let conn = self.open(profile, Some(&database)).await?;
        Ok(Box::new(MysqlSource::new(conn, database)))
    }

    async fn connect_target(&self, profile: &ConnectionProfile) -> Result<Box<dyn TargetDatabase>> {
        // The target database may not exist yet; it is created by use_database.
        let conn = self.open(profile, None).await?;
        Ok(Box::new(MysqlTarget::new(conn)))
    }
}

/// List objects of one kind in `database`, sorted by name.
pub(crate) async fn list_objects(
    conn: &mut Conn,
    database: &str,
    kind: ObjectKind,
) -> Result<Vec<String>> {
    let names: Vec<String> = match kind {
        ObjectKind::Table => {
            conn.exec::<String, _, _>(
                "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' \
                 ORDER BY TABLE_NAME",
                (database,),
            )
            .await
        }
        ObjectKind::View => {
            conn.exec::<String, _, _>(
                "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.VIEWS \
                 WHERE TABLE_SCHEMA = ? ORDER BY TABLE_NAME",
                (database,),
            )
            .await
        }
        ObjectKind::Procedure | ObjectKind::Function => {
            conn.exec::<String, _, _>(
                "SELECT ROUTINE_NAME FROM INFORMATION_SCHEMA.ROUTINES \
                 WHERE ROUTINE_SCHEMA = ? AND ROUTINE_TYPE = ? \
                 ORDER BY ROUTINE_NAME",
                (database, kind.keyword()),
            )
            .await
        }
    }
    .with_context(|| format!("Failed to list {}s in database '{}'", kind, database))?;

    Ok(names)
}

/// `SELECT COUNT(*)` for one table.
pub(crate) async fn count_rows(conn: &mut Conn, table: &str) -> Result<u64> {
    let query = format!("SELECT COUNT(*) FROM {}", quote_mysql_ident(table));
    let count: Option<u64> = conn
        .query_first(query)
        .await
        .with_context(|| format!("Failed to count rows in table '{}'", table))?;
    Ok(count.unwrap_or(0))
}

/// Release a connection, reporting but not hiding disconnect errors.
pub(crate) async fn disconnect(conn: Conn, label: &str) -> Result<()> {
    conn.disconnect()
        .await
        .with_context(|| format!("Failed to close {} connection cleanly", label))
}
