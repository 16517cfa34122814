// ABOUTME: Recreates the source's base tables on the target
// ABOUTME: Target teardown in dependency order plus collation normalization of DDL

use anyhow::{Context, Result};

use super::events::EventEmitter;
use crate::engine::{ObjectKind, SourceDatabase, TargetDatabase};

/// Teardown order: views first since they reference tables and routines.
const TEARDOWN_ORDER: [ObjectKind; 4] = [
    ObjectKind::View,
    ObjectKind::Table,
    ObjectKind::Procedure,
    ObjectKind::Function,
];

/// What `clean_target` removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub views: usize,
    pub tables: usize,
    pub procedures: usize,
    pub functions: usize,
}

pub struct SchemaReplicator<'a> {
    events: &'a EventEmitter,
}

impl<'a> SchemaReplicator<'a> {
    pub fn new(events: &'a EventEmitter) -> Self {
        Self { events }
    }

    /// Create and select the target database, set up the session and turn
    /// off foreign-key checks until all data is loaded.
    pub async fn prepare_target(
        &self,
        target: &mut dyn TargetDatabase,
        database: &str,
    ) -> Result<()> {
        self.events
            .progress(format!("Creating target database: {}", database));
        target.use_database(database).await?;
        target.prepare_session().await?;
        target.set_foreign_key_checks(false).await?;
        Ok(())
    }

    /// Drop every view, table, procedure and function on the target.
    pub async fn clean_target(&self, target: &mut dyn TargetDatabase) -> Result<CleanupSummary> {
        self.events
            .progress("Cleaning target database (dropping all existing objects)...");

        let mut summary = CleanupSummary::default();
        for kind in TEARDOWN_ORDER {
            let names = target.list_objects(kind).await?;
            for name in &names {
                target.drop_object(kind, name).await?;
            }
            match kind {
                ObjectKind::View => summary.views = names.len(),
                ObjectKind::Table => summary.tables = names.len(),
                ObjectKind::Procedure => summary.procedures = names.len(),
                ObjectKind::Function => summary.functions = names.len(),
            }
        }

        self.events.progress(format!(
            "Cleaned target database: removed {} tables, {} views",
            summary.tables, summary.views
        ));
        Ok(summary)
    }

    /// Copy one table definition from source to target.
    pub async fn create_table(
        &self,
        source: &mut dyn SourceDatabase,
        target: &mut dyn TargetDatabase,
        table: &str,
    ) -> Result<()> {
        let ddl = source.show_create(ObjectKind::Table, table).await?;
        let normalized = normalize_collations(&ddl);
        if normalized != ddl {
            tracing::debug!("Rewrote collations in definition of '{}'", table);
        }
        target
            .execute(&normalized)
            .await
            .with_context(|| format!("Failed to create table '{}' on target", table))
    }
}

/// Rewrite collations that older MySQL and MariaDB servers do not know.
///
/// The MySQL 8 `*_0900_*` and MariaDB 11 `*_uca1400_*` families map to
/// `<charset>_bin` when accent- or case-sensitive, `<charset>_unicode_ci`
/// otherwise. Quoted strings and identifiers are copied unchanged.
pub fn normalize_collations(ddl: &str) -> String {
    let mut out = String::with_capacity(ddl.len());
    let mut rest = ddl;

    while let Some(start) = rest.find(|c: char| matches!(c, '\'' | '"' | '`')) {
        out.push_str(&rewrite_unquoted(&rest[..start]));
        let len = quoted_len(&rest[start..]);
        out.push_str(&rest[start..start + len]);
        rest = &rest[start + len..];
    }
    out.push_str(&rewrite_unquoted(rest));
    out
}

/// Byte length of the quoted span opening `s`, closing quote included.
/// Doubled quotes and backslash escapes stay inside; an unterminated span
/// runs to the end.
fn quoted_len(s: &str) -> usize {
    let mut chars = s.char_indices().peekable();
    let Some((_, quote)) = chars.next() else {
        return 0;
    };
    while let Some((idx, c)) = chars.next() {
        if c == '\\' && quote != '`' {
            chars.next();
        } else if c == quote {
            if chars.peek().is_some_and(|&(_, next)| next == quote) {
                chars.next();
            } else {
                return idx + c.len_utf8();
            }
        }
    }
    s.len()
}

fn rewrite_unquoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = find_collation_start(rest) {
        out.push_str(&rest[..start]);
        let token_len = rest[start..]
            .find(|c: char| !is_ident_char(c))
            .unwrap_or(rest.len() - start);
        let token = &rest[start..start + token_len];
        out.push_str(&replacement_for(token).unwrap_or_else(|| token.to_string()));
        rest = &rest[start + token_len..];
    }
    out.push_str(rest);
    out
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Byte offset of the next token starting with a utf8 charset prefix.
fn find_collation_start(haystack: &str) -> Option<usize> {
    let mut search_from = 0;
    while let Some(pos) = haystack[search_from..].find("utf8") {
        let idx = search_from + pos;
        let at_boundary = haystack[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !is_ident_char(c));
        if at_boundary {
            return Some(idx);
        }
        search_from = idx + "utf8".len();
    }
    None
}

fn replacement_for(token: &str) -> Option<String> {
    let lower = token.to_ascii_lowercase();
    let (charset, suffix) = lower.split_once('_')?;
    if !matches!(charset, "utf8mb4" | "utf8mb3" | "utf8") {
        return None;
    }
    if !(suffix.contains("0900") || suffix.contains("uca1400")) {
        return None;
    }
    let sensitive = suffix.ends_with("_bin") || suffix.ends_with("_cs");
    if sensitive {
        Some(format!("{}_bin", charset))
    } else {
        Some(format!("{}_unicode_ci", charset))
    }
}
