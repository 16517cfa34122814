// ABOUTME: Migrates views, stored procedures and stored functions
// ABOUTME: Strips DEFINER clauses so objects are recreated under the target user

use anyhow::Result;

use super::events::EventEmitter;
use crate::engine::{ObjectKind, SourceDatabase, TargetDatabase};
use crate::utils::quote_mysql_ident;

/// Migration order: views depend only on tables, routines may use views.
const ROUTINE_ORDER: [ObjectKind; 3] = [ObjectKind::View, ObjectKind::Procedure, ObjectKind::Function];

/// Objects recreated successfully, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutineCounts {
    pub views: usize,
    pub procedures: usize,
    pub functions: usize,
}

pub struct RoutineReplicator<'a> {
    events: &'a EventEmitter,
    source_database: &'a str,
}

impl<'a> RoutineReplicator<'a> {
    pub fn new(events: &'a EventEmitter, source_database: &'a str) -> Self {
        Self {
            events,
            source_database,
        }
    }

    /// Recreate every view, procedure and function. A failing object is
    /// reported as a warning; listing failures end the run.
    pub async fn replicate(
        &self,
        source: &mut dyn SourceDatabase,
        target: &mut dyn TargetDatabase,
    ) -> Result<RoutineCounts> {
        let mut counts = RoutineCounts::default();

        for kind in ROUTINE_ORDER {
            self.events.progress(match kind {
                ObjectKind::View => "Cloning views...",
                ObjectKind::Procedure => "Cloning stored procedures...",
                _ => "Cloning stored functions...",
            });

            let names = source.list_objects(kind).await?;
            let mut created = 0;
            for name in &names {
                match self.replicate_one(source, target, kind, name).await {
                    Ok(()) => created += 1,
                    Err(err) => self.events.warning(format!(
                        "  Warning: Could not clone {} {}: {:#}",
                        kind, name, err
                    )),
                }
            }

            match kind {
                ObjectKind::View => counts.views = created,
                ObjectKind::Procedure => counts.procedures = created,
                ObjectKind::Function => counts.functions = created,
                ObjectKind::Table => {}
            }
        }

        Ok(counts)
    }

    async fn replicate_one(
        &self,
        source: &mut dyn SourceDatabase,
        target: &mut dyn TargetDatabase,
        kind: ObjectKind,
        name: &str,
    ) -> Result<()> {
        let ddl = source.show_create(kind, name).await?;
        target.drop_object(kind, name).await?;

        let mut cleaned = strip_definer(&ddl);
        if kind == ObjectKind::View {
            cleaned = unqualify_schema(&cleaned, self.source_database);
        }
        target.execute(&cleaned).await
    }
}

/// Remove every ``DEFINER=`user`@`host` `` clause (and the whitespace after
/// it), matching the keyword case-insensitively.
pub fn strip_definer(ddl: &str) -> String {
    let mut out = String::with_capacity(ddl.len());
    let mut rest = ddl;

    while let Some(pos) = find_ascii_case_insensitive(rest, "DEFINER=") {
        match definer_clause_len(&rest[pos..]) {
            Some(len) => {
                out.push_str(&rest[..pos]);
                rest = rest[pos + len..].trim_start();
            }
            None => {
                // `SQL SECURITY DEFINER` and friends: keep and move on
                let keep = pos + "DEFINER=".len();
                out.push_str(&rest[..keep]);
                rest = &rest[keep..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Length of ``DEFINER=`a`@`b` `` at the start of `s`, if it is one.
fn definer_clause_len(s: &str) -> Option<usize> {
    let mut idx = "DEFINER=".len();
    idx += quoted_len(&s[idx..])?;
    if !s[idx..].starts_with('@') {
        return None;
    }
    idx += 1;
    idx += quoted_len(&s[idx..])?;
    Some(idx)
}

/// Length of a non-empty backtick-quoted identifier at the start of `s`.
fn quoted_len(s: &str) -> Option<usize> {
    let inner = s.strip_prefix('`')?;
    let end = inner.find('`')?;
    if end == 0 {
        return None;
    }
    Some(end + 2)
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

/// Drop `` `source_db`. `` qualifiers so a view resolves against the target
/// database it is created in.
pub fn unqualify_schema(ddl: &str, database: &str) -> String {
    let qualifier = format!("{}.", quote_mysql_ident(database));
    ddl.replace(&qualifier, "")
}
