use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, warn};

use crate::commit::{commit_with_retry, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    pub actor: String,
    pub record_id: String,
    pub timestamp: String,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub record_id: String,
    pub detail: String,
}

impl AuditEvent {
    pub fn new(action: AuditAction, record_id: &str, detail: impl Into<String>) -> Self {
        Self {
            action,
            record_id: record_id.to_string(),
            detail: detail.into(),
        }
    }
}

/// Appends one entry. Runs after the primary commit and never fails the caller.
pub fn record(
    conn: &Connection,
    policy: &RetryPolicy,
    actor: &str,
    action: AuditAction,
    record_id: &str,
    detail: &str,
) {
    record_all(
        conn,
        policy,
        actor,
        &[AuditEvent::new(action, record_id, detail)],
    );
}

/// Appends a batch of entries in one transaction (bulk deletes, imports).
pub fn record_all(conn: &Connection, policy: &RetryPolicy, actor: &str, events: &[AuditEvent]) {
    if events.is_empty() {
        return;
    }
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let res = commit_with_retry(conn, policy, |tx| {
        let mut stmt = tx.prepare(
            "INSERT INTO audit_entries(action, actor, record_id, timestamp, detail)
             VALUES(?, ?, ?, ?, ?)",
        )?;
        for ev in events {
            stmt.execute((
                ev.action.as_str(),
                actor,
                &ev.record_id,
                &timestamp,
                &ev.detail,
            ))?;
        }
        Ok(())
    });
    match res {
        Ok(()) => debug!(actor, count = events.len(), "audit entries written"),
        Err(e) => warn!(actor, count = events.len(), error = %e, "audit write failed; ignored"),
    }
}

pub fn recent(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, action, actor, record_id, timestamp, detail
         FROM audit_entries
         ORDER BY id DESC
         LIMIT ?",
    )?;
    let rows = stmt
        .query_map([limit as i64], |r| {
            Ok(AuditEntry {
                id: r.get(0)?,
                action: r.get(1)?,
                actor: r.get(2)?,
                record_id: r.get(3)?,
                timestamp: r.get(4)?,
                detail: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
