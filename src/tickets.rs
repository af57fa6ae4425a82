//! Durable TTL-keyed token store.
//!
//! Tokens are 32 hex chars from a v4 UUID. Entries expire after the store's
//! TTL; expired entries are invisible to `lookup` immediately and are deleted
//! by `sweep`, which runs opportunistically on `create` (and on confirmation
//! views), never from a timer.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::commit::{commit_with_retry, CommitError, RetryPolicy};

pub const DEFAULT_CONFIRM_TTL: Duration = Duration::from_secs(600);
pub const DEFAULT_RESET_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketKind {
    Confirm,
    PasswordReset,
    ImportBatch,
}

impl TicketKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketKind::Confirm => "confirm",
            TicketKind::PasswordReset => "password_reset",
            TicketKind::ImportBatch => "import_batch",
        }
    }
}

#[derive(Debug, Error)]
pub enum TicketError {
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("ticket payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub struct TicketStore<'a> {
    conn: &'a Connection,
    kind: TicketKind,
    ttl: Duration,
    policy: RetryPolicy,
}

impl<'a> TicketStore<'a> {
    pub fn new(conn: &'a Connection, kind: TicketKind, ttl: Duration, policy: RetryPolicy) -> Self {
        Self {
            conn,
            kind,
            ttl,
            policy,
        }
    }

    pub fn create<T: Serialize>(&self, payload: &T) -> Result<String, TicketError> {
        self.create_at(payload, Utc::now())
    }

    pub fn create_at<T: Serialize>(
        &self,
        payload: &T,
        now: DateTime<Utc>,
    ) -> Result<String, TicketError> {
        if let Err(e) = self.sweep_at(now) {
            warn!(kind = self.kind.as_str(), error = %e, "ticket sweep failed");
        }

        let token = Uuid::new_v4().simple().to_string();
        let body = serde_json::to_string(payload)?;
        let created_at = now.timestamp_millis();
        commit_with_retry(self.conn, &self.policy, |tx| {
            tx.execute(
                "INSERT INTO tickets(token, kind, payload, created_at) VALUES(?, ?, ?, ?)",
                (&token, self.kind.as_str(), &body, created_at),
            )
        })?;
        debug!(kind = self.kind.as_str(), token = %token, "ticket created");
        Ok(token)
    }

    pub fn lookup<T: DeserializeOwned>(&self, token: &str) -> Result<Option<T>, TicketError> {
        self.lookup_at(token, Utc::now())
    }

    /// Reads without deleting, so a confirmation page can be rendered again.
    pub fn lookup_at<T: DeserializeOwned>(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<T>, TicketError> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM tickets WHERE token = ? AND kind = ? AND created_at >= ?",
                (token, self.kind.as_str(), self.cutoff_millis(now)),
                |r| r.get(0),
            )
            .optional()?;
        match body {
            Some(b) => Ok(Some(serde_json::from_str(&b)?)),
            None => Ok(None),
        }
    }

    pub fn sweep(&self) -> Result<usize, TicketError> {
        self.sweep_at(Utc::now())
    }

    /// Deletes every entry of this kind older than the TTL. Safe to run
    /// concurrently: a second sweep of the same rows deletes nothing.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize, TicketError> {
        let cutoff = self.cutoff_millis(now);
        let removed = commit_with_retry(self.conn, &self.policy, |tx| {
            tx.execute(
                "DELETE FROM tickets WHERE kind = ? AND created_at < ?",
                (self.kind.as_str(), cutoff),
            )
        })?;
        if removed > 0 {
            info!(kind = self.kind.as_str(), removed, "removed expired tickets");
        }
        Ok(removed)
    }

    pub fn consume_in(&self, conn: &Connection, token: &str) -> rusqlite::Result<bool> {
        self.consume_in_at(conn, token, Utc::now())
    }

    /// Deletes a live ticket as part of the caller's transaction. Returns
    /// false when it was already consumed, swept or expired.
    pub fn consume_in_at(
        &self,
        conn: &Connection,
        token: &str,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<bool> {
        let n = conn.execute(
            "DELETE FROM tickets WHERE token = ? AND kind = ? AND created_at >= ?",
            (token, self.kind.as_str(), self.cutoff_millis(now)),
        )?;
        Ok(n == 1)
    }

    fn cutoff_millis(&self, now: DateTime<Utc>) -> i64 {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        now.timestamp_millis().saturating_sub(ttl_ms)
    }
}
