use rusqlite::Connection;
use serde_json::json;

use crate::commit::CommitError;
use crate::config::DaemonConfig;
use crate::confirm::{self, Gate, Prompt};
use crate::nav::{Destination, VIEW_DASHBOARD};
use crate::tickets::{TicketError, TicketKind, TicketStore};
use crate::visibility::Actor;

use super::error::{
    err, redirect, Notice, NOTICE_CONFIRMATION_EXPIRED, NOTICE_STORAGE_BUSY, NOTICE_UNEXPECTED,
};
use super::types::{ticket_store, Request};

pub fn param_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    param_str(req, key)
        .map(str::to_string)
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {key}"), None))
}

pub fn no_workspace(req: &Request) -> serde_json::Value {
    err(&req.id, "no_workspace", "select a workspace first", None)
}

pub fn not_found(req: &Request, what: &str) -> serde_json::Value {
    err(&req.id, "not_found", format!("{what} not found"), None)
}

pub fn db_failed(req: &Request, e: &rusqlite::Error) -> serde_json::Value {
    tracing::error!(method = %req.method, error = %e, "query failed");
    err(&req.id, "db_query_failed", e.to_string(), None)
}

pub fn confirmation_expired(req: &Request) -> serde_json::Value {
    redirect(
        &req.id,
        Destination::view(VIEW_DASHBOARD),
        Some(Notice::coded(
            NOTICE_CONFIRMATION_EXPIRED,
            "Confirmation expired or invalid.",
        )),
    )
}

/// Maps a failed write to a redirect back to `back`. Contention that
/// outlasted the retry budget is reported as retryable; anything else is
/// logged and reported generically.
pub fn commit_failed(req: &Request, e: &CommitError, what: &str, back: Destination) -> serde_json::Value {
    if e.is_storage_busy() {
        tracing::warn!(method = %req.method, error = %e, "write abandoned");
        return redirect(
            &req.id,
            back,
            Some(Notice::coded(
                NOTICE_STORAGE_BUSY,
                format!("Could not {what} right now (database busy). Please try again."),
            )),
        );
    }
    tracing::error!(method = %req.method, error = %e, "write failed");
    redirect(
        &req.id,
        back,
        Some(Notice::coded(
            NOTICE_UNEXPECTED,
            format!("Could not {what}. An unexpected error occurred."),
        )),
    )
}

pub fn ticket_failed(req: &Request, e: TicketError, what: &str, back: Destination) -> serde_json::Value {
    match e {
        TicketError::Commit(c) => commit_failed(req, &c, what, back),
        TicketError::Sqlite(s) => commit_failed(req, &CommitError::Sqlite(s), what, back),
        TicketError::Payload(p) => {
            tracing::error!(method = %req.method, error = %p, "ticket payload unreadable");
            redirect(
                &req.id,
                back,
                Some(Notice::coded(
                    NOTICE_UNEXPECTED,
                    format!("Could not {what}. An unexpected error occurred."),
                )),
            )
        }
    }
}

pub fn confirm_store<'a>(conn: &'a Connection, config: &DaemonConfig) -> TicketStore<'a> {
    ticket_store(conn, config, TicketKind::Confirm)
}

/// First half of every mutating handler. `Ok(None)` proceeds without a
/// ticket, `Ok(Some(token))` proceeds and must consume `token` in the write
/// transaction, `Err(resp)` is the response to send instead (the redirect to
/// the confirmation page, or an expired notice).
pub fn confirmation_gate<F>(
    conn: &Connection,
    config: &DaemonConfig,
    actor: &Actor,
    req: &Request,
    destructive: bool,
    prompt: F,
) -> Result<Option<String>, serde_json::Value>
where
    F: FnOnce() -> Prompt,
{
    let store = confirm_store(conn, config);
    let gate = confirm::classify(&store, &actor.username, &req.method, &req.params, destructive)
        .map_err(|e| ticket_failed(req, e, "confirm this action", Destination::view(VIEW_DASHBOARD)))?;
    match gate {
        Gate::Direct => Ok(None),
        Gate::Confirmed { token } => Ok(Some(token)),
        Gate::Expired => {
            tracing::info!(method = %req.method, actor = %actor.username, "stale confirmation");
            Err(confirmation_expired(req))
        }
        Gate::NeedsConfirmation => {
            let prompt = prompt();
            let cancel = prompt.cancel.clone();
            match confirm::request_confirmation(&store, &actor.username, &req.method, &req.params, prompt) {
                Ok(to) => {
                    tracing::debug!(method = %req.method, actor = %actor.username, "confirmation requested");
                    Err(redirect(&req.id, to, None))
                }
                Err(e) => Err(ticket_failed(req, e, "start this action", cancel)),
            }
        }
    }
}

/// Consumes the confirmation ticket inside the write transaction. Returns
/// false when a concurrent replay got there first.
pub fn consume_confirmation(
    store: &TicketStore<'_>,
    tx: &Connection,
    token: Option<&str>,
) -> rusqlite::Result<bool> {
    match token {
        Some(t) => store.consume_in(tx, t),
        None => Ok(true),
    }
}

pub fn workspace_json(state_workspace: Option<&std::path::Path>) -> serde_json::Value {
    json!(state_workspace.map(|p| p.to_string_lossy().to_string()))
}
