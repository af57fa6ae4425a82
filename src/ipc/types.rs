use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::DaemonConfig;
use crate::nav::NavHistory;
use crate::tickets::{TicketKind, TicketStore};
use crate::visibility::Actor;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Per-process sign-in state. One sidecar serves one UI connection.
#[derive(Debug, Default)]
pub struct Session {
    pub actor: Option<Actor>,
    pub history: NavHistory,
}

impl Session {
    pub fn sign_in(&mut self, actor: Actor) {
        self.actor = Some(actor);
        self.history.clear();
    }

    pub fn sign_out(&mut self) {
        self.actor = None;
        self.history.clear();
    }
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: DaemonConfig,
    pub session: Session,
}

impl AppState {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            workspace: None,
            db: None,
            config,
            session: Session::default(),
        }
    }
}

/// Snapshot of the session taken before dispatch; handlers read the actor
/// from here rather than from `AppState`.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub actor: Option<Actor>,
}

impl RequestContext {
    pub fn from_session(session: &Session) -> Self {
        Self {
            actor: session.actor.clone(),
        }
    }
}

pub fn ticket_store<'a>(
    conn: &'a Connection,
    config: &DaemonConfig,
    kind: TicketKind,
) -> TicketStore<'a> {
    let ttl = match kind {
        TicketKind::PasswordReset => config.reset_ttl,
        TicketKind::Confirm | TicketKind::ImportBatch => config.confirm_ttl,
    };
    TicketStore::new(conn, kind, ttl, config.retry)
}
