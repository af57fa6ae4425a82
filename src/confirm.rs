//! Server-side confirmation for destructive requests (post/redirect/get).
//!
//! The first leg of a destructive request is turned into a ticket holding the
//! method and params, and the caller is redirected (303) to `confirm.view`.
//! The view hands back the same method and params plus `confirmed` and
//! `confirmToken`; resubmitting them re-enters the same handler, which
//! classifies the request as [`Gate::Confirmed`] and consumes the ticket in
//! the same transaction as the mutation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::nav::{Destination, VIEW_CONFIRM};
use crate::tickets::{TicketError, TicketStore};

pub const CONFIRMED_PARAM: &str = "confirmed";
pub const TOKEN_PARAM: &str = "confirmToken";
pub const REQUIRES_CONFIRM_PARAM: &str = "requiresConfirm";

pub const REDIRECT_SEE_OTHER: u16 = 303;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescriptor {
    pub method: String,
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmTicket {
    /// Username of the actor who started the action; only they may confirm it.
    pub actor: String,
    pub message: String,
    pub action: ActionDescriptor,
    pub cancel: Destination,
    #[serde(default)]
    pub items: Vec<String>,
}

/// What the UI renders on the confirmation page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmView {
    pub message: String,
    pub action: ActionDescriptor,
    pub cancel: Destination,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    /// Proceed without confirmation.
    Direct,
    /// No confirmation marker yet; a ticket must be issued.
    NeedsConfirmation,
    /// Replay of a live ticket for this method, actor and params.
    Confirmed { token: String },
    /// A confirmation marker was sent but its ticket is gone, not ours, or
    /// was issued for different params.
    Expired,
}

#[derive(Debug, Clone)]
pub struct Prompt {
    pub message: String,
    pub cancel: Destination,
    pub items: Vec<String>,
}

impl Prompt {
    pub fn new(message: impl Into<String>, cancel: Destination) -> Self {
        Self {
            message: message.into(),
            cancel,
            items: Vec::new(),
        }
    }

    pub fn with_items(mut self, items: Vec<String>) -> Self {
        self.items = items;
        self
    }
}

pub fn flag(params: &Value, key: &str) -> bool {
    match params.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(false),
        Some(Value::String(s)) => matches!(s.trim(), "1" | "true" | "yes" | "on"),
        _ => false,
    }
}

/// Decides how a mutating request proceeds. A replay only counts as
/// confirmed when it carries exactly the params the ticket was issued for.
pub fn classify(
    store: &TicketStore<'_>,
    actor: &str,
    method: &str,
    params: &Value,
    destructive: bool,
) -> Result<Gate, TicketError> {
    if flag(params, CONFIRMED_PARAM) {
        let Some(token) = params.get(TOKEN_PARAM).and_then(|v| v.as_str()) else {
            return Ok(Gate::Expired);
        };
        let ticket: Option<ConfirmTicket> = store.lookup(token)?;
        return Ok(match ticket {
            Some(t)
                if t.actor == actor
                    && t.action.method == method
                    && t.action.params == preserved_params(params) =>
            {
                Gate::Confirmed {
                    token: token.to_string(),
                }
            }
            _ => Gate::Expired,
        });
    }
    if destructive || flag(params, REQUIRES_CONFIRM_PARAM) {
        Ok(Gate::NeedsConfirmation)
    } else {
        Ok(Gate::Direct)
    }
}

/// Request params minus the confirmation markers.
pub fn preserved_params(params: &Value) -> Map<String, Value> {
    let mut out = params.as_object().cloned().unwrap_or_default();
    out.remove(CONFIRMED_PARAM);
    out.remove(TOKEN_PARAM);
    out.remove(REQUIRES_CONFIRM_PARAM);
    out
}

/// Persists the intent and returns the redirect target for the confirmation page.
pub fn request_confirmation(
    store: &TicketStore<'_>,
    actor: &str,
    method: &str,
    params: &Value,
    prompt: Prompt,
) -> Result<Destination, TicketError> {
    let ticket = ConfirmTicket {
        actor: actor.to_string(),
        message: prompt.message,
        action: ActionDescriptor {
            method: method.to_string(),
            params: preserved_params(params),
        },
        cancel: prompt.cancel,
        items: prompt.items,
    };
    let token = store.create(&ticket)?;
    Ok(Destination::with_params(
        VIEW_CONFIRM,
        serde_json::json!({ "token": token }),
    ))
}

/// Loads the confirmation page for `token`, sweeping expired tickets first.
/// `None` means the ticket is unknown, expired, or belongs to someone else.
pub fn view(
    store: &TicketStore<'_>,
    actor: &str,
    token: &str,
) -> Result<Option<ConfirmView>, TicketError> {
    if let Err(e) = store.sweep() {
        tracing::warn!(error = %e, "confirm ticket sweep failed");
    }
    let ticket: Option<ConfirmTicket> = store.lookup(token)?;
    let Some(ticket) = ticket.filter(|t| t.actor == actor) else {
        return Ok(None);
    };

    let mut params = ticket.action.params;
    params.insert(CONFIRMED_PARAM.to_string(), Value::Bool(true));
    params.insert(TOKEN_PARAM.to_string(), Value::String(token.to_string()));
    Ok(Some(ConfirmView {
        message: ticket.message,
        action: ActionDescriptor {
            method: ticket.action.method,
            params,
        },
        cancel: ticket.cancel,
        items: ticket.items,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::RetryPolicy;
    use crate::tickets::{TicketKind, DEFAULT_CONFIRM_TTL};
    use rusqlite::Connection;
    use serde_json::json;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE tickets(
                token TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .expect("schema");
        conn
    }

    fn store(conn: &Connection) -> TicketStore<'_> {
        TicketStore::new(
            conn,
            TicketKind::Confirm,
            DEFAULT_CONFIRM_TTL,
            RetryPolicy::default(),
        )
    }

    #[test]
    fn flags_accept_form_values() {
        assert!(flag(&json!({ "confirmed": "1" }), CONFIRMED_PARAM));
        assert!(flag(&json!({ "confirmed": true }), CONFIRMED_PARAM));
        assert!(!flag(&json!({ "confirmed": "0" }), CONFIRMED_PARAM));
        assert!(!flag(&json!({}), CONFIRMED_PARAM));
    }

    #[test]
    fn view_params_replay_as_confirmed() {
        let conn = conn();
        let store = store(&conn);
        let params = json!({ "recordId": "r1", "requiresConfirm": true });
        let dest = request_confirmation(
            &store,
            "t1",
            "records.delete",
            &params,
            Prompt::new("Delete?", Destination::view("records.list")),
        )
        .expect("request");
        assert_eq!(dest.view, VIEW_CONFIRM);
        let token = dest.params["token"].as_str().expect("token").to_string();

        let page = view(&store, "t1", &token).expect("view").expect("live");
        let replay = Value::Object(page.action.params.clone());
        assert!(replay.get(REQUIRES_CONFIRM_PARAM).is_none());
        assert_eq!(
            classify(&store, "t1", "records.delete", &replay, true).expect("classify"),
            Gate::Confirmed { token }
        );
    }

    #[test]
    fn tickets_are_bound_to_method_and_actor() {
        let conn = conn();
        let store = store(&conn);
        let dest = request_confirmation(
            &store,
            "t1",
            "records.delete",
            &json!({ "recordId": "r1" }),
            Prompt::new("Delete?", Destination::view("records.list")),
        )
        .expect("request");
        let token = dest.params["token"].as_str().expect("token");
        let replay = json!({ "recordId": "r1", "confirmed": true, "confirmToken": token });

        assert_eq!(
            classify(&store, "t2", "records.delete", &replay, true).expect("classify"),
            Gate::Expired
        );
        assert_eq!(
            classify(&store, "t1", "users.delete", &replay, true).expect("classify"),
            Gate::Expired
        );
        assert!(view(&store, "t2", token).expect("view").is_none());
    }

    #[test]
    fn tickets_are_bound_to_their_params() {
        let conn = conn();
        let store = store(&conn);
        let dest = request_confirmation(
            &store,
            "t1",
            "records.deleteSection",
            &json!({ "section": "Section A" }),
            Prompt::new("Delete all?", Destination::view("records.sections")),
        )
        .expect("request");
        let token = dest.params["token"].as_str().expect("token");

        let swapped = json!({ "section": "Section C", "confirmed": true, "confirmToken": token });
        assert_eq!(
            classify(&store, "t1", "records.deleteSection", &swapped, true).expect("classify"),
            Gate::Expired
        );
        let widened = json!({
            "section": "Section A",
            "q": "AS",
            "confirmed": true,
            "confirmToken": token
        });
        assert_eq!(
            classify(&store, "t1", "records.deleteSection", &widened, true).expect("classify"),
            Gate::Expired
        );
        let exact = json!({ "section": "Section A", "confirmed": "1", "confirmToken": token });
        assert_eq!(
            classify(&store, "t1", "records.deleteSection", &exact, true).expect("classify"),
            Gate::Confirmed {
                token: token.to_string()
            }
        );
    }

    #[test]
    fn opt_in_confirmation_for_non_destructive() {
        let conn = conn();
        let store = store(&conn);
        assert_eq!(
            classify(&store, "t1", "records.create", &json!({}), false).expect("classify"),
            Gate::Direct
        );
        assert_eq!(
            classify(
                &store,
                "t1",
                "records.create",
                &json!({ "requiresConfirm": "1" }),
                false
            )
            .expect("classify"),
            Gate::NeedsConfirmation
        );
        assert_eq!(
            classify(&store, "t1", "records.create", &json!({ "confirmed": true }), false)
                .expect("classify"),
            Gate::Expired
        );
    }
}
