use crate::accounts;
use crate::commit::commit_with_retry;
use crate::confirm::Prompt;
use crate::credentials::{hash_password, verify_password};
use crate::ipc::error::{err, ok, redirect, redirect_result, validation_failed, Notice};
use crate::ipc::guard::{guarded, Access};
use crate::ipc::helpers::{
    commit_failed, confirm_store, confirmation_expired, confirmation_gate, consume_confirmation,
    db_failed, no_workspace, param_str, ticket_failed,
};
use crate::ipc::types::{ticket_store, AppState, Request, RequestContext};
use crate::nav::{Destination, VIEW_DASHBOARD, VIEW_FORGOT, VIEW_LOGIN, VIEW_REGISTER};
use crate::tickets::TicketKind;
use crate::visibility::{Actor, Role};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Serialize, Deserialize)]
struct ResetPayload {
    username: String,
}

fn raw_str<'a>(req: &'a Request, key: &str) -> &'a str {
    req.params.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

fn handle_register(state: &mut AppState, _ctx: &RequestContext, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let Some(username) = param_str(req, "username") else {
        return validation_failed(&req.id, "username", "Username is required.");
    };
    let password = raw_str(req, "password");
    if password.is_empty() {
        return validation_failed(&req.id, "password", "Password is required.");
    }
    let role = match param_str(req, "role") {
        None => Role::Teacher,
        Some(r) => match Role::parse(r) {
            Some(role) => role,
            None => return validation_failed(&req.id, "role", "Role must be Admin or Teacher."),
        },
    };

    let hash = hash_password(password);
    let inserted = commit_with_retry(conn, &state.config.retry, |tx| {
        accounts::insert(tx, username, &hash, role)
    });
    match inserted {
        Ok(Some(_)) => {
            tracing::info!(username, role = role.as_str(), "account registered");
            redirect(
                &req.id,
                Destination::view(VIEW_LOGIN),
                Some(Notice::info("Registration successful. Please sign in.")),
            )
        }
        Ok(None) => validation_failed(&req.id, "username", "Username already exists."),
        Err(e) => commit_failed(req, &e, "register", Destination::view(VIEW_REGISTER)),
    }
}

fn handle_login(state: &mut AppState, _ctx: &RequestContext, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let username = param_str(req, "username").unwrap_or("");
    let password = raw_str(req, "password");
    let account = match accounts::find_by_username(conn, username) {
        Ok(v) => v,
        Err(e) => return db_failed(req, &e),
    };
    let Some(account) = account.filter(|a| verify_password(&a.password_hash, password)) else {
        tracing::info!(username, "sign-in rejected");
        return err(
            &req.id,
            "invalid_credentials",
            "Invalid username or password.",
            None,
        );
    };

    let actor = account.actor();
    tracing::info!(username = %actor.username, role = actor.role.as_str(), "signed in");
    let mut result = redirect_result(Destination::view(VIEW_DASHBOARD), None);
    result["actor"] = json!(actor);
    state.session.sign_in(actor);
    ok(&req.id, result)
}

/// Issues a single-use reset token. The token is returned directly since the
/// sidecar has no mail channel.
fn handle_forgot(state: &mut AppState, _ctx: &RequestContext, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let Some(username) = param_str(req, "username") else {
        return validation_failed(&req.id, "username", "Username is required.");
    };
    let account = match accounts::find_by_username(conn, username) {
        Ok(v) => v,
        Err(e) => return db_failed(req, &e),
    };
    let token = match account {
        Some(a) => {
            let store = ticket_store(conn, &state.config, TicketKind::PasswordReset);
            match store.create(&ResetPayload { username: a.username }) {
                Ok(t) => Some(t),
                Err(e) => {
                    return ticket_failed(req, e, "start a password reset", Destination::view(VIEW_FORGOT))
                }
            }
        }
        None => None,
    };
    ok(
        &req.id,
        json!({
            "resetToken": token,
            "notice": "If the account exists, a reset link has been issued.",
        }),
    )
}

fn handle_reset(state: &mut AppState, _ctx: &RequestContext, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let Some(token) = param_str(req, "token") else {
        return err(&req.id, "bad_params", "missing token", None);
    };
    let password = raw_str(req, "password");
    if password.is_empty() {
        return validation_failed(&req.id, "password", "Password is required.");
    }
    if password != raw_str(req, "confirm") {
        return validation_failed(&req.id, "confirm", "Passwords do not match.");
    }

    let store = ticket_store(conn, &state.config, TicketKind::PasswordReset);
    let payload: Option<ResetPayload> = match store.lookup(token) {
        Ok(v) => v,
        Err(e) => return ticket_failed(req, e, "reset the password", Destination::view(VIEW_FORGOT)),
    };
    let Some(payload) = payload else {
        return err(&req.id, "invalid_token", "Reset link expired or invalid.", None);
    };

    let hash = hash_password(password);
    let updated = commit_with_retry(conn, &state.config.retry, |tx| {
        if !store.consume_in(tx, token)? {
            return Ok(false);
        }
        accounts::set_password(tx, &payload.username, &hash)?;
        Ok(true)
    });
    match updated {
        Ok(true) => {
            tracing::info!(username = %payload.username, "password reset");
            redirect(
                &req.id,
                Destination::view(VIEW_LOGIN),
                Some(Notice::info("Password updated. Please sign in.")),
            )
        }
        Ok(false) => err(&req.id, "invalid_token", "Reset link expired or invalid.", None),
        Err(e) => commit_failed(req, &e, "reset the password", Destination::view(VIEW_FORGOT)),
    }
}

fn handle_logout(state: &mut AppState, actor: &Actor, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let token = match confirmation_gate(conn, &state.config, actor, req, true, || {
        Prompt::new(
            format!("Log out {}?", actor.username),
            Destination::view(VIEW_DASHBOARD),
        )
    }) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    if token.is_some() {
        let store = confirm_store(conn, &state.config);
        let consumed = commit_with_retry(conn, &state.config.retry, |tx| {
            consume_confirmation(&store, tx, token.as_deref())
        });
        match consumed {
            Ok(true) => {}
            Ok(false) => return confirmation_expired(req),
            Err(e) => return commit_failed(req, &e, "log out", Destination::view(VIEW_DASHBOARD)),
        }
    }

    tracing::info!(username = %actor.username, "signed out");
    state.session.sign_out();
    redirect(
        &req.id,
        Destination::view(VIEW_LOGIN),
        Some(Notice::info("You have been logged out.")),
    )
}

pub fn try_handle(state: &mut AppState, ctx: &RequestContext, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.register" => Some(handle_register(state, ctx, req)),
        "auth.login" => Some(handle_login(state, ctx, req)),
        "auth.forgot" => Some(handle_forgot(state, ctx, req)),
        "auth.reset" => Some(handle_reset(state, ctx, req)),
        "session.logout" => Some(guarded(state, ctx, req, Access::SignedIn, handle_logout)),
        _ => None,
    }
}
