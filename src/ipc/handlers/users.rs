use crate::accounts::{self, Account};
use crate::audit;
use crate::commit::commit_with_retry;
use crate::confirm::{self, Prompt, CONFIRMED_PARAM};
use crate::ipc::error::{ok, redirect, validation_failed, Notice, NOTICE_DENIED};
use crate::ipc::guard::{guarded, Access, Handler};
use crate::ipc::helpers::{
    commit_failed, confirm_store, confirmation_expired, confirmation_gate, consume_confirmation,
    db_failed, no_workspace, not_found, param_str, required_str,
};
use crate::ipc::types::{AppState, Request, RequestContext};
use crate::nav::{Destination, VIEW_USERS};
use crate::visibility::{Actor, Role};
use serde_json::json;

const AUDIT_PAGE_LIMIT: usize = 100;

fn users_view() -> Destination {
    Destination::view(VIEW_USERS)
}

fn load_target(conn: &rusqlite::Connection, req: &Request) -> Result<Account, serde_json::Value> {
    let user_id = required_str(req, "userId")?;
    match accounts::find_by_id(conn, &user_id) {
        Ok(Some(a)) => Ok(a),
        Ok(None) if confirm::flag(&req.params, CONFIRMED_PARAM) => Err(confirmation_expired(req)),
        Ok(None) => Err(not_found(req, "user")),
        Err(e) => Err(db_failed(req, &e)),
    }
}

fn handle_users_list(state: &mut AppState, _actor: &Actor, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let users = match accounts::list(conn) {
        Ok(v) => v,
        Err(e) => return db_failed(req, &e),
    };
    ok(&req.id, json!({ "users": users }))
}

fn handle_users_delete(state: &mut AppState, actor: &Actor, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let target = match load_target(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if target.username == actor.username {
        return redirect(
            &req.id,
            users_view(),
            Some(Notice::coded(
                NOTICE_DENIED,
                "You cannot delete your own account while signed in.",
            )),
        );
    }
    let token = match confirmation_gate(conn, &state.config, actor, req, true, || {
        Prompt::new(
            format!("Delete user {}? This cannot be undone.", target.username),
            users_view(),
        )
        .with_items(vec![target.username.clone()])
    }) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let store = confirm_store(conn, &state.config);
    let deleted = commit_with_retry(conn, &state.config.retry, |tx| {
        if !consume_confirmation(&store, tx, token.as_deref())? {
            return Ok(None);
        }
        accounts::delete(tx, &target.id).map(Some)
    });
    match deleted {
        Ok(Some(_)) => {
            tracing::info!(actor = %actor.username, user = %target.username, "user deleted");
            redirect(&req.id, users_view(), Some(Notice::info("User deleted.")))
        }
        Ok(None) => confirmation_expired(req),
        Err(e) => commit_failed(req, &e, "delete user", users_view()),
    }
}

fn handle_users_set_role(state: &mut AppState, actor: &Actor, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let target = match load_target(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(role) = param_str(req, "role").and_then(Role::parse) else {
        return validation_failed(&req.id, "role", "Role must be Admin or Teacher.");
    };
    let token = match confirmation_gate(conn, &state.config, actor, req, true, || {
        Prompt::new(
            format!("Change role for {} to {}?", target.username, role.as_str()),
            users_view(),
        )
        .with_items(vec![format!("{} → {}", target.username, role.as_str())])
    }) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let store = confirm_store(conn, &state.config);
    let updated = commit_with_retry(conn, &state.config.retry, |tx| {
        if !consume_confirmation(&store, tx, token.as_deref())? {
            return Ok(None);
        }
        accounts::set_role(tx, &target.id, role).map(Some)
    });
    match updated {
        Ok(Some(_)) => {}
        Ok(None) => return confirmation_expired(req),
        Err(e) => return commit_failed(req, &e, "update role", users_view()),
    }

    tracing::info!(actor = %actor.username, user = %target.username, role = role.as_str(), "role changed");
    if target.username == actor.username {
        state.session.actor = Some(Actor::new(&actor.username, role));
    }
    redirect(&req.id, users_view(), Some(Notice::info("Role updated.")))
}

fn handle_audit_list(state: &mut AppState, _actor: &Actor, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    match audit::recent(conn, AUDIT_PAGE_LIMIT) {
        Ok(entries) => ok(&req.id, json!({ "entries": entries })),
        Err(e) => db_failed(req, &e),
    }
}

pub fn try_handle(state: &mut AppState, ctx: &RequestContext, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "users.list" => handle_users_list,
        "users.delete" => handle_users_delete,
        "users.setRole" => handle_users_set_role,
        "audit.list" => handle_audit_list,
        _ => return None,
    };
    Some(guarded(state, ctx, req, Access::Admin, handler))
}
