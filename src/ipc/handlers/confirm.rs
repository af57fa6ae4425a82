use crate::confirm;
use crate::ipc::error::ok;
use crate::ipc::guard::{guarded, Access};
use crate::ipc::helpers::{
    confirm_store, confirmation_expired, no_workspace, required_str, ticket_failed,
};
use crate::ipc::types::{AppState, Request, RequestContext};
use crate::nav::{Destination, VIEW_DASHBOARD};
use crate::visibility::Actor;
use serde_json::json;

/// Renders the confirmation page for a pending destructive action. Looking
/// the ticket up does not consume it; reloading the page is harmless.
fn handle_confirm_view(state: &mut AppState, actor: &Actor, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let token = match required_str(req, "token") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let store = confirm_store(conn, &state.config);
    match confirm::view(&store, &actor.username, &token) {
        Ok(Some(view)) => ok(&req.id, json!(view)),
        Ok(None) => confirmation_expired(req),
        Err(e) => ticket_failed(req, e, "load the confirmation", Destination::view(VIEW_DASHBOARD)),
    }
}

pub fn try_handle(state: &mut AppState, ctx: &RequestContext, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "confirm.view" => Some(guarded(state, ctx, req, Access::SignedIn, handle_confirm_view)),
        _ => None,
    }
}
