use crate::nav::{is_area_view, Destination, VIEW_DASHBOARD, VIEW_LOGIN};
use crate::visibility::{require_admin, Actor};

use super::error::{redirect, Notice, NOTICE_DENIED, NOTICE_LOGIN_REQUIRED};
use super::types::{AppState, Request, RequestContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    SignedIn,
    Admin,
}

pub type Handler = fn(&mut AppState, &Actor, &Request) -> serde_json::Value;

/// Runs `handler` only for a signed-in actor with the required role.
/// Area views are pushed onto the session's back-navigation history.
pub fn guarded(
    state: &mut AppState,
    ctx: &RequestContext,
    req: &Request,
    access: Access,
    handler: Handler,
) -> serde_json::Value {
    let Some(actor) = ctx.actor.as_ref() else {
        tracing::debug!(method = %req.method, "rejected: not signed in");
        return redirect(
            &req.id,
            Destination::view(VIEW_LOGIN),
            Some(Notice::coded(
                NOTICE_LOGIN_REQUIRED,
                "Please sign in to continue.",
            )),
        );
    };
    if access == Access::Admin {
        if let Err(denied) = require_admin(actor) {
            tracing::info!(method = %req.method, actor = %actor.username, "rejected: admin only");
            return redirect(
                &req.id,
                Destination::view(VIEW_DASHBOARD),
                Some(Notice::coded(NOTICE_DENIED, denied.to_string())),
            );
        }
    }
    if is_area_view(&req.method) {
        state.session.history.visit(&req.method);
    }
    handler(state, actor, req)
}
