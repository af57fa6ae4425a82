use super::handlers;
use super::types::{AppState, Request, RequestContext};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let span = tracing::info_span!("request", id = %req.id, method = %req.method);
    let _entered = span.enter();
    let ctx = RequestContext::from_session(&state.session);

    if let Some(resp) = handlers::core::try_handle(state, &ctx, &req) {
        return resp;
    }
    if let Some(resp) = handlers::auth::try_handle(state, &ctx, &req) {
        return resp;
    }
    if let Some(resp) = handlers::records::try_handle(state, &ctx, &req) {
        return resp;
    }
    if let Some(resp) = handlers::users::try_handle(state, &ctx, &req) {
        return resp;
    }
    if let Some(resp) = handlers::confirm::try_handle(state, &ctx, &req) {
        return resp;
    }
    if let Some(resp) = handlers::exchange::try_handle(state, &ctx, &req) {
        return resp;
    }
    if let Some(resp) = handlers::backup::try_handle(state, &ctx, &req) {
        return resp;
    }

    tracing::debug!("unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
