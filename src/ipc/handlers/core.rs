use crate::db;
use crate::ipc::error::{err, ok, redirect};
use crate::ipc::guard::{guarded, Access};
use crate::ipc::helpers::{db_failed, no_workspace, workspace_json};
use crate::ipc::types::{AppState, Request, RequestContext};
use crate::nav::{Destination, VIEW_DASHBOARD};
use crate::records;
use crate::visibility::{scope_for, Actor, Intent, RecordFilter};
use crate::grading::RiskTier;
use serde_json::json;
use std::path::{Path, PathBuf};

fn handle_health(state: &mut AppState, _ctx: &RequestContext, req: &Request) -> serde_json::Value {
    let schema_version = state
        .db
        .as_ref()
        .and_then(|conn| db::schema_version(conn).ok());
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": workspace_json(state.workspace.as_deref()),
            "schemaVersion": schema_version,
            "supportedSchemaVersion": db::SCHEMA_VERSION,
        }),
    )
}

/// Opens (or creates) the workspace database and makes it current. Any
/// session from a previous workspace is dropped.
pub fn select_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    let conn = db::open_db(path, state.config.busy_timeout)?;
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    state.session.sign_out();
    tracing::info!(workspace = %path.to_string_lossy(), "workspace selected");
    Ok(())
}

fn handle_workspace_select(state: &mut AppState, _ctx: &RequestContext, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match select_workspace(state, &path) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => {
            tracing::error!(error = ?e, "workspace open failed");
            let code = if e.downcast_ref::<db::SchemaTooNew>().is_some() {
                "schema_version_unsupported"
            } else {
                "db_open_failed"
            };
            err(&req.id, code, format!("{e:?}"), None)
        }
    }
}

fn handle_session_whoami(state: &mut AppState, ctx: &RequestContext, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "actor": ctx.actor,
            "history": state.session.history.entries(),
        }),
    )
}

fn handle_dashboard_get(state: &mut AppState, actor: &Actor, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let scope = scope_for(actor, Intent::Read);
    let total = match records::count(conn, &scope, &RecordFilter::default()) {
        Ok(v) => v,
        Err(e) => return db_failed(req, &e),
    };
    let at_risk_filter = RecordFilter {
        risk: Some(RiskTier::High.label().to_string()),
        ..RecordFilter::default()
    };
    let at_risk = match records::count(conn, &scope, &at_risk_filter) {
        Ok(v) => v,
        Err(e) => return db_failed(req, &e),
    };
    ok(
        &req.id,
        json!({
            "username": actor.username,
            "role": actor.role,
            "total": total,
            "atRisk": at_risk,
        }),
    )
}

fn handle_nav_back(state: &mut AppState, _actor: &Actor, req: &Request) -> serde_json::Value {
    let view = state
        .session
        .history
        .back()
        .unwrap_or_else(|| VIEW_DASHBOARD.to_string());
    redirect(&req.id, Destination::view(&view), None)
}

pub fn try_handle(state: &mut AppState, ctx: &RequestContext, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, ctx, req)),
        "workspace.select" => Some(handle_workspace_select(state, ctx, req)),
        "session.whoami" => Some(handle_session_whoami(state, ctx, req)),
        "dashboard.get" => Some(guarded(state, ctx, req, Access::SignedIn, handle_dashboard_get)),
        "nav.back" => Some(guarded(state, ctx, req, Access::SignedIn, handle_nav_back)),
        _ => None,
    }
}
