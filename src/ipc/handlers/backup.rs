use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::guard::{guarded, Access};
use crate::ipc::helpers::{no_workspace, required_str};
use crate::ipc::types::{AppState, Request, RequestContext};
use crate::visibility::Actor;
use serde_json::json;
use std::path::PathBuf;

fn handle_backup_export_workspace_bundle(
    state: &mut AppState,
    actor: &Actor,
    req: &Request,
) -> serde_json::Value {
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (Some(workspace_path), Some(conn)) = (state.workspace.clone(), state.db.as_ref()) else {
        return no_workspace(req);
    };

    // Fold the WAL into the main file so the copied database is complete.
    if let Err(e) = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())) {
        tracing::warn!(error = %e, "wal checkpoint before backup failed");
    }

    let out = PathBuf::from(&out_path);
    let export = match backup::export_workspace_bundle(&workspace_path, db::DB_FILE, &out) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = ?e, "backup export failed");
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            );
        }
    };

    tracing::info!(actor = %actor.username, path = %out_path, "workspace bundle exported");
    ok(
        &req.id,
        json!({
            "path": out_path,
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count,
            "dbSha256": export.db_sha256,
        }),
    )
}

pub fn try_handle(state: &mut AppState, ctx: &RequestContext, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(guarded(
            state,
            ctx,
            req,
            Access::Admin,
            handle_backup_export_workspace_bundle,
        )),
        _ => None,
    }
}
