use crate::audit::{self, AuditAction, AuditEvent};
use crate::commit::commit_with_retry;
use crate::confirm::Prompt;
use crate::exchange::{self, ImportBatch};
use crate::ipc::error::{err, ok, redirect, Notice, NOTICE_CONFIRMATION_EXPIRED};
use crate::ipc::guard::{guarded, Access, Handler};
use crate::ipc::helpers::{
    commit_failed, confirm_store, confirmation_expired, confirmation_gate, consume_confirmation,
    db_failed, no_workspace, param_str, required_str, ticket_failed,
};
use crate::ipc::types::{ticket_store, AppState, Request, RequestContext};
use crate::nav::{Destination, VIEW_IMPORT, VIEW_RECORDS};
use crate::records;
use crate::tickets::TicketKind;
use crate::visibility::{scope_for, Actor, Intent, RecordFilter};
use serde_json::json;

fn import_view() -> Destination {
    Destination::view(VIEW_IMPORT)
}

fn batch_expired(req: &Request) -> serde_json::Value {
    redirect(
        &req.id,
        import_view(),
        Some(Notice::coded(
            NOTICE_CONFIRMATION_EXPIRED,
            "Import expired. Please upload the file again.",
        )),
    )
}

/// Parses an uploaded CSV (inline `csv` text or a `path`) and parks the
/// result under a batch token until it is saved.
fn handle_preview_csv(state: &mut AppState, actor: &Actor, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let text = match (req.params.get("csv").and_then(|v| v.as_str()), param_str(req, "path")) {
        (Some(csv), _) => csv.to_string(),
        (None, Some(path)) => match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                return err(
                    &req.id,
                    "io_failed",
                    e.to_string(),
                    Some(json!({ "path": path })),
                )
            }
        },
        (None, None) => return err(&req.id, "bad_params", "missing csv or path", None),
    };

    let batch = exchange::parse_import_csv(&actor.username, &text);
    if batch.drafts.is_empty() && batch.errors.is_empty() {
        return err(&req.id, "bad_params", "the file has no data rows", None);
    }
    let store = ticket_store(conn, &state.config, TicketKind::ImportBatch);
    let token = match store.create(&batch) {
        Ok(t) => t,
        Err(e) => return ticket_failed(req, e, "stage the import", import_view()),
    };

    tracing::info!(
        actor = %actor.username,
        valid = batch.drafts.len(),
        invalid = batch.errors.len(),
        "import staged"
    );
    let rows: Vec<serde_json::Value> = batch
        .drafts
        .iter()
        .map(|d| {
            let a = d.assessment();
            json!({
                "draft": d,
                "finalGrade": a.final_grade,
                "risk": a.risk,
            })
        })
        .collect();
    ok(
        &req.id,
        json!({
            "batchToken": token,
            "rows": rows,
            "errors": batch.errors,
            "validCount": batch.drafts.len(),
            "errorCount": batch.errors.len(),
        }),
    )
}

/// Saves every valid row of a staged batch in one transaction. Invalid rows
/// were reported at preview and are never written.
fn handle_save_import(state: &mut AppState, actor: &Actor, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let batch_token = match required_str(req, "batchToken") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let batch_store = ticket_store(conn, &state.config, TicketKind::ImportBatch);
    let batch: Option<ImportBatch> = match batch_store.lookup(&batch_token) {
        Ok(v) => v,
        Err(e) => return ticket_failed(req, e, "load the import", import_view()),
    };
    let Some(batch) = batch.filter(|b| b.owner == actor.username) else {
        return batch_expired(req);
    };
    if batch.drafts.is_empty() {
        return redirect(
            &req.id,
            import_view(),
            Some(Notice::info("Nothing to import: every row had errors.")),
        );
    }

    let token = match confirmation_gate(conn, &state.config, actor, req, true, || {
        Prompt::new(
            format!("Import {} record(s)?", batch.drafts.len()),
            import_view(),
        )
        .with_items(batch.drafts.iter().map(|d| d.name.clone()).collect())
    }) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let store = confirm_store(conn, &state.config);
    let saved = commit_with_retry(conn, &state.config.retry, |tx| {
        if !consume_confirmation(&store, tx, token.as_deref())? {
            return Ok(None);
        }
        if !batch_store.consume_in(tx, &batch_token)? {
            return Ok(None);
        }
        let mut ids = Vec::with_capacity(batch.drafts.len());
        for d in &batch.drafts {
            ids.push((records::insert(tx, &actor.username, d)?, d.name.clone()));
        }
        Ok(Some(ids))
    });
    let ids = match saved {
        Ok(Some(ids)) => ids,
        Ok(None) => return confirmation_expired(req),
        Err(e) => return commit_failed(req, &e, "save the import", import_view()),
    };

    tracing::info!(actor = %actor.username, imported = ids.len(), "import saved");
    let events: Vec<AuditEvent> = ids
        .iter()
        .map(|(id, name)| {
            AuditEvent::new(AuditAction::Create, id, format!("Imported record {name} via CSV"))
        })
        .collect();
    audit::record_all(conn, &state.config.retry, &actor.username, &events);
    let mut resp = redirect(
        &req.id,
        Destination::view(VIEW_RECORDS),
        Some(Notice::info(format!("Imported {} record(s).", ids.len()))),
    );
    resp["result"]["imported"] = json!(ids.len());
    resp
}

fn handle_export_csv(state: &mut AppState, actor: &Actor, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let scope = scope_for(actor, Intent::Read);
    let filter = RecordFilter::from_params(&req.params);
    let rows = match records::list(conn, &scope, &filter, None) {
        Ok(v) => v,
        Err(e) => return db_failed(req, &e),
    };
    let csv = exchange::export_csv(&rows);

    match param_str(req, "outPath") {
        Some(out_path) => {
            if let Err(e) = std::fs::write(out_path, csv.as_bytes()) {
                return err(
                    &req.id,
                    "io_failed",
                    e.to_string(),
                    Some(json!({ "path": out_path })),
                );
            }
            ok(
                &req.id,
                json!({ "path": out_path, "rowsExported": rows.len() }),
            )
        }
        None => ok(&req.id, json!({ "csv": csv, "rowsExported": rows.len() })),
    }
}

pub fn try_handle(state: &mut AppState, ctx: &RequestContext, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "exchange.previewCsv" => handle_preview_csv,
        "exchange.saveImport" => handle_save_import,
        "exchange.exportCsv" => handle_export_csv,
        _ => return None,
    };
    Some(guarded(state, ctx, req, Access::SignedIn, handler))
}
