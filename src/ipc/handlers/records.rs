use std::collections::BTreeMap;

use crate::audit::{self, AuditAction, AuditEvent};
use crate::commit::commit_with_retry;
use crate::confirm::{self, Prompt, CONFIRMED_PARAM};
use crate::grading::RiskTier;
use crate::ipc::error::{ok, redirect, validation_failed, Notice, NOTICE_DENIED};
use crate::ipc::guard::{guarded, Access, Handler};
use crate::ipc::helpers::{
    commit_failed, confirm_store, confirmation_expired, confirmation_gate, consume_confirmation,
    db_failed, no_workspace, not_found, required_str,
};
use crate::ipc::types::{AppState, Request, RequestContext};
use crate::nav::{Destination, VIEW_RECORDS, VIEW_SECTIONS};
use crate::records::{self, CategoryColumn, Record, RecordDraft};
use crate::visibility::{
    authorize, category_label, scope_for, where_clause, Actor, Category, Intent, RecordFilter,
};
use rusqlite::params_from_iter;
use serde_json::json;

fn records_view() -> Destination {
    Destination::view(VIEW_RECORDS)
}

fn denied(req: &Request, message: String, back: Destination) -> serde_json::Value {
    redirect(&req.id, back, Some(Notice::coded(NOTICE_DENIED, message)))
}

fn page_param(req: &Request) -> usize {
    match req.params.get("page") {
        Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(1) as usize,
        Some(serde_json::Value::String(s)) => s.trim().parse::<usize>().unwrap_or(1),
        _ => 1,
    }
    .max(1)
}

/// Loads a record and checks `intent` against it. The error is the
/// response to send.
fn load_authorized(
    conn: &rusqlite::Connection,
    actor: &Actor,
    req: &Request,
    intent: Intent,
) -> Result<Record, serde_json::Value> {
    let record_id = required_str(req, "recordId")?;
    let record = match records::load(conn, &record_id) {
        Ok(Some(r)) => r,
        // A confirmed replay whose target is already gone was consumed by an earlier replay.
        Ok(None) if confirm::flag(&req.params, CONFIRMED_PARAM) => {
            return Err(confirmation_expired(req))
        }
        Ok(None) => return Err(not_found(req, "record")),
        Err(e) => return Err(db_failed(req, &e)),
    };
    if let Err(d) = authorize(actor, intent, &record.owner) {
        tracing::info!(actor = %actor.username, record_id = %record.id, %intent, "denied");
        return Err(denied(req, d.to_string(), records_view()));
    }
    Ok(record)
}

fn handle_records_list(state: &mut AppState, actor: &Actor, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let scope = scope_for(actor, Intent::Read);
    let filter = RecordFilter::from_params(&req.params);
    let page_size = state.config.page_size.max(1);

    let total = match records::count(conn, &scope, &filter) {
        Ok(v) => v,
        Err(e) => return db_failed(req, &e),
    };
    let page_count = total.div_ceil(page_size).max(1);
    let page = page_param(req).min(page_count);
    let rows = match records::list(conn, &scope, &filter, Some(((page - 1) * page_size, page_size))) {
        Ok(v) => v,
        Err(e) => return db_failed(req, &e),
    };
    let sections = match records::category_options(conn, &scope, CategoryColumn::Section) {
        Ok(v) => v,
        Err(e) => return db_failed(req, &e),
    };
    let subjects = match records::category_options(conn, &scope, CategoryColumn::Subject) {
        Ok(v) => v,
        Err(e) => return db_failed(req, &e),
    };

    ok(
        &req.id,
        json!({
            "records": rows,
            "total": total,
            "page": page,
            "pageCount": page_count,
            "pageSize": page_size,
            "sectionsList": sections,
            "subjectsList": subjects,
            "riskList": [RiskTier::High.label(), RiskTier::Low.label()],
        }),
    )
}

fn handle_records_sections(state: &mut AppState, actor: &Actor, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let scope = scope_for(actor, Intent::Read);
    let filter = RecordFilter::from_params(&req.params);
    let rows = match records::list(conn, &scope, &filter, None) {
        Ok(v) => v,
        Err(e) => return db_failed(req, &e),
    };

    let mut grouped: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    for r in rows {
        grouped.entry(r.section_label()).or_default().push(r);
    }
    let sections: Vec<serde_json::Value> = grouped
        .into_iter()
        .map(|(section, records)| {
            let at_risk = records
                .iter()
                .filter(|r| r.risk == RiskTier::High.label())
                .count();
            json!({
                "section": section,
                "count": records.len(),
                "atRisk": at_risk,
                "records": records,
            })
        })
        .collect();
    ok(&req.id, json!({ "sections": sections }))
}

fn handle_records_get(state: &mut AppState, actor: &Actor, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    match load_authorized(conn, actor, req, Intent::Read) {
        Ok(record) => {
            let can_edit = authorize(actor, Intent::Edit, &record.owner).is_ok();
            let can_delete = authorize(actor, Intent::Delete, &record.owner).is_ok();
            ok(
                &req.id,
                json!({
                    "record": record,
                    "canEdit": can_edit,
                    "canDelete": can_delete,
                }),
            )
        }
        Err(resp) => resp,
    }
}

fn handle_records_create(state: &mut AppState, actor: &Actor, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let draft = match RecordDraft::from_params(&req.params) {
        Ok(d) => d,
        Err(e) => return validation_failed(&req.id, &e.field, e.to_string()),
    };
    let token = match confirmation_gate(conn, &state.config, actor, req, false, || {
        Prompt::new(format!("Add record {}?", draft.name), records_view())
            .with_items(vec![draft.name.clone()])
    }) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let store = confirm_store(conn, &state.config);
    let created = commit_with_retry(conn, &state.config.retry, |tx| {
        if !consume_confirmation(&store, tx, token.as_deref())? {
            return Ok(None);
        }
        records::insert(tx, &actor.username, &draft).map(Some)
    });
    let record_id = match created {
        Ok(Some(id)) => id,
        Ok(None) => return confirmation_expired(req),
        Err(e) => return commit_failed(req, &e, "add the record", records_view()),
    };

    tracing::info!(actor = %actor.username, record_id = %record_id, "record created");
    audit::record(
        conn,
        &state.config.retry,
        &actor.username,
        AuditAction::Create,
        &record_id,
        &format!("Created record {}", draft.name),
    );
    let mut resp = redirect(&req.id, records_view(), Some(Notice::info("Record added.")));
    resp["result"]["recordId"] = json!(record_id);
    resp
}

fn handle_records_update(state: &mut AppState, actor: &Actor, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let record = match load_authorized(conn, actor, req, Intent::Edit) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let draft = match RecordDraft::from_params(&req.params) {
        Ok(d) => d,
        Err(e) => return validation_failed(&req.id, &e.field, e.to_string()),
    };
    let token = match confirmation_gate(conn, &state.config, actor, req, false, || {
        Prompt::new(format!("Save changes to record {}?", record.name), records_view())
            .with_items(vec![draft.name.clone()])
    }) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let store = confirm_store(conn, &state.config);
    let updated = commit_with_retry(conn, &state.config.retry, |tx| {
        if !consume_confirmation(&store, tx, token.as_deref())? {
            return Ok(None);
        }
        records::update(tx, &record.id, &draft).map(Some)
    });
    match updated {
        Ok(Some(0)) => return not_found(req, "record"),
        Ok(Some(_)) => {}
        Ok(None) => return confirmation_expired(req),
        Err(e) => return commit_failed(req, &e, "update the record", records_view()),
    }

    tracing::info!(actor = %actor.username, record_id = %record.id, "record updated");
    audit::record(
        conn,
        &state.config.retry,
        &actor.username,
        AuditAction::Update,
        &record.id,
        &format!("Updated record {}: {}", draft.name, draft.summary()),
    );
    redirect(&req.id, records_view(), Some(Notice::info("Record updated.")))
}

fn handle_records_delete(state: &mut AppState, actor: &Actor, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let record = match load_authorized(conn, actor, req, Intent::Delete) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let token = match confirmation_gate(conn, &state.config, actor, req, true, || {
        Prompt::new(
            format!("Delete record {}? This cannot be undone.", record.name),
            records_view(),
        )
        .with_items(vec![record.name.clone()])
    }) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let store = confirm_store(conn, &state.config);
    let deleted = commit_with_retry(conn, &state.config.retry, |tx| {
        if !consume_confirmation(&store, tx, token.as_deref())? {
            return Ok(None);
        }
        records::delete(tx, &record.id).map(Some)
    });
    match deleted {
        Ok(Some(0)) => return not_found(req, "record"),
        Ok(Some(_)) => {}
        Ok(None) => return confirmation_expired(req),
        Err(e) => return commit_failed(req, &e, "delete the record", records_view()),
    }

    tracing::info!(actor = %actor.username, record_id = %record.id, "record deleted");
    audit::record(
        conn,
        &state.config.retry,
        &actor.username,
        AuditAction::Delete,
        &record.id,
        &format!("Deleted record {}", record.name),
    );
    redirect(&req.id, records_view(), Some(Notice::info("Record deleted.")))
}

/// Bulk delete of every record in a section within the actor's delete scope.
/// The matching set is re-read inside the write transaction.
fn handle_records_delete_section(
    state: &mut AppState,
    actor: &Actor,
    req: &Request,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let section = match required_str(req, "section") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let label = category_label(Some(section.as_str()));
    let scope = scope_for(actor, Intent::Delete);
    let filter = RecordFilter {
        section: match Category::parse(Some(section.as_str())) {
            Category::All => Category::Named(section.clone()),
            c => c,
        },
        ..RecordFilter::default()
    };
    let matching = match records::list(conn, &scope, &filter, None) {
        Ok(v) => v,
        Err(e) => return db_failed(req, &e),
    };
    if matching.is_empty() {
        return redirect(
            &req.id,
            Destination::view(VIEW_SECTIONS),
            Some(Notice::info(format!("No records to delete in {label}."))),
        );
    }
    let token = match confirmation_gate(conn, &state.config, actor, req, true, || {
        Prompt::new(
            format!(
                "Delete all {} record(s) in {label}? This cannot be undone.",
                matching.len()
            ),
            Destination::view(VIEW_SECTIONS),
        )
        .with_items(matching.iter().map(|r| r.name.clone()).collect())
    }) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let store = confirm_store(conn, &state.config);
    let (clause, params) = where_clause(&scope, &filter);
    let deleted = commit_with_retry(conn, &state.config.retry, |tx| {
        if !consume_confirmation(&store, tx, token.as_deref())? {
            return Ok(None);
        }
        let mut stmt = tx.prepare(&format!("SELECT id, name FROM records {clause}"))?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (id, _) in &rows {
            records::delete(tx, id)?;
        }
        Ok(Some(rows))
    });
    let rows = match deleted {
        Ok(Some(rows)) => rows,
        Ok(None) => return confirmation_expired(req),
        Err(e) => return commit_failed(req, &e, "delete the section", Destination::view(VIEW_SECTIONS)),
    };

    tracing::info!(actor = %actor.username, section = %label, deleted = rows.len(), "section deleted");
    let events: Vec<AuditEvent> = rows
        .iter()
        .map(|(id, name)| {
            AuditEvent::new(
                AuditAction::Delete,
                id,
                format!("Deleted record {name} (section {label})"),
            )
        })
        .collect();
    audit::record_all(conn, &state.config.retry, &actor.username, &events);
    let mut resp = redirect(
        &req.id,
        Destination::view(VIEW_SECTIONS),
        Some(Notice::info(format!(
            "Deleted {} record(s) from {label}.",
            rows.len()
        ))),
    );
    resp["result"]["deleted"] = json!(rows.len());
    resp
}

pub fn try_handle(state: &mut AppState, ctx: &RequestContext, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "records.list" => handle_records_list,
        "records.sections" => handle_records_sections,
        "records.get" => handle_records_get,
        "records.create" => handle_records_create,
        "records.update" => handle_records_update,
        "records.delete" => handle_records_delete,
        "records.deleteSection" => handle_records_delete_section,
        _ => return None,
    };
    Some(guarded(state, ctx, req, Access::SignedIn, handler))
}
