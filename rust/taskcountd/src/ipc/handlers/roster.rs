use crate::db;
use crate::identity::canonical_key_from_roster;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::tables;
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

fn roster_import(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let path = required_str(req, "path")?;
    let load = tables::read_roster(&PathBuf::from(&path)).map_err(|e| {
        HandlerErr::new("roster_read_failed", e.to_string())
            .with_details(json!({ "path": path, "reason": e.code() }))
    })?;
    for (line, reason) in &load.rejected {
        warn!(line, reason = reason.as_str(), "roster row rejected");
    }

    let conn = state
        .db
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let imported = db::roster_replace(conn, &load.entries, Some(&path))
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    info!(imported, rejected = load.rejected.len(), "roster imported");

    let rejected: Vec<serde_json::Value> = load
        .rejected
        .iter()
        .map(|(line, reason)| json!({ "line": line, "message": reason }))
        .collect();
    Ok(json!({
        "imported": imported,
        "rejected": rejected,
    }))
}

fn roster_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let entries =
        db::roster_load(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let students: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| {
            json!({
                "studentName": e.student_name,
                "registrationNumber": e.registration_number,
                "checkDigit": e.check_digit,
                "canonicalKey": canonical_key_from_roster(e.registration_number, &e.check_digit),
            })
        })
        .collect();
    Ok(json!({ "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "roster.import" => roster_import(state, req),
        "roster.list" => roster_list(state, req),
        _ => return None,
    };
    Some(match res {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
