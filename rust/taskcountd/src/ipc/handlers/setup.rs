use crate::aggregate::ReportOptions;
use crate::db;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{db_conn, optional_f64, optional_usize};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

const KEY_OUTLIER_Z: &str = "report.outlierZ";
const KEY_TOP_N: &str = "report.topN";

/// Workspace report settings, falling back to the built-in defaults for keys
/// never saved.
pub fn load_report_options(conn: &Connection) -> Result<ReportOptions, HandlerErr> {
    let mut opts = ReportOptions::default();
    let read = |key: &str| {
        db::settings_get_json(conn, key)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
    };
    if let Some(z) = read(KEY_OUTLIER_Z)?.and_then(|v| v.as_f64()) {
        opts.outlier_z = z;
    }
    if let Some(n) = read(KEY_TOP_N)?.and_then(|v| v.as_u64()) {
        opts.top_n = n as usize;
    }
    Ok(opts)
}

fn options_json(opts: &ReportOptions) -> serde_json::Value {
    json!({
        "outlierZ": opts.outlier_z,
        "topN": opts.top_n,
    })
}

fn settings_get(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    Ok(options_json(&load_report_options(conn)?))
}

fn settings_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let outlier_z = optional_f64(req, "outlierZ")?;
    let top_n = optional_usize(req, "topN")?;
    if let Some(z) = outlier_z {
        if z <= 0.0 {
            return Err(HandlerErr::new("bad_params", "outlierZ must be positive"));
        }
    }

    let conn = db_conn(state)?;
    let write = |key: &str, value: serde_json::Value| {
        db::settings_set_json(conn, key, &value)
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))
    };
    if let Some(z) = outlier_z {
        write(KEY_OUTLIER_Z, json!(z))?;
    }
    if let Some(n) = top_n {
        write(KEY_TOP_N, json!(n))?;
    }
    Ok(options_json(&load_report_options(conn)?))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "settings.get" => settings_get(state, req),
        "settings.update" => settings_update(state, req),
        _ => return None,
    };
    Some(match res {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
