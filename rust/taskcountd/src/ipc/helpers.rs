use rusqlite::Connection;
use std::path::{Path, PathBuf};

use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};

pub fn required_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(HandlerErr::new("bad_params", format!("missing {}", key))),
    }
}

pub fn optional_f64(req: &Request, key: &str) -> Result<Option<f64>, HandlerErr> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_f64()
            .filter(|f| f.is_finite())
            .map(Some)
            .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be a number", key))),
    }
}

pub fn optional_usize(req: &Request, key: &str) -> Result<Option<usize>, HandlerErr> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_u64().map(|n| Some(n as usize)).ok_or_else(|| {
            HandlerErr::new(
                "bad_params",
                format!("{} must be a non-negative integer", key),
            )
        }),
    }
}

pub fn db_conn<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn workspace_dir(state: &AppState) -> Result<&Path, HandlerErr> {
    state
        .workspace
        .as_deref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn path_list(req: &Request, key: &str) -> Result<Vec<PathBuf>, HandlerErr> {
    let Some(arr) = req.params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new(
            "bad_params",
            format!("{} must be an array of paths", key),
        ));
    };
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(s) = v.as_str().filter(|s| !s.trim().is_empty()) else {
            return Err(HandlerErr::new(
                "bad_params",
                format!("{} entries must be non-empty strings", key),
            ));
        };
        out.push(PathBuf::from(s.trim()));
    }
    Ok(out)
}
