use crate::db::{self, ImportRun};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{db_conn, optional_usize, path_list, required_str, workspace_dir};
use crate::ipc::types::{AppState, Request};
use crate::matcher::RosterIndex;
use crate::pipeline::{self, FileOutcome};
use crate::store::CounterStore;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::warn;

const DEFAULT_RUNS_LIMIT: usize = 100;

fn run_files(state: &mut AppState, paths: Vec<PathBuf>) -> Result<serde_json::Value, HandlerErr> {
    let workspace = workspace_dir(state)?.to_path_buf();
    let conn = db_conn(state)?;

    let roster =
        db::roster_load(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if roster.is_empty() {
        return Err(HandlerErr::new(
            "no_roster",
            "import a roster before task files",
        ));
    }
    let index = RosterIndex::new(&roster);

    let store_path = workspace.join(pipeline::STORE_FILE);
    let outcomes = pipeline::import_task_files(&store_path, &index, &paths).map_err(|e| {
        HandlerErr::new("store_failed", format!("{e:#}"))
            .with_details(json!({ "path": store_path.to_string_lossy() }))
    })?;

    let batch_id = uuid::Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    for o in &outcomes {
        let run = import_run(&batch_id, &created_at, o);
        if let Err(e) = db::run_insert(conn, &run) {
            // History is diagnostic only; the store already holds the result.
            warn!(file = o.source_name.as_str(), error = %e, "failed to record import run");
        }
    }

    let covered: BTreeSet<&str> = outcomes
        .iter()
        .filter(|o| o.status == pipeline::FileStatus::Merged)
        .flat_map(|o| o.matched_students.iter().map(|s| s.as_str()))
        .collect();
    let count = |status: pipeline::FileStatus| outcomes.iter().filter(|o| o.status == status).count();

    Ok(json!({
        "batchId": batch_id,
        "merged": count(pipeline::FileStatus::Merged),
        "duplicates": count(pipeline::FileStatus::Duplicate),
        "skipped": count(pipeline::FileStatus::Skipped),
        "coveredStudents": covered,
        "files": outcomes,
    }))
}

fn import_run(batch_id: &str, created_at: &str, o: &FileOutcome) -> ImportRun {
    ImportRun {
        id: uuid::Uuid::new_v4().to_string(),
        batch_id: batch_id.to_string(),
        source_name: o.source_name.clone(),
        fingerprint: o.fingerprint.clone(),
        status: o.status.as_str().to_string(),
        skip_reason: o.skip_reason.clone(),
        matched_students: o.matched_students.len() as i64,
        task_rows: o.task_rows as i64,
        unkeyed_rows: o.unkeyed_rows as i64,
        unmatched_rows: o.unmatched_rows as i64,
        created_at: created_at.to_string(),
    }
}

fn tasks_import(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let paths = path_list(req, "paths")?;
    run_files(state, paths)
}

fn tasks_import_directory(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let dir = PathBuf::from(required_str(req, "path")?);
    let paths = pipeline::task_files_in_dir(&dir).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string())
            .with_details(json!({ "path": dir.to_string_lossy() }))
    })?;
    run_files(state, paths)
}

fn counter_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store_path = workspace_dir(state)?.join(pipeline::STORE_FILE);
    let store = CounterStore::load(&store_path)
        .map_err(|e| HandlerErr::new("store_load_failed", format!("{e:#}")))?;
    let entries: Vec<serde_json::Value> = store
        .entries()
        .map(|e| {
            json!({
                "studentName": e.student_name,
                "tasksCompleted": e.tasks_completed,
                "absolutePoints": e.absolute_points,
                "totalDuration": e.total_duration,
            })
        })
        .collect();
    Ok(json!({
        "entries": entries,
        "ledger": store.ledger().collect::<Vec<_>>(),
    }))
}

fn runs_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let limit = optional_usize(req, "limit")?.unwrap_or(DEFAULT_RUNS_LIMIT);
    let conn = db_conn(state)?;
    let runs = db::runs_list(conn, limit)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "runs": runs }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "tasks.import" => tasks_import(state, req),
        "tasks.importDirectory" => tasks_import_directory(state, req),
        "counter.list" => counter_list(state, req),
        "runs.list" => runs_list(state, req),
        _ => return None,
    };
    Some(match res {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
