use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::handlers::setup::load_report_options;
use crate::ipc::helpers::{db_conn, optional_f64, optional_usize, workspace_dir};
use crate::ipc::types::{AppState, Request};
use crate::pipeline;
use serde_json::json;

fn report_build(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let workspace = workspace_dir(state)?.to_path_buf();
    let mut opts = load_report_options(db_conn(state)?)?;
    if let Some(z) = optional_f64(req, "outlierZ")? {
        if z <= 0.0 {
            return Err(HandlerErr::new("bad_params", "outlierZ must be positive"));
        }
        opts.outlier_z = z;
    }
    if let Some(n) = optional_usize(req, "topN")? {
        opts.top_n = n;
    }

    let store_path = workspace.join(pipeline::STORE_FILE);
    let report_path = workspace.join(pipeline::REPORT_FILE);
    let report = pipeline::build_report(&store_path, &report_path, &opts)
        .map_err(|e| HandlerErr::new("report_failed", format!("{e:#}")))?;

    Ok(json!({
        "reportPath": report_path.to_string_lossy(),
        "rows": report.rows,
        "summary": report.summary,
        "summaryText": {
            "meanDurationPerTask": report.summary.mean_duration_per_task_excluding_outliers.format(),
            "meanAveragePercentage": format!("{:.2}", report.summary.mean_average_percentage),
            "meanTasksCompleted": format!("{:.2}", report.summary.mean_tasks_completed),
        },
        "rankings": report.rankings,
        "options": { "outlierZ": opts.outlier_z, "topN": opts.top_n },
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "report.build" => report_build(state, req),
        _ => return None,
    };
    Some(match res {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
