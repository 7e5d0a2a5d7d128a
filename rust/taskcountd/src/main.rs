mod aggregate;
mod backup;
mod db;
mod duration;
mod identity;
mod ipc;
mod matcher;
mod pipeline;
mod store;
mod tables;
mod telemetry;

use std::io::{self, BufRead, Write};
use tracing::{debug, info, warn};

fn main() {
    telemetry::init_tracing();
    info!(version = env!("CARGO_PKG_VERSION"), "taskcountd ready");

    let mut state = ipc::AppState::default();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "request line is not valid JSON");
                // Can't reply without id.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        debug!(id = req.id.as_str(), method = req.method.as_str(), "request");
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
