//! Log setup for the sidecar.
//!
//! Stdout carries the IPC responses, so every log line goes to stderr.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter directives, e.g. `taskcountd=debug`. Falls back to `RUST_LOG`.
pub const LOG_ENV: &str = "TASKCOUNTD_LOG";
/// Set to `1` for newline-delimited JSON log lines.
pub const LOG_JSON_ENV: &str = "TASKCOUNTD_LOG_JSON";

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_JSON_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
            .try_init()
            .ok();
    }
}
