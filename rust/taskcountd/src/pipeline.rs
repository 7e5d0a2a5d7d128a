use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::aggregate::{self, Report, ReportOptions};
use crate::matcher::{match_file, RosterIndex};
use crate::store::{self, CounterStore, MergeOutcome};
use crate::tables::{self, SkippableFileError};

pub const STORE_FILE: &str = "contador_tarefas.csv";
pub const REPORT_FILE: &str = "relatorio_final.csv";
/// Name the roster export is conventionally saved under next to task logs.
pub const ROSTER_FILE: &str = "alunos_fim.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Merged,
    Duplicate,
    Skipped,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Merged => "merged",
            FileStatus::Duplicate => "duplicate",
            FileStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutcome {
    pub source_name: String,
    pub status: FileStatus,
    pub fingerprint: Option<String>,
    pub skip_code: Option<String>,
    pub skip_reason: Option<String>,
    pub matched_students: Vec<String>,
    pub task_rows: usize,
    pub unkeyed_rows: usize,
    pub unmatched_rows: usize,
}

impl FileOutcome {
    fn skipped(source_name: &str, fingerprint: Option<String>, e: &SkippableFileError) -> Self {
        Self {
            source_name: source_name.to_string(),
            status: FileStatus::Skipped,
            fingerprint,
            skip_code: Some(e.code().to_string()),
            skip_reason: Some(e.to_string()),
            matched_students: Vec::new(),
            task_rows: 0,
            unkeyed_rows: 0,
            unmatched_rows: 0,
        }
    }
}

/// Folds one task file into the store, in memory.
///
/// Files already in the ledger come back as `Duplicate` without touching the
/// totals; files that fail schema validation come back as `Skipped`.
pub fn process_task_file(
    store: &mut CounterStore,
    roster: &RosterIndex,
    source_name: &str,
    bytes: &[u8],
) -> FileOutcome {
    let fp = store::fingerprint(bytes);

    let records = match tables::parse_task_log(bytes) {
        Ok(r) => r,
        Err(e) => {
            warn!(file = source_name, reason = %e, "skipping task file");
            return FileOutcome::skipped(source_name, Some(fp), &e);
        }
    };

    let m = match_file(roster, &records);
    let status = match store.merge_file(&fp, source_name, &m.contributions) {
        MergeOutcome::Merged { students } => {
            info!(
                file = source_name,
                students,
                rows = m.task_rows,
                unmatched = m.unmatched_rows,
                unkeyed = m.unkeyed_rows,
                "merged task file"
            );
            FileStatus::Merged
        }
        MergeOutcome::AlreadyMerged => {
            info!(file = source_name, fingerprint = %fp, "task file already merged, ignoring");
            FileStatus::Duplicate
        }
    };

    FileOutcome {
        source_name: source_name.to_string(),
        status,
        fingerprint: Some(fp),
        skip_code: None,
        skip_reason: None,
        matched_students: m.matched_students.into_iter().collect(),
        task_rows: m.task_rows,
        unkeyed_rows: m.unkeyed_rows,
        unmatched_rows: m.unmatched_rows,
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Runs a batch of task files against the store at `store_path`.
///
/// The store is written back after every merged file, so a crash part-way
/// leaves the files already processed recorded in both totals and ledger.
pub fn import_task_files(
    store_path: &Path,
    roster: &RosterIndex,
    paths: &[PathBuf],
) -> anyhow::Result<Vec<FileOutcome>> {
    let mut store = CounterStore::load(store_path)?;
    let mut outcomes = Vec::with_capacity(paths.len());

    for path in paths {
        let name = display_name(path);
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                let e = SkippableFileError::Unreadable(e.to_string());
                warn!(file = %path.display(), reason = %e, "skipping task file");
                outcomes.push(FileOutcome::skipped(&name, None, &e));
                continue;
            }
        };

        let outcome = process_task_file(&mut store, roster, &name, &bytes);
        if outcome.status == FileStatus::Merged {
            store.save(store_path)?;
        }
        outcomes.push(outcome);
    }

    if !store_path.exists() {
        store.save(store_path)?;
    }
    Ok(outcomes)
}

/// Task logs in `dir`: every `*.csv` except the roster, store and report
/// tables that may live alongside them. Sorted for a stable processing order.
pub fn task_files_in_dir(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let reserved = [ROSTER_FILE, STORE_FILE, REPORT_FILE];
    let mut out = Vec::new();
    for ent in std::fs::read_dir(dir)? {
        let ent = ent?;
        let p = ent.path();
        if !p.is_file() {
            continue;
        }
        let Some(name) = p.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let lower = name.to_ascii_lowercase();
        if !lower.ends_with(".csv") {
            continue;
        }
        if reserved.iter().any(|r| r.eq_ignore_ascii_case(&lower)) {
            debug!(file = name, "not a task log, leaving out of directory import");
            continue;
        }
        out.push(p);
    }
    out.sort();
    Ok(out)
}

pub fn build_report(
    store_path: &Path,
    report_path: &Path,
    opts: &ReportOptions,
) -> anyhow::Result<Report> {
    let store = CounterStore::load(store_path)?;
    let report = aggregate::build_report(&store, opts);
    aggregate::write_report_csv(report_path, &report.rows)?;
    info!(
        students = report.rows.len(),
        outliers_removed = report.summary.outliers_removed,
        "report written to {}",
        report_path.display()
    );
    Ok(report)
}
