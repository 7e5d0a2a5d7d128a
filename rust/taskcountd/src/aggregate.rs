use serde::Serialize;
use std::cmp::Ordering;
use std::path::Path;

use crate::duration::Duration;
use crate::store::{CounterEntry, CounterStore, STORE_COLUMNS};
use crate::tables;

/// Every task is graded out of 2 points. Part of the report format, not a
/// setting.
pub const POINTS_PER_TASK: f64 = 2.0;

pub const DEFAULT_OUTLIER_Z: f64 = 3.0;
pub const DEFAULT_TOP_N: usize = 5;

pub const COL_REPORT_AVG_PERCENT: &str = "Média de Acertos";
pub const COL_REPORT_AVG_TIME: &str = "Tempo Médio por Tarefa";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub student_name: String,
    pub tasks_completed: u64,
    pub absolute_points: f64,
    pub total_duration: Duration,
    pub average_percentage: String,
    pub average_duration_per_task: Duration,
    #[serde(skip)]
    percentage_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub mean_duration_per_task_excluding_outliers: Duration,
    pub mean_average_percentage: f64,
    pub mean_tasks_completed: f64,
    pub student_count: usize,
    pub outliers_removed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RankMetric {
    AbsolutePoints,
    AveragePercentage,
    TasksCompleted,
    TotalTime,
}

impl RankMetric {
    pub const ALL: [RankMetric; 4] = [
        RankMetric::AbsolutePoints,
        RankMetric::AveragePercentage,
        RankMetric::TasksCompleted,
        RankMetric::TotalTime,
    ];

    fn value(self, row: &ReportRow) -> f64 {
        match self {
            RankMetric::AbsolutePoints => row.absolute_points,
            RankMetric::AveragePercentage => row.percentage_value.unwrap_or(0.0),
            RankMetric::TasksCompleted => row.tasks_completed as f64,
            RankMetric::TotalTime => row.total_duration.as_secs() as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ranking {
    pub metric: RankMetric,
    pub students: Vec<ReportRow>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportOptions {
    pub outlier_z: f64,
    pub top_n: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            outlier_z: DEFAULT_OUTLIER_Z,
            top_n: DEFAULT_TOP_N,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub rows: Vec<ReportRow>,
    pub summary: ClassSummary,
    pub rankings: Vec<Ranking>,
}

/// `points / (tasks * 2) * 100`, unrounded. `None` for an entry with no tasks.
pub fn percentage_value(entry: &CounterEntry) -> Option<f64> {
    if entry.tasks_completed == 0 {
        return None;
    }
    Some(entry.absolute_points / (entry.tasks_completed as f64 * POINTS_PER_TASK) * 100.0)
}

/// Rounds half-to-even at two decimals and prints the shortest form with at
/// least one fractional digit: 100 -> "100.0%", 66.6666 -> "66.67%".
pub fn format_percentage(value: f64) -> String {
    let rounded = (value * 100.0).round_ties_even() / 100.0;
    let mut s = format!("{}", rounded);
    if rounded.is_finite() && !s.contains('.') {
        s.push_str(".0");
    }
    s.push('%');
    s
}

pub fn average_percentage(entry: &CounterEntry) -> String {
    format_percentage(percentage_value(entry).unwrap_or(0.0))
}

pub fn average_duration_per_task(entry: &CounterEntry) -> Duration {
    entry.total_duration.div_tasks(entry.tasks_completed)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample (n - 1) standard deviation.
fn sample_std(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Keeps values strictly within `z_threshold` sample standard deviations of
/// the mean. Single values and constant samples are kept whole.
pub fn remove_outliers(values: &[f64], z_threshold: f64) -> Vec<f64> {
    let Some(m) = mean(values) else {
        return Vec::new();
    };
    let std = sample_std(values, m);
    if values.len() < 2 || std == 0.0 || !std.is_finite() {
        return values.to_vec();
    }
    let lo = m - z_threshold * std;
    let hi = m + z_threshold * std;
    values
        .iter()
        .copied()
        .filter(|v| *v > lo && *v < hi)
        .collect()
}

pub fn report_row(entry: &CounterEntry) -> ReportRow {
    let pct = percentage_value(entry);
    ReportRow {
        student_name: entry.student_name.clone(),
        tasks_completed: entry.tasks_completed,
        absolute_points: entry.absolute_points,
        total_duration: entry.total_duration,
        average_percentage: format_percentage(pct.unwrap_or(0.0)),
        average_duration_per_task: average_duration_per_task(entry),
        percentage_value: pct,
    }
}

/// One row per store entry, ordinal by name.
pub fn report_rows(store: &CounterStore) -> Vec<ReportRow> {
    let mut rows: Vec<ReportRow> = store.entries().map(report_row).collect();
    rows.sort_by(|a, b| a.student_name.cmp(&b.student_name));
    rows
}

/// Percentage and task-count means use every student as-is; the time benchmark
/// drops outliers first so a few very slow or very fast students do not drag
/// it. Students with no tasks have no per-task figures and stay out of the
/// first two means.
pub fn class_summary(rows: &[ReportRow], z_threshold: f64) -> ClassSummary {
    let with_tasks: Vec<&ReportRow> = rows.iter().filter(|r| r.tasks_completed > 0).collect();

    let percentages: Vec<f64> = with_tasks.iter().filter_map(|r| r.percentage_value).collect();
    let per_task_secs: Vec<f64> = with_tasks
        .iter()
        .map(|r| r.average_duration_per_task.as_secs() as f64)
        .collect();
    let kept = remove_outliers(&per_task_secs, z_threshold);

    let tasks: Vec<f64> = rows.iter().map(|r| r.tasks_completed as f64).collect();

    ClassSummary {
        mean_duration_per_task_excluding_outliers: mean(&kept)
            .map(|s| Duration::from_secs(s as u64))
            .unwrap_or(Duration::ZERO),
        mean_average_percentage: mean(&percentages).unwrap_or(0.0),
        mean_tasks_completed: mean(&tasks).unwrap_or(0.0),
        student_count: rows.len(),
        outliers_removed: per_task_secs.len() - kept.len(),
    }
}

/// Highest `n` rows by `metric`; ties keep name order.
pub fn top_students(rows: &[ReportRow], metric: RankMetric, n: usize) -> Vec<ReportRow> {
    let mut sorted: Vec<&ReportRow> = rows.iter().collect();
    sorted.sort_by(|a, b| {
        metric
            .value(b)
            .partial_cmp(&metric.value(a))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.student_name.cmp(&b.student_name))
    });
    sorted.into_iter().take(n).cloned().collect()
}

pub fn build_report(store: &CounterStore, opts: &ReportOptions) -> Report {
    let rows = report_rows(store);
    let summary = class_summary(&rows, opts.outlier_z);
    let rankings = RankMetric::ALL
        .iter()
        .map(|&metric| Ranking {
            metric,
            students: top_students(&rows, metric, opts.top_n),
        })
        .collect();
    Report {
        rows,
        summary,
        rankings,
    }
}

pub fn write_report_csv(path: &Path, rows: &[ReportRow]) -> anyhow::Result<()> {
    let mut headers: Vec<&str> = STORE_COLUMNS.to_vec();
    headers.push(COL_REPORT_AVG_PERCENT);
    headers.push(COL_REPORT_AVG_TIME);
    let out: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            vec![
                r.student_name.clone(),
                r.tasks_completed.to_string(),
                tables::format_number(r.absolute_points),
                r.total_duration.format(),
                r.average_percentage.clone(),
                r.average_duration_per_task.format(),
            ]
        })
        .collect();
    tables::write_table(path, &headers, &out)
}
