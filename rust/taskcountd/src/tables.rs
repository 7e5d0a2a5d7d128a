use anyhow::Context;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::duration::Duration;

pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub const COL_TASK_LABEL: &str = "Aluno";
pub const COL_TASK_SCORE: &str = "Nota";
pub const COL_TASK_DURATION: &str = "Duração";

pub const COL_ROSTER_NAME: &str = "Nome do Aluno";
pub const COL_ROSTER_RA: &str = "RA";
pub const COL_ROSTER_CHECK: &str = "Dig. RA";

/// Reasons a whole input file is left out of a run.
///
/// None of these abort the pipeline; the file contributes nothing and the
/// next one is processed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkippableFileError {
    #[error("file could not be read: {0}")]
    Unreadable(String),
    #[error("file has no data rows")]
    Empty,
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

impl SkippableFileError {
    pub fn code(&self) -> &'static str {
        match self {
            SkippableFileError::Unreadable(_) => "unreadable",
            SkippableFileError::Empty => "empty",
            SkippableFileError::MissingColumns(_) => "missing_columns",
        }
    }
}

/// A CSV table with trimmed headers and lossily decoded cells.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn require(&self, names: &[&str]) -> Result<Vec<usize>, SkippableFileError> {
        let mut idx = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match self.column(name) {
                Some(i) => idx.push(i),
                None => missing.push(name.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(SkippableFileError::MissingColumns(missing));
        }
        Ok(idx)
    }
}

fn cell<'a>(row: &'a [String], idx: usize) -> &'a str {
    row.get(idx).map(|s| s.as_str()).unwrap_or("")
}

pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

/// Parses CSV bytes, BOM optional. Blank input is `Empty`, not an error of the
/// reader.
pub fn parse_table(bytes: &[u8]) -> Result<Table, SkippableFileError> {
    let body = strip_bom(bytes);
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(SkippableFileError::Empty);
    }

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body);

    let headers: Vec<String> = rdr
        .byte_headers()
        .map_err(|e| SkippableFileError::Unreadable(e.to_string()))?
        .iter()
        .map(|h| String::from_utf8_lossy(h).trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for rec in rdr.byte_records() {
        let rec = rec.map_err(|e| SkippableFileError::Unreadable(e.to_string()))?;
        if rec.iter().all(|f| f.iter().all(|b| b.is_ascii_whitespace())) {
            continue;
        }
        rows.push(
            rec.iter()
                .map(|f| String::from_utf8_lossy(f).to_string())
                .collect(),
        );
    }

    Ok(Table { headers, rows })
}

pub fn read_table(path: &Path) -> Result<Table, SkippableFileError> {
    let bytes =
        std::fs::read(path).map_err(|e| SkippableFileError::Unreadable(e.to_string()))?;
    parse_table(&bytes)
}

/// Writes a BOM-prefixed UTF-8 CSV through a temp file so readers never see a
/// half-written table.
pub fn write_table(path: &Path, headers: &[&str], rows: &[Vec<String>]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
    }

    let mut buf: Vec<u8> = UTF8_BOM.to_vec();
    {
        let mut wtr = csv::Writer::from_writer(&mut buf);
        wtr.write_record(headers)
            .context("failed to write header row")?;
        for row in rows {
            wtr.write_record(row).context("failed to write row")?;
        }
        wtr.flush().context("failed to flush csv writer")?;
    }

    let tmp = path.with_extension("csv.writing");
    std::fs::write(&tmp, &buf)
        .with_context(|| format!("failed to write {}", tmp.to_string_lossy()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move table into {}", path.to_string_lossy()))?;
    Ok(())
}

/// Numbers as spreadsheets export them: "2", "1.5", "1,5".
pub fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    t.parse::<f64>()
        .ok()
        .or_else(|| t.replace(',', ".").parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Shortest text that reads back to the same value; integral values carry no
/// fraction.
pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub raw_student_label: Option<String>,
    pub score: f64,
    pub duration: Duration,
}

/// Validates the task-log schema once and returns typed rows.
pub fn task_records(table: &Table) -> Result<Vec<TaskRecord>, SkippableFileError> {
    let idx = table.require(&[COL_TASK_LABEL, COL_TASK_SCORE, COL_TASK_DURATION])?;
    if table.rows.is_empty() {
        return Err(SkippableFileError::Empty);
    }
    let (label_i, score_i, dur_i) = (idx[0], idx[1], idx[2]);

    Ok(table
        .rows
        .iter()
        .map(|row| {
            let label = cell(row, label_i);
            TaskRecord {
                raw_student_label: if label.trim().is_empty() {
                    None
                } else {
                    Some(label.to_string())
                },
                score: parse_number(cell(row, score_i)).unwrap_or(0.0),
                duration: Duration::parse(cell(row, dur_i)),
            }
        })
        .collect())
}

pub fn parse_task_log(bytes: &[u8]) -> Result<Vec<TaskRecord>, SkippableFileError> {
    task_records(&parse_table(bytes)?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub student_name: String,
    pub registration_number: u64,
    pub check_digit: String,
}

#[derive(Debug, Clone, Default)]
pub struct RosterLoad {
    pub entries: Vec<RosterEntry>,
    /// (1-based line, reason) for rows that could not become entries.
    pub rejected: Vec<(usize, String)>,
}

/// RAs must fit the workspace db's signed 64-bit column.
fn parse_registration_number(s: &str) -> Option<u64> {
    let t = s.trim();
    if let Ok(n) = t.parse::<u64>() {
        return i64::try_from(n).is_ok().then_some(n);
    }
    // Spreadsheet exports sometimes carry integer columns as "123456789.0".
    let f = t.parse::<f64>().ok()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f < 1e18 {
        Some(f as u64)
    } else {
        None
    }
}

pub fn roster_entries(table: &Table) -> Result<RosterLoad, SkippableFileError> {
    let idx = table.require(&[COL_ROSTER_NAME, COL_ROSTER_RA, COL_ROSTER_CHECK])?;
    let (name_i, ra_i, check_i) = (idx[0], idx[1], idx[2]);

    let mut out = RosterLoad::default();
    for (i, row) in table.rows.iter().enumerate() {
        let line = i + 2;
        let name = cell(row, name_i).trim();
        if name.is_empty() {
            out.rejected.push((line, "missing student name".to_string()));
            continue;
        }
        let Some(ra) = parse_registration_number(cell(row, ra_i)) else {
            out.rejected
                .push((line, format!("bad RA: {:?}", cell(row, ra_i))));
            continue;
        };
        out.entries.push(RosterEntry {
            student_name: name.to_string(),
            registration_number: ra,
            check_digit: cell(row, check_i).trim().to_string(),
        });
    }
    Ok(out)
}

pub fn read_roster(path: &Path) -> Result<RosterLoad, SkippableFileError> {
    roster_entries(&read_table(path)?)
}

/// Header lookup that tolerates column order; used where optional columns are
/// filled with defaults.
pub fn column_map(table: &Table) -> HashMap<&str, usize> {
    table
        .headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.as_str(), i))
        .collect()
}

pub fn cell_at(row: &[String], idx: Option<usize>) -> &str {
    idx.map(|i| cell(row, i)).unwrap_or("")
}
