use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;

use crate::tables::RosterEntry;

pub const DB_FILE: &str = "taskcount.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS roster_entries(
            id TEXT PRIMARY KEY,
            sort_order INTEGER NOT NULL,
            student_name TEXT NOT NULL,
            registration_number INTEGER NOT NULL,
            check_digit TEXT NOT NULL,
            source_path TEXT,
            imported_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_roster_entries_sort ON roster_entries(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_runs(
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            source_name TEXT NOT NULL,
            fingerprint TEXT,
            status TEXT NOT NULL,
            skip_reason TEXT,
            matched_students INTEGER NOT NULL DEFAULT 0,
            task_rows INTEGER NOT NULL DEFAULT 0,
            unkeyed_rows INTEGER NOT NULL DEFAULT 0,
            unmatched_rows INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_import_runs_created ON import_runs(created_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

/// Replaces the workspace roster. Roster order is kept in `sort_order` since
/// the matcher resolves duplicate names by it.
pub fn roster_replace(
    conn: &mut Connection,
    entries: &[RosterEntry],
    source_path: Option<&str>,
) -> anyhow::Result<usize> {
    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM roster_entries", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO roster_entries(
                id, sort_order, student_name, registration_number, check_digit, source_path, imported_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )?;
        for (i, e) in entries.iter().enumerate() {
            let ra = i64::try_from(e.registration_number).map_err(|_| {
                anyhow::anyhow!(
                    "RA {} of {} does not fit the roster table",
                    e.registration_number,
                    e.student_name
                )
            })?;
            stmt.execute((
                uuid::Uuid::new_v4().to_string(),
                i as i64,
                &e.student_name,
                ra,
                &e.check_digit,
                source_path,
                &now,
            ))?;
        }
    }
    tx.commit()?;
    Ok(entries.len())
}

pub fn roster_load(conn: &Connection) -> anyhow::Result<Vec<RosterEntry>> {
    let mut stmt = conn.prepare(
        "SELECT student_name, registration_number, check_digit
         FROM roster_entries
         ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(RosterEntry {
                student_name: r.get(0)?,
                registration_number: r.get::<_, i64>(1)?.max(0) as u64,
                check_digit: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRun {
    pub id: String,
    pub batch_id: String,
    pub source_name: String,
    pub fingerprint: Option<String>,
    /// "merged", "duplicate" or "skipped".
    pub status: String,
    pub skip_reason: Option<String>,
    pub matched_students: i64,
    pub task_rows: i64,
    pub unkeyed_rows: i64,
    pub unmatched_rows: i64,
    pub created_at: String,
}

pub fn run_insert(conn: &Connection, run: &ImportRun) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO import_runs(
            id, batch_id, source_name, fingerprint, status, skip_reason,
            matched_students, task_rows, unkeyed_rows, unmatched_rows, created_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            run.id,
            run.batch_id,
            run.source_name,
            run.fingerprint,
            run.status,
            run.skip_reason,
            run.matched_students,
            run.task_rows,
            run.unkeyed_rows,
            run.unmatched_rows,
            run.created_at,
        ],
    )?;
    Ok(())
}

/// Most recent first.
pub fn runs_list(conn: &Connection, limit: usize) -> anyhow::Result<Vec<ImportRun>> {
    let mut stmt = conn.prepare(
        "SELECT id, batch_id, source_name, fingerprint, status, skip_reason,
                matched_students, task_rows, unkeyed_rows, unmatched_rows, created_at
         FROM import_runs
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?",
    )?;
    let rows = stmt
        .query_map([limit as i64], |r| {
            Ok(ImportRun {
                id: r.get(0)?,
                batch_id: r.get(1)?,
                source_name: r.get(2)?,
                fingerprint: r.get(3)?,
                status: r.get(4)?,
                skip_reason: r.get(5)?,
                matched_students: r.get(6)?,
                task_rows: r.get(7)?,
                unkeyed_rows: r.get(8)?,
                unmatched_rows: r.get(9)?,
                created_at: r.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_round_trips_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut conn = open_db(dir.path()).expect("open db");
        let entries = vec![
            RosterEntry {
                student_name: "Bia".to_string(),
                registration_number: 111111111,
                check_digit: "1".to_string(),
            },
            RosterEntry {
                student_name: "Ana".to_string(),
                registration_number: 123456789,
                check_digit: "X".to_string(),
            },
        ];
        roster_replace(&mut conn, &entries, Some("alunos.csv")).expect("replace");
        assert_eq!(roster_load(&conn).expect("load"), entries);

        roster_replace(&mut conn, &entries[1..], None).expect("replace again");
        assert_eq!(roster_load(&conn).expect("load").len(), 1);
    }

    #[test]
    fn oversized_ra_is_refused_not_wrapped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut conn = open_db(dir.path()).expect("open db");
        let ok = RosterEntry {
            student_name: "Ana".to_string(),
            registration_number: 123456789,
            check_digit: "X".to_string(),
        };
        roster_replace(&mut conn, &[ok.clone()], None).expect("replace");
        let huge = RosterEntry {
            student_name: "Bia".to_string(),
            registration_number: u64::MAX,
            check_digit: "1".to_string(),
        };
        assert!(roster_replace(&mut conn, &[huge], None).is_err());
        // The failed transaction leaves the previous roster in place.
        assert_eq!(roster_load(&conn).expect("load"), vec![ok]);
    }

    #[test]
    fn settings_upsert() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_db(dir.path()).expect("open db");
        assert_eq!(settings_get_json(&conn, "report.outlierZ").expect("get"), None);
        settings_set_json(&conn, "report.outlierZ", &serde_json::json!(2.5)).expect("set");
        settings_set_json(&conn, "report.outlierZ", &serde_json::json!(3.5)).expect("set");
        assert_eq!(
            settings_get_json(&conn, "report.outlierZ").expect("get"),
            Some(serde_json::json!(3.5))
        );
    }
}
