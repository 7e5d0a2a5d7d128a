use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::duration::Duration;
use crate::matcher::Contribution;
use crate::tables::{self, SkippableFileError};

pub const COL_STORE_NAME: &str = "Nome do Aluno";
pub const COL_STORE_TASKS: &str = "Tarefas Completadas";
pub const COL_STORE_POINTS: &str = "Acertos Absolutos";
pub const COL_STORE_TIME: &str = "Total Tempo";

pub const STORE_COLUMNS: [&str; 4] = [
    COL_STORE_NAME,
    COL_STORE_TASKS,
    COL_STORE_POINTS,
    COL_STORE_TIME,
];

const LEDGER_FORMAT: &str = "taskcount-ledger-v1";

#[derive(Debug, Clone, PartialEq)]
pub struct CounterEntry {
    pub student_name: String,
    pub tasks_completed: u64,
    pub absolute_points: f64,
    pub total_duration: Duration,
}

impl CounterEntry {
    fn from_contribution(c: &Contribution) -> Self {
        Self {
            student_name: c.student_name.clone(),
            tasks_completed: c.count,
            absolute_points: c.points,
            total_duration: c.duration,
        }
    }

    fn absorb(&mut self, count: u64, points: f64, duration: Duration) {
        self.tasks_completed += count;
        self.absolute_points += points;
        self.total_duration += duration;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub fingerprint: String,
    pub source_name: String,
    pub merged_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    format: String,
    records: Vec<LedgerRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged { students: usize },
    AlreadyMerged,
}

/// SHA-256 of a task file's bytes, lowercase hex.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// `contador_tarefas.csv` -> `contador_tarefas.ledger.json`
pub fn ledger_path(store_path: &Path) -> PathBuf {
    let stem = store_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("store");
    store_path.with_file_name(format!("{}.ledger.json", stem))
}

/// Running per-student totals plus the ledger of task files already folded
/// in. The store is the only mutable state of a run and the only writer of
/// its two files.
#[derive(Debug, Clone, Default)]
pub struct CounterStore {
    entries: BTreeMap<String, CounterEntry>,
    ledger: BTreeMap<String, LedgerRecord>,
}

impl CounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, student_name: &str) -> Option<&CounterEntry> {
        self.entries.get(student_name)
    }

    /// Entries in ordinal name order.
    pub fn entries(&self) -> impl Iterator<Item = &CounterEntry> {
        self.entries.values()
    }

    pub fn ledger(&self) -> impl Iterator<Item = &LedgerRecord> {
        self.ledger.values()
    }

    pub fn has_merged(&self, fingerprint: &str) -> bool {
        self.ledger.contains_key(fingerprint)
    }

    /// Adds one contribution. Calling this twice with the same contribution
    /// counts it twice; use [`CounterStore::merge_file`] for re-runnable
    /// imports.
    pub fn merge(&mut self, c: &Contribution) {
        match self.entries.get_mut(&c.student_name) {
            Some(e) => e.absorb(c.count, c.points, c.duration),
            None => {
                self.entries
                    .insert(c.student_name.clone(), CounterEntry::from_contribution(c));
            }
        }
    }

    pub fn merge_file(
        &mut self,
        fingerprint: &str,
        source_name: &str,
        contributions: &[Contribution],
    ) -> MergeOutcome {
        if self.has_merged(fingerprint) {
            return MergeOutcome::AlreadyMerged;
        }
        for c in contributions {
            self.merge(c);
        }
        self.ledger.insert(
            fingerprint.to_string(),
            LedgerRecord {
                fingerprint: fingerprint.to_string(),
                source_name: source_name.to_string(),
                merged_at: chrono::Utc::now().to_rfc3339(),
            },
        );
        MergeOutcome::Merged {
            students: contributions.len(),
        }
    }

    /// Missing store file means a fresh store. Columns other than the name
    /// column default to zero when absent.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut store = CounterStore::new();
        if !path.exists() {
            debug!(path = %path.display(), "no counter store yet, starting empty");
            return Ok(store);
        }

        let table = match tables::read_table(path) {
            Ok(t) => t,
            Err(SkippableFileError::Empty) => return Ok(store),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("failed to read counter store {}", path.display())))
            }
        };
        let cols = tables::column_map(&table);
        let name_i = cols.get(COL_STORE_NAME).copied().ok_or_else(|| {
            anyhow!(
                "counter store {} has no {:?} column",
                path.display(),
                COL_STORE_NAME
            )
        })?;
        let tasks_i = cols.get(COL_STORE_TASKS).copied();
        let points_i = cols.get(COL_STORE_POINTS).copied();
        let time_i = cols.get(COL_STORE_TIME).copied();

        for row in &table.rows {
            let name = tables::cell_at(row, Some(name_i)).trim();
            if name.is_empty() {
                continue;
            }
            let tasks = tables::parse_number(tables::cell_at(row, tasks_i))
                .filter(|v| *v >= 0.0)
                .map(|v| v as u64)
                .unwrap_or(0);
            let points = tables::parse_number(tables::cell_at(row, points_i)).unwrap_or(0.0);
            let total = Duration::parse_stored(tables::cell_at(row, time_i));

            match store.entries.get_mut(name) {
                Some(e) => {
                    warn!(student = name, "counter store repeats a student, folding rows");
                    e.absorb(tasks, points, total);
                }
                None => {
                    store.entries.insert(
                        name.to_string(),
                        CounterEntry {
                            student_name: name.to_string(),
                            tasks_completed: tasks,
                            absolute_points: points,
                            total_duration: total,
                        },
                    );
                }
            }
        }

        let lp = ledger_path(path);
        if lp.exists() {
            let text = std::fs::read_to_string(&lp)
                .with_context(|| format!("failed to read ledger {}", lp.display()))?;
            let file: LedgerFile = serde_json::from_str(&text)
                .with_context(|| format!("ledger {} is invalid JSON", lp.display()))?;
            if file.format != LEDGER_FORMAT {
                return Err(anyhow!("unsupported ledger format: {}", file.format));
            }
            for r in file.records {
                store.ledger.insert(r.fingerprint.clone(), r);
            }
        }

        Ok(store)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let rows: Vec<Vec<String>> = self
            .entries
            .values()
            .map(|e| {
                vec![
                    e.student_name.clone(),
                    e.tasks_completed.to_string(),
                    tables::format_number(e.absolute_points),
                    e.total_duration.format(),
                ]
            })
            .collect();
        tables::write_table(path, &STORE_COLUMNS, &rows)?;

        let file = LedgerFile {
            format: LEDGER_FORMAT.to_string(),
            records: self.ledger.values().cloned().collect(),
        };
        let lp = ledger_path(path);
        let tmp = lp.with_extension("json.writing");
        std::fs::write(
            &tmp,
            serde_json::to_string_pretty(&file).context("failed to serialize ledger")?,
        )
        .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &lp)
            .with_context(|| format!("failed to move ledger into {}", lp.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contrib(name: &str, points: f64, secs: u64) -> Contribution {
        Contribution {
            student_name: name.to_string(),
            count: 1,
            points,
            duration: Duration::from_secs(secs),
        }
    }

    #[test]
    fn merge_inserts_then_accumulates() {
        let mut s = CounterStore::new();
        s.merge(&contrib("Ana", 2.0, 600));
        s.merge(&contrib("Ana", 1.0, 300));
        let e = s.get("Ana").expect("entry");
        assert_eq!(e.tasks_completed, 2);
        assert_eq!(e.absolute_points, 3.0);
        assert_eq!(e.total_duration.as_secs(), 900);
    }

    #[test]
    fn plain_merge_double_counts_a_repeated_file() {
        let file = vec![contrib("Ana", 2.0, 600)];
        let mut s = CounterStore::new();
        for c in &file {
            s.merge(c);
        }
        for c in &file {
            s.merge(c);
        }
        assert_eq!(s.get("Ana").map(|e| e.tasks_completed), Some(2));
        assert_eq!(s.get("Ana").map(|e| e.absolute_points), Some(4.0));
    }

    #[test]
    fn merge_file_ignores_known_fingerprint() {
        let file = vec![contrib("Ana", 2.0, 600)];
        let mut s = CounterStore::new();
        assert_eq!(
            s.merge_file("abc", "t1.csv", &file),
            MergeOutcome::Merged { students: 1 }
        );
        assert_eq!(
            s.merge_file("abc", "t1-copy.csv", &file),
            MergeOutcome::AlreadyMerged
        );
        assert_eq!(s.get("Ana").map(|e| e.tasks_completed), Some(1));
        assert_eq!(s.ledger().count(), 1);
    }

    #[test]
    fn merge_order_does_not_matter() {
        let a = vec![contrib("Ana", 2.0, 60)];
        let b = vec![contrib("Ana", 1.5, 30), contrib("Bia", 1.0, 10)];
        let c = vec![contrib("Ana", 0.5, 5)];

        let mut s1 = CounterStore::new();
        s1.merge_file("a", "a", &a);
        s1.merge_file("b", "b", &b);
        s1.merge_file("c", "c", &c);

        let mut s2 = CounterStore::new();
        s2.merge_file("c", "c", &c);
        s2.merge_file("a", "a", &a);
        s2.merge_file("b", "b", &b);

        let e1: Vec<_> = s1.entries().cloned().collect();
        let e2: Vec<_> = s2.entries().cloned().collect();
        assert_eq!(e1, e2);
        assert_eq!(s1.get("Ana").map(|e| e.tasks_completed), Some(3));
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let s = CounterStore::load(&dir.path().join("contador_tarefas.csv")).expect("load");
        assert!(s.is_empty());
    }

    #[test]
    fn save_then_load_keeps_totals_and_ledger() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("contador_tarefas.csv");
        let mut s = CounterStore::new();
        s.merge_file("f1", "t1.csv", &[contrib("Bia", 1.5, 4000), contrib("Ana", 2.0, 600)]);
        s.save(&path).expect("save");

        let bytes = std::fs::read(&path).expect("read store");
        assert!(bytes.starts_with(tables::UTF8_BOM));
        let text = String::from_utf8_lossy(&bytes[3..]).to_string();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("Nome do Aluno,Tarefas Completadas,Acertos Absolutos,Total Tempo")
        );
        assert_eq!(lines.next(), Some("Ana,1,2,00:10:00"));
        assert_eq!(lines.next(), Some("Bia,1,1.5,01:06:40"));

        let back = CounterStore::load(&path).expect("load");
        assert_eq!(back.len(), 2);
        assert!(back.has_merged("f1"));
        assert_eq!(back.get("Bia").map(|e| e.total_duration.as_secs()), Some(4000));
    }

    #[test]
    fn load_fills_missing_columns_and_folds_repeats() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("contador_tarefas.csv");
        std::fs::write(&path, "Nome do Aluno,Tarefas Completadas\nAna,2\nAna,1\nBia,1\n")
            .expect("write");
        let s = CounterStore::load(&path).expect("load");
        let ana = s.get("Ana").expect("ana");
        assert_eq!(ana.tasks_completed, 3);
        assert_eq!(ana.absolute_points, 0.0);
        assert_eq!(ana.total_duration, Duration::ZERO);
    }

    #[test]
    fn load_reads_day_prefixed_totals() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("contador_tarefas.csv");
        std::fs::write(
            &path,
            "Nome do Aluno,Tarefas Completadas,Acertos Absolutos,Total Tempo\nAna,1,2.0,0 days 00:10:00\n",
        )
        .expect("write");
        let s = CounterStore::load(&path).expect("load");
        assert_eq!(s.get("Ana").map(|e| e.total_duration.as_secs()), Some(600));
    }

    #[test]
    fn load_without_name_column_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("contador_tarefas.csv");
        std::fs::write(&path, "Aluno,Tarefas Completadas\nAna,2\n").expect("write");
        assert!(CounterStore::load(&path).is_err());
    }

    #[test]
    fn fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            ledger_path(Path::new("/w/contador_tarefas.csv")),
            PathBuf::from("/w/contador_tarefas.ledger.json")
        );
    }
}
