use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::duration::Duration;
use crate::identity::{candidate_key_from_label, canonical_key_from_roster};
use crate::tables::{RosterEntry, TaskRecord};

/// One student's share of one task file.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub student_name: String,
    /// Always 1: a file counts as one completed task however many rows match.
    pub count: u64,
    pub points: f64,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileMatch {
    /// Sorted by student name.
    pub contributions: Vec<Contribution>,
    pub matched_students: BTreeSet<String>,
    pub task_rows: usize,
    /// Rows whose label yielded no key at all.
    pub unkeyed_rows: usize,
    /// Keyed rows that no roster entry claimed.
    pub unmatched_rows: usize,
}

/// Roster with canonical keys computed once, ready to be joined against any
/// number of task files.
#[derive(Debug, Clone, Default)]
pub struct RosterIndex {
    /// canonical key -> indexes into `names`, in roster order.
    by_key: HashMap<String, Vec<usize>>,
    names: Vec<String>,
}

impl RosterIndex {
    pub fn new(roster: &[RosterEntry]) -> Self {
        let mut by_key = HashMap::new();
        let mut names = Vec::with_capacity(roster.len());
        for entry in roster {
            let key = canonical_key_from_roster(entry.registration_number, &entry.check_digit);
            names.push(entry.student_name.clone());
            by_key.entry(key).or_insert_with(Vec::new).push(names.len() - 1);
        }
        Self { by_key, names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn lookup(&self, key: &str) -> Option<&[usize]> {
        self.by_key.get(key).map(|v| v.as_slice())
    }
}

/// Joins one file's task rows against the roster.
///
/// Rows are grouped by the roster entries their key hits; every entry holding
/// that key is matched. When two roster entries share a student name, the
/// first one (roster order) that matched supplies that student's contribution
/// and the other is ignored for this file.
pub fn match_file(roster: &RosterIndex, records: &[TaskRecord]) -> FileMatch {
    let mut per_entry: BTreeMap<usize, (f64, Duration)> = BTreeMap::new();
    let mut unkeyed_rows = 0usize;
    let mut unmatched_rows = 0usize;

    for rec in records {
        let Some(key) = candidate_key_from_label(rec.raw_student_label.as_deref()) else {
            unkeyed_rows += 1;
            continue;
        };
        let Some(entry_idxs) = roster.lookup(&key) else {
            unmatched_rows += 1;
            continue;
        };
        for &entry_idx in entry_idxs {
            let acc = per_entry.entry(entry_idx).or_insert((0.0, Duration::ZERO));
            acc.0 += rec.score;
            acc.1 += rec.duration;
        }
    }

    let mut by_name: BTreeMap<String, Contribution> = BTreeMap::new();
    for (entry_idx, (points, duration)) in per_entry {
        let name = &roster.names[entry_idx];
        by_name
            .entry(name.clone())
            .or_insert_with(|| Contribution {
                student_name: name.clone(),
                count: 1,
                points,
                duration,
            });
    }

    FileMatch {
        matched_students: by_name.keys().cloned().collect(),
        contributions: by_name.into_values().collect(),
        task_rows: records.len(),
        unkeyed_rows,
        unmatched_rows,
    }
}
