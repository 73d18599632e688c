//! Stack datasets and collapse repeated ids.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dataset::Dataset;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("dataset '{dataset}' has no id column '{column}'")]
    MissingIdColumn { dataset: String, column: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum DuplicatePolicy {
    /// Stack only. Duplicates are reported, not removed.
    #[serde(rename = "all")]
    KeepAll,
    #[serde(rename = "first")]
    KeepFirst,
    /// Later inputs win.
    #[default]
    #[serde(rename = "last")]
    KeepLast,
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DuplicatePolicy::KeepAll => "all",
            DuplicatePolicy::KeepFirst => "first",
            DuplicatePolicy::KeepLast => "last",
        })
    }
}

#[derive(Debug)]
pub struct MergeReport {
    pub dataset: Dataset,
    pub rows_in: usize,
    /// (id, rows carrying it) for every id seen more than once.
    pub duplicates: Vec<(String, usize)>,
    pub empty_ids: usize,
}

impl MergeReport {
    pub fn rows_out(&self) -> usize {
        self.dataset.len()
    }
}

/// Concatenate in order. Columns are the union in first-seen order; cells a
/// dataset lacks are empty.
pub fn stack(name: &str, datasets: &[Dataset]) -> Dataset {
    let mut columns: Vec<String> = Vec::new();
    for ds in datasets {
        for c in ds.columns() {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
    }

    let mut out = Dataset::new(name, columns.clone());
    for ds in datasets {
        let mapping: Vec<Option<usize>> = columns.iter().map(|c| ds.column_index(c)).collect();
        for row in ds.rows() {
            out.push_row(
                mapping
                    .iter()
                    .map(|idx| idx.map(|i| row[i].clone()).unwrap_or_default())
                    .collect(),
            );
        }
    }
    out
}

/// Rows per id for ids seen more than once, most repeated first.
pub fn duplicate_counts(ids: &[&str]) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for id in ids.iter().copied().filter(|id| !id.is_empty()) {
        *counts.entry(id).or_default() += 1;
    }
    let mut dups: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(id, n)| (id.to_string(), n))
        .collect();
    dups.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    dups
}

pub fn merge(
    datasets: &[Dataset],
    id_column: &str,
    policy: DuplicatePolicy,
) -> Result<MergeReport, MergeError> {
    for ds in datasets {
        if !ds.has_column(id_column) {
            return Err(MergeError::MissingIdColumn {
                dataset: ds.name().to_string(),
                column: id_column.to_string(),
            });
        }
    }

    let stacked = stack("merged", datasets);
    let rows_in = stacked.len();
    let Some(idx) = stacked.column_index(id_column) else {
        // Only reachable with no inputs at all.
        return Ok(MergeReport {
            dataset: stacked,
            rows_in,
            duplicates: Vec::new(),
            empty_ids: 0,
        });
    };

    let ids: Vec<&str> = stacked.rows().iter().map(|r| r[idx].as_str()).collect();
    let duplicates = duplicate_counts(&ids);
    let empty_ids = ids.iter().filter(|id| id.is_empty()).count();
    if empty_ids > 0 {
        warn!("{} rows have an empty {} and are kept as-is", empty_ids, id_column);
    }
    for (id, n) in duplicates.iter().take(10) {
        debug!("{} {} appears {} times", id_column, id, n);
    }

    let keep: Vec<bool> = match policy {
        DuplicatePolicy::KeepAll => vec![true; ids.len()],
        DuplicatePolicy::KeepFirst => {
            let mut seen = HashSet::new();
            ids.iter().map(|id| id.is_empty() || seen.insert(*id)).collect()
        }
        DuplicatePolicy::KeepLast => {
            let mut seen = HashSet::new();
            let mut keep: Vec<bool> = ids
                .iter()
                .rev()
                .map(|id| id.is_empty() || seen.insert(*id))
                .collect();
            keep.reverse();
            keep
        }
    };

    let mut dataset = Dataset::new("merged", stacked.columns().to_vec());
    for (row, kept) in stacked.rows().iter().zip(&keep) {
        if *kept {
            dataset.push_row(row.clone());
        }
    }

    info!(
        "Merged {} datasets: {} rows in, {} out, {} duplicated ids (policy {})",
        datasets.len(),
        rows_in,
        dataset.len(),
        duplicates.len(),
        policy
    );

    Ok(MergeReport {
        dataset,
        rows_in,
        duplicates,
        empty_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::VacancyRecord;
    use crate::transform::Pipeline;

    fn table(name: &str, columns: &[&str], rows: &[&[&str]]) -> Dataset {
        let mut ds = Dataset::new(name, columns.iter().map(|c| c.to_string()).collect());
        for r in rows {
            ds.push_row(r.iter().map(|v| v.to_string()).collect());
        }
        ds
    }

    #[test]
    fn stack_unions_columns() {
        let a = table("a", &["job_id", "x"], &[&["1", "ax"]]);
        let b = table("b", &["y", "job_id"], &[&["by", "2"]]);
        let s = stack("s", &[a, b]);
        assert_eq!(s.columns(), &["job_id", "x", "y"]);
        assert_eq!(s.rows()[0], vec!["1", "ax", ""]);
        assert_eq!(s.rows()[1], vec!["2", "", "by"]);
    }

    #[test]
    fn keep_last_prefers_later_inputs() {
        let hist = table("hist", &["job_id", "v"], &[&["1", "old"], &["2", "b"]]);
        let daily = table("daily", &["job_id", "v"], &[&["1", "new"]]);
        let report = merge(&[hist, daily], "job_id", DuplicatePolicy::KeepLast).unwrap();

        assert_eq!(report.rows_in, 3);
        assert_eq!(report.rows_out(), 2);
        assert_eq!(report.duplicates, vec![("1".to_string(), 2)]);
        assert_eq!(report.dataset.rows()[0], vec!["2", "b"]);
        assert_eq!(report.dataset.find_row("job_id", "1").unwrap()[1], "new");
    }

    #[test]
    fn keep_first_and_keep_all() {
        let a = table("a", &["job_id", "v"], &[&["1", "first"], &["3", "c"]]);
        let b = table("b", &["job_id", "v"], &[&["1", "second"]]);

        let first = merge(&[a.clone(), b.clone()], "job_id", DuplicatePolicy::KeepFirst).unwrap();
        assert_eq!(first.rows_out(), 2);
        assert_eq!(first.dataset.find_row("job_id", "1").unwrap()[1], "first");
        assert_eq!(first.dataset.rows()[0][0], "1");

        let all = merge(&[a, b], "job_id", DuplicatePolicy::KeepAll).unwrap();
        assert_eq!(all.rows_out(), 3);
        assert_eq!(all.duplicates.len(), 1);
    }

    #[test]
    fn every_id_survives() {
        let a = table("a", &["job_id"], &[&["1"], &["2"], &["2"], &["3"]]);
        let b = table("b", &["job_id"], &[&["3"], &["4"], &["1"], &["1"]]);
        for policy in [DuplicatePolicy::KeepFirst, DuplicatePolicy::KeepLast] {
            let report = merge(&[a.clone(), b.clone()], "job_id", policy).unwrap();
            let mut ids = report.dataset.column("job_id").unwrap();
            ids.sort();
            assert_eq!(ids, vec!["1", "2", "3", "4"], "{policy}");
        }
    }

    #[test]
    fn empty_ids_are_never_collapsed() {
        let a = table("a", &["job_id", "v"], &[&["", "p"], &["", "q"], &["5", "r"]]);
        let report = merge(&[a], "job_id", DuplicatePolicy::KeepLast).unwrap();
        assert_eq!(report.rows_out(), 3);
        assert_eq!(report.empty_ids, 2);
        assert!(report.duplicates.is_empty());
    }

    #[test]
    fn missing_id_column_is_fatal() {
        let a = table("a", &["job_id"], &[&["1"]]);
        let b = table("legacy", &["job_link"], &[&["https://x/jobs/1"]]);
        let err = merge(&[a, b], "job_id", DuplicatePolicy::KeepLast).unwrap_err();
        assert_eq!(err.to_string(), "dataset 'legacy' has no id column 'job_id'");
    }

    #[test]
    fn duplicate_counts_ordering() {
        let counts = duplicate_counts(&["b", "a", "b", "a", "c", "b", "", ""]);
        assert_eq!(counts, vec![("b".to_string(), 3), ("a".to_string(), 2)]);
    }

    #[test]
    fn no_inputs() {
        let report = merge(&[], "job_id", DuplicatePolicy::KeepLast).unwrap();
        assert!(report.dataset.is_empty());
    }

    #[test]
    fn daily_overrides_history_end_to_end() {
        let link = |id: &str| format!("https://euraxess.ec.europa.eu/jobs/{}", id);
        let historical = Dataset::from_records(
            "historical",
            &[
                VacancyRecord {
                    job_link: link("1"),
                    job_title: "Old title".into(),
                    posted_on: "Posted on: 1 January 2024".into(),
                    ..Default::default()
                },
                VacancyRecord {
                    job_link: link("2"),
                    job_title: "Other".into(),
                    posted_on: "Posted on: 2 January 2024".into(),
                    ..Default::default()
                },
            ],
        );
        let daily = Dataset::from_records(
            "jobs_2024-01-05",
            &[VacancyRecord {
                job_link: link("1"),
                job_title: "New title".into(),
                posted_on: "Posted on: 5 January 2024".into(),
                ..Default::default()
            }],
        );

        let pipeline = Pipeline::standard();
        let inputs = vec![
            pipeline.run(historical).unwrap(),
            pipeline.run(daily).unwrap(),
        ];
        let report = merge(&inputs, "job_id", DuplicatePolicy::default()).unwrap();

        let mut ids = report.dataset.column("job_id").unwrap();
        ids.sort();
        assert_eq!(ids, vec!["1", "2"]);
        let one = report.dataset.find_row("job_id", "1").unwrap();
        let title = report.dataset.column_index("job_title").unwrap();
        let posted = report.dataset.column_index("posted_on_date").unwrap();
        assert_eq!(one[title], "New title");
        assert_eq!(one[posted], "2024-01-05");
    }
}
