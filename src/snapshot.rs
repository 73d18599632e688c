//! CSV snapshots on disk: daily crawl files and the canonical merged file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::dataset::Dataset;

const DAILY_PREFIX: &str = "jobs_";
const DAILY_SUFFIX: &str = ".csv";

pub fn daily_file_name(date: NaiveDate) -> String {
    format!("{}{}{}", DAILY_PREFIX, date.format("%Y-%m-%d"), DAILY_SUFFIX)
}

/// Date encoded in a daily file name, if it is one.
pub fn daily_date(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_prefix(DAILY_PREFIX)?.strip_suffix(DAILY_SUFFIX)?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

/// Daily snapshot files in `dir`, oldest first. A missing dir is empty.
pub fn list_daily(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<(NaiveDate, PathBuf)> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter_map(|p| daily_date(&p).map(|d| (d, p)))
        .collect();
    files.sort();
    Ok(files.into_iter().map(|(_, p)| p).collect())
}

/// Dataset named after the file stem. An empty file is an empty dataset.
pub fn read(path: &Path) -> Result<Dataset> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("snapshot")
        .to_string();

    let meta = fs::metadata(path).with_context(|| format!("reading {}", path.display()))?;
    if meta.len() == 0 {
        return Ok(Dataset::new(name, Vec::new()));
    }

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let columns: Vec<String> = rdr
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut ds = Dataset::new(name, columns);
    for (i, record) in rdr.records().enumerate() {
        match record {
            Ok(r) => ds.push_row(r.iter().map(str::to_string).collect()),
            Err(e) => warn!("Skipping malformed row {} in {}: {}", i + 1, path.display(), e),
        }
    }
    debug!("Read {} rows from {}", ds.len(), path.display());
    Ok(ds)
}

/// Write through a temp file in the same directory, then rename over `path`.
pub fn write(path: &Path, dataset: &Dataset) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = path.with_extension("csv.tmp");
    {
        let mut wtr = csv::Writer::from_path(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        wtr.write_record(dataset.columns())?;
        for row in dataset.rows() {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("moving {} to {}", tmp.display(), path.display()))?;
    debug!("Wrote {} rows to {}", dataset.len(), path.display());
    Ok(())
}

/// Newest valid date in `column`. Sentinel and unparseable values are ignored.
pub fn latest_date(dataset: &Dataset, column: &str) -> Option<NaiveDate> {
    dataset
        .column(column)
        .ok()?
        .into_iter()
        .filter(|v| *v != crate::dates::SENTINEL)
        .filter_map(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").ok())
        .max()
}
