//! One crawl-and-merge cycle: crawl into a daily snapshot, then fold every
//! pending snapshot into the canonical one.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::archive::DatasetArchive;
use crate::crawler::{self, CrawlMode, CrawlOptions, CrawlReport};
use crate::dataset::Dataset;
use crate::dates::CutoffSpec;
use crate::db;
use crate::fetch::PageSource;
use crate::merge::{self, MergeReport};
use crate::settings::Settings;
use crate::snapshot;
use crate::transform::Pipeline;

pub const ID_COLUMN: &str = "job_id";
const POSTED_DATE_COLUMN: &str = "posted_on_date";
const ARCHIVE_PULL_DIR: &str = "archive_pull";

pub struct CrawlOutcome {
    pub report: CrawlReport,
    pub cutoff: Option<NaiveDate>,
    pub snapshot: Option<PathBuf>,
}

/// Resolve a cutoff spec once for this run. `latest` looks at the canonical snapshot.
pub fn resolve_cutoff(settings: &Settings, spec: CutoffSpec, today: NaiveDate) -> NaiveDate {
    let latest_known = match spec {
        CutoffSpec::Latest if settings.canonical_path.exists() => {
            match snapshot::read(&settings.canonical_path) {
                Ok(ds) => snapshot::latest_date(&ds, POSTED_DATE_COLUMN),
                Err(e) => {
                    warn!("Cannot read canonical snapshot for cutoff: {:#}", e);
                    None
                }
            }
        }
        _ => None,
    };
    let cutoff = spec.resolve(today, latest_known);
    info!("Cutoff '{}' resolved to {}", spec, cutoff);
    cutoff
}

/// Crawl and persist whatever was collected, even when the crawl failed.
pub async fn crawl_to_snapshot(
    settings: &Settings,
    conn: &Connection,
    source: &dyn PageSource,
    mode: CrawlMode,
    run_date: NaiveDate,
) -> Result<CrawlOutcome> {
    let options = CrawlOptions {
        base_url: settings.base_url()?,
        mode,
        max_pages: settings.max_pages,
    };

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] {pos} pages | {msg}",
    )?);
    pb.enable_steady_tick(Duration::from_millis(120));
    let report = crawler::crawl(source, &options, &pb).await;
    pb.finish_and_clear();

    let (mode_label, cutoff, target) = match mode {
        CrawlMode::Incremental { cutoff } => (
            "incremental",
            Some(cutoff),
            settings.daily_dir.join(snapshot::daily_file_name(run_date)),
        ),
        CrawlMode::Full => ("full", None, settings.bootstrap_path.clone()),
    };

    let snapshot_path = if report.records.is_empty() {
        info!("No new listings, no snapshot written");
        None
    } else {
        let name = target
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("jobs")
            .to_string();
        let dataset = Dataset::from_records(name, &report.records);
        snapshot::write(&target, &dataset)?;
        info!("Saved {} listings to {}", dataset.len(), target.display());
        Some(target)
    };

    let error = match &report.stop {
        crawler::StopReason::FetchFailed { error, .. } => Some(error.clone()),
        _ => None,
    };
    db::record_crawl(
        conn,
        &db::CrawlRunRow {
            run_date: run_date.format("%Y-%m-%d").to_string(),
            mode: mode_label,
            cutoff: cutoff.map(|d| d.format("%Y-%m-%d").to_string()),
            pages_fetched: report.pages_fetched,
            emitted: report.records.len(),
            stop_reason: report.stop.label(),
            error,
            snapshot_path: snapshot_path.as_ref().map(|p| p.display().to_string()),
        },
    )?;

    Ok(CrawlOutcome {
        report,
        cutoff,
        snapshot: snapshot_path,
    })
}

#[derive(Debug)]
pub struct MergeOutcome {
    pub inputs: Vec<String>,
    pub report: MergeReport,
    pub canonical: PathBuf,
    pub archive_version: Option<u32>,
}

enum BaseSource {
    Archive { version: u32, path: PathBuf },
    Canonical(PathBuf),
    Bootstrap(PathBuf),
}

impl BaseSource {
    fn path(&self) -> &Path {
        match self {
            BaseSource::Archive { path, .. }
            | BaseSource::Canonical(path)
            | BaseSource::Bootstrap(path) => path,
        }
    }

    /// Daily files already folded into this base.
    fn merged_files(&self, conn: &Connection) -> Result<HashSet<String>> {
        match self {
            BaseSource::Archive { version, .. } => db::merged_files_through(conn, *version),
            BaseSource::Canonical(_) => db::merged_files(conn),
            BaseSource::Bootstrap(_) => Ok(HashSet::new()),
        }
    }
}

/// Bases to try in order. The archive comes first unless the local canonical
/// snapshot holds a merge the archive never received.
fn base_candidates(
    settings: &Settings,
    conn: &Connection,
    archive: Option<&dyn DatasetArchive>,
) -> Result<Vec<BaseSource>> {
    let canonical_exists = settings.canonical_path.exists();
    let mut candidates = Vec::new();

    if let Some(archive) = archive {
        match archive.pull_latest(&settings.output_dir.join(ARCHIVE_PULL_DIR)) {
            Ok(Some(pulled)) => {
                let local_ahead = canonical_exists
                    && db::last_merge_archive_version(conn)?
                        .is_some_and(|last| last.map_or(true, |v| v > pulled.version));
                if local_ahead {
                    info!(
                        "Local canonical snapshot is ahead of archive version {}",
                        pulled.version
                    );
                } else {
                    candidates.push(BaseSource::Archive {
                        version: pulled.version,
                        path: pulled.path,
                    });
                }
            }
            Ok(None) => info!("Archive has no versions yet, using local data"),
            Err(e) => warn!("Archive pull failed, using local data: {}", e),
        }
    }
    if canonical_exists {
        candidates.push(BaseSource::Canonical(settings.canonical_path.clone()));
    }
    if settings.bootstrap_path.exists() {
        candidates.push(BaseSource::Bootstrap(settings.bootstrap_path.clone()));
    }
    Ok(candidates)
}

fn load_transformed(path: &Path, pipeline: &Pipeline) -> Result<Option<Dataset>> {
    let ds = snapshot::read(path)?;
    if ds.is_empty() {
        return Ok(None);
    }
    let ds = pipeline
        .run(ds)
        .with_context(|| format!("transforming {}", path.display()))?;
    Ok(Some(ds))
}

/// First candidate that loads with rows. A local snapshot that exists but
/// cannot be loaded is an error, so the canonical file is never rewritten
/// without its history.
fn load_base(
    settings: &Settings,
    conn: &Connection,
    archive: Option<&dyn DatasetArchive>,
    pipeline: &Pipeline,
) -> Result<Option<(BaseSource, Dataset)>> {
    for candidate in base_candidates(settings, conn, archive)? {
        let path = candidate.path().to_path_buf();
        match load_transformed(&path, pipeline) {
            Ok(Some(ds)) => {
                info!("Base snapshot {} ({} rows)", path.display(), ds.len());
                return Ok(Some((candidate, ds)));
            }
            Ok(None) => warn!("Base snapshot {} is empty", path.display()),
            Err(e) if matches!(candidate, BaseSource::Archive { .. }) => {
                warn!("Skipping archived snapshot {}: {:#}", path.display(), e)
            }
            Err(e) => {
                return Err(e.context(format!(
                    "{} exists but cannot be loaded; refusing to rewrite {}",
                    path.display(),
                    settings.canonical_path.display()
                )))
            }
        }
    }
    info!("No historical snapshot found");
    Ok(None)
}

/// Load the base and pending dailies, transform, merge, and persist.
/// Returns `None` when there was nothing to merge.
pub fn merge_snapshots(
    settings: &Settings,
    conn: &Connection,
    archive: Option<&dyn DatasetArchive>,
    pipeline: &Pipeline,
) -> Result<Option<MergeOutcome>> {
    let mut datasets = Vec::new();
    let mut inputs = Vec::new();

    let already_merged = match load_base(settings, conn, archive, pipeline)? {
        Some((base, ds)) => {
            inputs.push(ds.name().to_string());
            datasets.push(ds);
            base.merged_files(conn)?
        }
        None => HashSet::new(),
    };

    let mut merged_dailies = Vec::new();
    for path in snapshot::list_daily(&settings.daily_dir)? {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if already_merged.contains(&file) {
            continue;
        }
        match load_transformed(&path, pipeline) {
            Ok(Some(ds)) => {
                info!("Daily snapshot {} ({} rows)", file, ds.len());
                inputs.push(ds.name().to_string());
                datasets.push(ds);
                merged_dailies.push(file);
            }
            Ok(None) => info!("Daily snapshot {} is empty, skipping", file),
            Err(e) => warn!("Skipping daily snapshot {}: {:#}", file, e),
        }
    }

    if datasets.is_empty() {
        info!("Nothing to merge");
        return Ok(None);
    }

    let report = merge::merge(&datasets, ID_COLUMN, settings.duplicate_policy)?;
    snapshot::write(&settings.canonical_path, &report.dataset)?;
    info!(
        "Canonical snapshot {} now has {} rows",
        settings.canonical_path.display(),
        report.rows_out()
    );

    let run_id = db::record_merge(
        conn,
        &db::MergeRunRow {
            inputs: inputs.clone(),
            rows_in: report.rows_in,
            rows_out: report.rows_out(),
            duplicate_ids: report.duplicates.len(),
            empty_ids: report.empty_ids,
            policy: settings.duplicate_policy.to_string(),
            canonical_path: settings.canonical_path.display().to_string(),
        },
        &merged_dailies,
    )?;

    // An unpushed run keeps archive_version NULL, which makes the next merge
    // start from the local canonical file.
    let archive_version = match archive {
        Some(archive) => {
            let notes = format!(
                "{} rows from {} inputs ({})",
                report.rows_out(),
                inputs.len(),
                crate::dates::today()
            );
            match archive.push_version(&settings.canonical_path, &notes) {
                Ok(v) => {
                    db::set_archive_version(conn, run_id, v)?;
                    Some(v)
                }
                Err(e) => {
                    warn!("Archive push failed, canonical snapshot kept locally: {}", e);
                    None
                }
            }
        }
        None => None,
    };

    Ok(Some(MergeOutcome {
        inputs,
        report,
        canonical: settings.canonical_path.clone(),
        archive_version,
    }))
}

/// Run the pipeline over one CSV and write the result next to it or to `output`.
pub fn transform_file(
    pipeline: &Pipeline,
    input: &Path,
    output: Option<&Path>,
) -> Result<(PathBuf, usize)> {
    let ds = snapshot::read(input)?;
    let ds = pipeline
        .run(ds)
        .with_context(|| format!("transforming {}", input.display()))?;
    let out = match output {
        Some(p) => p.to_path_buf(),
        None => {
            let stem = input
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("jobs");
            input.with_file_name(format!("{}_transformed.csv", stem))
        }
    };
    snapshot::write(&out, &ds)?;
    Ok((out, ds.len()))
}

/// Ids appearing more than once in a snapshot. Raw crawl output is transformed first.
pub fn duplicate_report(
    pipeline: &Pipeline,
    path: &Path,
) -> Result<(usize, Vec<(String, usize)>)> {
    let mut ds = snapshot::read(path)?;
    if !ds.has_column(ID_COLUMN) {
        ds = pipeline.run(ds)?;
    }
    let ids = ds.column(ID_COLUMN)?;
    Ok((ids.len(), merge::duplicate_counts(&ids)))
}
