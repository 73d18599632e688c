mod archive;
mod crawler;
mod dataset;
mod dates;
mod db;
mod extract;
mod fetch;
mod merge;
mod orchestrator;
mod record;
mod selectors;
mod settings;
mod snapshot;
mod transform;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use crate::archive::{DatasetArchive, LocalArchive};
use crate::crawler::CrawlMode;
use crate::dates::CutoffSpec;
use crate::fetch::{HttpFetcher, PageSource};
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "vacancy_crawler", about = "Incremental Euraxess vacancy crawler and merger")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl new listings into a daily snapshot
    Crawl {
        /// today, latest, YYYY-MM-DD or DD-MM-YYYY (default: configured cutoff_date)
        #[arg(short, long)]
        cutoff: Option<CutoffSpec>,
        /// Walk the whole feed into the bootstrap snapshot, ignoring dates
        #[arg(long)]
        full: bool,
    },
    /// Transform and merge pending snapshots into the canonical one
    Merge,
    /// Crawl, then merge (the scheduled entry point)
    Run {
        #[arg(short, long)]
        cutoff: Option<CutoffSpec>,
    },
    /// Run the transform pipeline over one CSV
    Transform {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Report repeated job ids in a snapshot (default: canonical)
    Duplicates {
        file: Option<PathBuf>,
        /// Max ids to list
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Fetch one listings page and print what the selectors extract
    Inspect {
        #[arg(short, long, default_value = "0")]
        page: usize,
    },
    /// Show crawl and merge history
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;

    let result = match cli.command {
        Commands::Crawl { cutoff, full } => {
            let conn = open_ledger(&settings)?;
            crawl(&settings, &conn, cutoff, full).await
        }
        Commands::Merge => {
            let conn = open_ledger(&settings)?;
            merge(&settings, &conn)
        }
        Commands::Run { cutoff } => {
            let conn = open_ledger(&settings)?;
            crawl(&settings, &conn, cutoff, false).await?;
            merge(&settings, &conn)
        }
        Commands::Transform { input, output } => {
            let pipeline = settings.pipeline()?;
            let (out, rows) = orchestrator::transform_file(&pipeline, &input, output.as_deref())?;
            println!("Transformed {} rows -> {}", rows, out.display());
            Ok(())
        }
        Commands::Duplicates { file, limit } => {
            let path = file.unwrap_or_else(|| settings.canonical_path.clone());
            let pipeline = settings.pipeline()?;
            let (rows, dups) = orchestrator::duplicate_report(&pipeline, &path)?;
            if dups.is_empty() {
                println!("{}: {} rows, no repeated ids.", path.display(), rows);
                return Ok(());
            }
            let extra: usize = dups.iter().map(|(_, n)| n - 1).sum();
            println!("{:>12} | {:>5}", "job_id", "rows");
            println!("{}", "-".repeat(20));
            for (id, n) in dups.iter().take(limit) {
                println!("{:>12} | {:>5}", id, n);
            }
            println!(
                "\n{} rows, {} repeated ids, {} surplus rows in {}",
                rows,
                dups.len(),
                extra,
                path.display()
            );
            Ok(())
        }
        Commands::Inspect { page } => inspect(&settings, page).await,
        Commands::Stats => {
            let conn = open_ledger(&settings)?;
            let s = db::get_stats(&conn)?;
            println!("Crawls:          {} ({} failed)", s.crawls, s.failed_crawls);
            println!("Listings:        {}", s.records_crawled);
            println!("Last crawl:      {}", s.last_crawl.as_deref().unwrap_or("-"));
            println!("Merges:          {}", s.merges);
            println!("Merged dailies:  {}", s.merged_files);
            println!(
                "Canonical rows:  {}",
                s.canonical_rows.map(|n| n.to_string()).unwrap_or_else(|| "-".into())
            );
            println!(
                "Archive version: {}",
                s.archive_version.map(|n| n.to_string()).unwrap_or_else(|| "-".into())
            );

            let recent = db::recent_crawls(&conn, 5)?;
            if !recent.is_empty() {
                println!("\n--- Recent crawls ---");
                for c in &recent {
                    println!(
                        "  {} {:<11} cutoff {:<10} {:>3} pages {:>5} listings  {}",
                        c.run_date,
                        c.mode,
                        c.cutoff.as_deref().unwrap_or("-"),
                        c.pages_fetched,
                        c.emitted,
                        c.stop_reason
                    );
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_ledger(settings: &Settings) -> anyhow::Result<rusqlite::Connection> {
    let conn = db::connect(&settings.db_path)
        .with_context(|| format!("opening ledger {}", settings.db_path.display()))?;
    db::init_schema(&conn)?;
    Ok(conn)
}

async fn crawl(
    settings: &Settings,
    conn: &rusqlite::Connection,
    cutoff: Option<CutoffSpec>,
    full: bool,
) -> anyhow::Result<()> {
    let today = dates::today();
    let mode = if full {
        CrawlMode::Full
    } else {
        let spec = cutoff.unwrap_or(settings.cutoff_date);
        CrawlMode::Incremental {
            cutoff: orchestrator::resolve_cutoff(settings, spec, today),
        }
    };

    let fetcher = HttpFetcher::new(settings.fetch_config())?;
    let out = orchestrator::crawl_to_snapshot(settings, conn, &fetcher, mode, today).await?;

    match out.cutoff {
        Some(c) => println!(
            "Crawled {} pages since {}: {} listings ({}).",
            out.report.pages_fetched,
            c,
            out.report.records.len(),
            out.report.stop
        ),
        None => println!(
            "Crawled {} pages: {} listings ({}).",
            out.report.pages_fetched,
            out.report.records.len(),
            out.report.stop
        ),
    }
    if let Some(path) = &out.snapshot {
        println!("Snapshot: {}", path.display());
    }
    if out.report.stop.is_fatal() {
        bail!("crawl failed: {}", out.report.stop);
    }
    Ok(())
}

fn merge(settings: &Settings, conn: &rusqlite::Connection) -> anyhow::Result<()> {
    let pipeline = settings.pipeline()?;
    let archive = settings.archive_dir.as_ref().map(LocalArchive::new);
    let archive_ref = archive.as_ref().map(|a| a as &dyn DatasetArchive);

    let Some(out) = orchestrator::merge_snapshots(settings, conn, archive_ref, &pipeline)? else {
        println!("Nothing to merge (no base snapshot and no pending daily files).");
        return Ok(());
    };

    println!("Merged {} inputs: {}", out.inputs.len(), out.inputs.join(", "));
    println!(
        "{} rows in, {} rows out, {} repeated ids ({} rows without id).",
        out.report.rows_in,
        out.report.rows_out(),
        out.report.duplicates.len(),
        out.report.empty_ids
    );
    println!("Canonical: {}", out.canonical.display());
    if let Some(v) = out.archive_version {
        println!("Archived as version {}", v);
    }
    Ok(())
}

async fn inspect(settings: &Settings, page: usize) -> anyhow::Result<()> {
    let url = crawler::listing_url(&settings.base_url()?, page)?;
    let fetcher = HttpFetcher::new(settings.fetch_config())?;
    let html = fetcher.fetch(&url).await?;
    let listing = extract::parse_listing_page(&html, &url);
    let cutoff = orchestrator::resolve_cutoff(settings, settings.cutoff_date, dates::today())
        .format("%Y-%m-%d")
        .to_string();

    println!("{}", url);
    println!(
        "{:>3} | {:<10} | {:<3} | {:<32} | {:<14} | {:<24} | {:<12}",
        "#", "Posted", "New", "Title", "Country", "University", "Deadline"
    );
    println!("{}", "-".repeat(116));
    for (i, r) in listing.records.iter().enumerate() {
        let posted = dates::parse_posted_on(&r.posted_on)
            .map(|d| d.to_string())
            .unwrap_or_else(|| "?".into());
        let new = if dates::in_range(&r.posted_on, &cutoff) { "yes" } else { "no" };
        println!(
            "{:>3} | {:<10} | {:<3} | {:<32} | {:<14} | {:<24} | {:<12}",
            i + 1,
            posted,
            new,
            truncate(&r.job_title, 32),
            truncate(&r.job_country, 14),
            truncate(&r.university, 24),
            truncate(&r.application_deadline, 12)
        );
    }
    println!(
        "\n{} listings | cutoff {} | last page: {}",
        listing.records.len(),
        cutoff,
        listing
            .last_page
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".into())
    );
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
