//! Incremental crawl over the newest-first listings feed.
//!
//! Pages are fetched one at a time, in order. Each page is classified before
//! the next is requested:
//!
//! - no listing nodes: stop (`Empty`)
//! - a record whose posted date cannot be read: skipped
//! - a record older than the cutoff: stop (`Boundary`), rest of the page dropped
//! - a link already seen in this run: stop (`Duplicate`)
//! - otherwise the record is emitted
//!
//! A page that emits nothing without hitting the boundary also stops the crawl
//! (`Empty`), so malformed pages cannot make it paginate forever.

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use indicatif::ProgressBar;
use tracing::{info, warn};
use url::Url;

use crate::dates;
use crate::extract;
use crate::fetch::PageSource;
use crate::record::VacancyRecord;

const LISTING_PATH: &str = "/jobs/search?sort%5Bname%5D=created&sort%5Bdirection%5D=DESC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    /// Stop at the first listing posted before `cutoff`.
    Incremental { cutoff: NaiveDate },
    /// Walk the whole feed, up to the advertised last page.
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Boundary,
    Duplicate { job_link: String },
    Empty,
    LastPage,
    PageLimit,
    FetchFailed { url: String, error: String },
}

impl StopReason {
    /// Only transport failure makes the run unsuccessful.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StopReason::FetchFailed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            StopReason::Boundary => "boundary",
            StopReason::Duplicate { .. } => "duplicate",
            StopReason::Empty => "empty",
            StopReason::LastPage => "last_page",
            StopReason::PageLimit => "page_limit",
            StopReason::FetchFailed { .. } => "fetch_failed",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Duplicate { job_link } => write!(f, "duplicate listing {}", job_link),
            StopReason::FetchFailed { url, error } => {
                write!(f, "fetch of {} failed: {}", url, error)
            }
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Transition {
    Continue,
    Stop(StopReason),
}

#[derive(Debug)]
pub struct PageVerdict {
    pub emitted: Vec<VacancyRecord>,
    pub transition: Transition,
}

/// Per-run crawl state. The seen-set only grows.
pub struct CrawlCursor {
    page: usize,
    mode: CrawlMode,
    seen: HashSet<String>,
}

impl CrawlCursor {
    pub fn new(mode: CrawlMode) -> Self {
        Self {
            page: 0,
            mode,
            seen: HashSet::new(),
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    #[cfg(test)]
    pub fn seen(&self) -> usize {
        self.seen.len()
    }

    pub fn advance(&mut self) {
        self.page += 1;
    }

    /// Classify one page's records, top to bottom.
    pub fn classify(&mut self, records: Vec<VacancyRecord>) -> PageVerdict {
        if records.is_empty() {
            if self.page == 0 {
                info!("First listings page is empty, nothing to collect");
            }
            return PageVerdict {
                emitted: Vec::new(),
                transition: Transition::Stop(StopReason::Empty),
            };
        }

        let mut emitted = Vec::new();
        for record in records {
            if let CrawlMode::Incremental { cutoff } = self.mode {
                let Some(posted) = dates::parse_posted_on(&record.posted_on) else {
                    warn!(
                        "Skipping listing {} on page {}: unreadable posted date '{}'",
                        record.job_link, self.page, record.posted_on
                    );
                    continue;
                };
                if posted < cutoff {
                    info!(
                        "Reached {} on page {}, older than cutoff {}",
                        posted, self.page, cutoff
                    );
                    return PageVerdict {
                        emitted,
                        transition: Transition::Stop(StopReason::Boundary),
                    };
                }
            }

            if record.job_link.is_empty() {
                warn!("Skipping listing '{}' on page {}: no link", record.job_title, self.page);
                continue;
            }

            if !self.seen.insert(record.job_link.clone()) {
                warn!(
                    "Listing {} seen twice in one run (page {}), aborting crawl",
                    record.job_link, self.page
                );
                return PageVerdict {
                    emitted,
                    transition: Transition::Stop(StopReason::Duplicate {
                        job_link: record.job_link,
                    }),
                };
            }
            emitted.push(record);
        }

        if emitted.is_empty() {
            warn!("Page {} yielded no usable listings, stopping", self.page);
            return PageVerdict {
                emitted,
                transition: Transition::Stop(StopReason::Empty),
            };
        }

        PageVerdict {
            emitted,
            transition: Transition::Continue,
        }
    }
}

pub fn listing_url(base: &Url, page: usize) -> Result<Url, url::ParseError> {
    base.join(&format!("{}&page={}", LISTING_PATH, page))
}

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub base_url: Url,
    pub mode: CrawlMode,
    pub max_pages: Option<usize>,
}

#[derive(Debug)]
pub struct CrawlReport {
    pub records: Vec<VacancyRecord>,
    pub pages_fetched: usize,
    pub stop: StopReason,
}

/// Drive the cursor against `source` until a terminal state.
/// Whatever was emitted before the stop is returned, including on fetch failure.
pub async fn crawl(
    source: &dyn PageSource,
    options: &CrawlOptions,
    pb: &ProgressBar,
) -> CrawlReport {
    let mut cursor = CrawlCursor::new(options.mode);
    let mut records = Vec::new();
    let mut pages_fetched = 0usize;
    let mut last_page: Option<usize> = None;

    let stop = loop {
        let page = cursor.page();
        if options.max_pages.is_some_and(|max| page >= max) {
            info!("Page limit reached after {} pages", page);
            break StopReason::PageLimit;
        }

        let url = match listing_url(&options.base_url, page) {
            Ok(u) => u,
            Err(e) => {
                break StopReason::FetchFailed {
                    url: options.base_url.to_string(),
                    error: e.to_string(),
                }
            }
        };

        pb.set_message(format!("page {} ({} listings)", page, records.len()));
        info!("Scraping listings page {}: {}", page, url);
        let html = match source.fetch(&url).await {
            Ok(html) => html,
            Err(e) => {
                warn!("Giving up on {}: {}", url, e);
                break StopReason::FetchFailed {
                    url: url.to_string(),
                    error: e.to_string(),
                };
            }
        };
        pages_fetched += 1;
        pb.inc(1);

        let listing = extract::parse_listing_page(&html, &url);
        if page == 0 && options.mode == CrawlMode::Full {
            last_page = listing.last_page;
            if let Some(n) = last_page {
                info!("Feed advertises {} pages", n);
            }
        }

        let verdict = cursor.classify(listing.records);
        records.extend(verdict.emitted);

        match verdict.transition {
            Transition::Stop(reason) => break reason,
            Transition::Continue => {
                if last_page.is_some_and(|n| page + 1 >= n) {
                    break StopReason::LastPage;
                }
                cursor.advance();
            }
        }
    };

    info!(
        "Crawl stopped ({}) after {} pages with {} listings",
        stop,
        pages_fetched,
        records.len()
    );
    CrawlReport {
        records,
        pages_fetched,
        stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{listing_html, paginated_listing_html, StaticSource};

    fn base() -> Url {
        Url::parse("https://euraxess.ec.europa.eu").unwrap()
    }

    fn cutoff() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    /// "Posted on" text for a listing `offset` days after the cutoff.
    fn posted(offset: i64) -> String {
        let d = cutoff() + chrono::Duration::days(offset);
        format!("Posted on: {}", d.format("%d %B %Y"))
    }

    fn options(mode: CrawlMode) -> CrawlOptions {
        CrawlOptions {
            base_url: base(),
            mode,
            max_pages: None,
        }
    }

    fn record(link: &str, posted: &str) -> VacancyRecord {
        VacancyRecord {
            job_link: link.to_string(),
            posted_on: posted.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn listing_url_keeps_sort_and_page() {
        let u = listing_url(&base(), 3).unwrap();
        assert_eq!(
            u.as_str(),
            "https://euraxess.ec.europa.eu/jobs/search?sort%5Bname%5D=created&sort%5Bdirection%5D=DESC&page=3"
        );
    }

    #[tokio::test]
    async fn stops_at_date_boundary() {
        // Days relative to a cutoff of 3: [5, 4, 4, 3, 2, 1], one listing per page.
        let days = [2, 1, 1, 0, -1, -2];
        let pages: Vec<String> = days
            .iter()
            .enumerate()
            .map(|(i, d)| listing_html(&[(format!("/jobs/{}", i).as_str(), posted(*d).as_str())]))
            .collect();
        let source = StaticSource::new(pages);

        let report = crawl(
            &source,
            &options(CrawlMode::Incremental { cutoff: cutoff() }),
            &ProgressBar::hidden(),
        )
        .await;

        assert_eq!(report.stop, StopReason::Boundary);
        assert_eq!(report.records.len(), 4);
        assert_eq!(report.records[3].job_link, "https://euraxess.ec.europa.eu/jobs/3");
        assert_eq!(source.requested(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn boundary_mid_page_discards_rest_of_page() {
        let pages = vec![
            listing_html(&[("/jobs/a", posted(2).as_str()), ("/jobs/b", posted(1).as_str())]),
            listing_html(&[
                ("/jobs/c", posted(0).as_str()),
                ("/jobs/d", posted(-1).as_str()),
                ("/jobs/e", posted(0).as_str()),
            ]),
            listing_html(&[("/jobs/f", posted(-3).as_str())]),
        ];
        let source = StaticSource::new(pages);
        let report = crawl(
            &source,
            &options(CrawlMode::Incremental { cutoff: cutoff() }),
            &ProgressBar::hidden(),
        )
        .await;

        let links: Vec<_> = report.records.iter().map(|r| r.job_link.as_str()).collect();
        assert_eq!(
            links,
            vec![
                "https://euraxess.ec.europa.eu/jobs/a",
                "https://euraxess.ec.europa.eu/jobs/b",
                "https://euraxess.ec.europa.eu/jobs/c",
            ]
        );
        assert_eq!(report.stop, StopReason::Boundary);
        assert_eq!(source.requested(), vec![0, 1]);
    }

    #[tokio::test]
    async fn repeated_page_aborts_with_duplicate() {
        let pages = vec![
            listing_html(&[("/jobs/w", posted(1).as_str()), ("/jobs/x", posted(1).as_str())]),
            listing_html(&[("/jobs/x", posted(1).as_str()), ("/jobs/y", posted(0).as_str())]),
            listing_html(&[("/jobs/z", posted(0).as_str())]),
        ];
        let source = StaticSource::new(pages);
        let report = crawl(
            &source,
            &options(CrawlMode::Incremental { cutoff: cutoff() }),
            &ProgressBar::hidden(),
        )
        .await;

        assert_eq!(
            report.stop,
            StopReason::Duplicate {
                job_link: "https://euraxess.ec.europa.eu/jobs/x".into()
            }
        );
        let x_count = report
            .records
            .iter()
            .filter(|r| r.job_link.ends_with("/jobs/x"))
            .count();
        assert_eq!(x_count, 1);
        assert_eq!(report.records.len(), 2);
        assert_eq!(source.requested(), vec![0, 1]);
    }

    #[tokio::test]
    async fn empty_first_page() {
        let source = StaticSource::new(vec![listing_html(&[])]);
        let report = crawl(
            &source,
            &options(CrawlMode::Incremental { cutoff: cutoff() }),
            &ProgressBar::hidden(),
        )
        .await;
        assert_eq!(report.stop, StopReason::Empty);
        assert!(report.records.is_empty());
        assert_eq!(report.pages_fetched, 1);
    }

    #[tokio::test]
    async fn unreadable_dates_are_skipped_not_fatal() {
        let pages = vec![
            listing_html(&[("/jobs/a", "Posted on: soon"), ("/jobs/b", posted(0).as_str())]),
            listing_html(&[("/jobs/c", "garbage"), ("/jobs/d", "")]),
            listing_html(&[("/jobs/e", posted(0).as_str())]),
        ];
        let source = StaticSource::new(pages);
        let report = crawl(
            &source,
            &options(CrawlMode::Incremental { cutoff: cutoff() }),
            &ProgressBar::hidden(),
        )
        .await;

        assert_eq!(report.records.len(), 1);
        assert!(report.records[0].job_link.ends_with("/jobs/b"));
        // Page 1 made no progress, so page 2 is never requested.
        assert_eq!(report.stop, StopReason::Empty);
        assert_eq!(source.requested(), vec![0, 1]);
    }

    #[tokio::test]
    async fn fetch_failure_keeps_partial_results() {
        let pages = vec![
            listing_html(&[("/jobs/a", posted(2).as_str())]),
            listing_html(&[("/jobs/b", posted(1).as_str())]),
        ];
        let source = StaticSource::new(pages).failing_at(1);
        let report = crawl(
            &source,
            &options(CrawlMode::Incremental { cutoff: cutoff() }),
            &ProgressBar::hidden(),
        )
        .await;

        assert!(report.stop.is_fatal());
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.pages_fetched, 1);
    }

    #[tokio::test]
    async fn full_mode_ignores_dates_and_honours_page_limit() {
        let pages = vec![
            listing_html(&[("/jobs/a", posted(-100).as_str()), ("/jobs/b", "unknown")]),
            listing_html(&[("/jobs/c", posted(-200).as_str())]),
            listing_html(&[("/jobs/d", posted(-300).as_str())]),
        ];
        let source = StaticSource::new(pages);
        let mut opts = options(CrawlMode::Full);
        opts.max_pages = Some(2);
        let report = crawl(&source, &opts, &ProgressBar::hidden()).await;

        assert_eq!(report.stop, StopReason::PageLimit);
        assert_eq!(report.records.len(), 3);
        assert_eq!(source.requested(), vec![0, 1]);
    }

    #[tokio::test]
    async fn full_mode_stops_at_advertised_last_page() {
        let pages = vec![
            paginated_listing_html(&[("/jobs/a", "Posted on: 1 May 2010")], 3),
            listing_html(&[("/jobs/b", "whenever")]),
            listing_html(&[("/jobs/c", "Posted on: 1 May 2011")]),
            listing_html(&[("/jobs/d", "Posted on: 1 May 2012")]),
        ];
        let source = StaticSource::new(pages);
        let report = crawl(&source, &options(CrawlMode::Full), &ProgressBar::hidden()).await;

        assert_eq!(report.stop, StopReason::LastPage);
        assert_eq!(report.records.len(), 3);
        assert_eq!(source.requested(), vec![0, 1, 2]);
    }

    #[test]
    fn cursor_skips_linkless_records() {
        let mut cursor = CrawlCursor::new(CrawlMode::Incremental { cutoff: cutoff() });
        let verdict = cursor.classify(vec![
            record("", posted(1).as_str()),
            record("https://x/jobs/1", posted(1).as_str()),
        ]);
        assert_eq!(verdict.transition, Transition::Continue);
        assert_eq!(verdict.emitted.len(), 1);
        assert_eq!(cursor.seen(), 1);
    }

    #[test]
    fn cursor_boundary_keeps_earlier_emissions() {
        let mut cursor = CrawlCursor::new(CrawlMode::Incremental { cutoff: cutoff() });
        let verdict = cursor.classify(vec![
            record("https://x/jobs/1", posted(0).as_str()),
            record("https://x/jobs/2", posted(-1).as_str()),
            record("https://x/jobs/3", posted(0).as_str()),
        ]);
        assert_eq!(verdict.transition, Transition::Stop(StopReason::Boundary));
        assert_eq!(verdict.emitted.len(), 1);
    }

    #[test]
    fn stop_reason_fatality() {
        assert!(!StopReason::Boundary.is_fatal());
        assert!(!StopReason::Duplicate { job_link: "x".into() }.is_fatal());
        assert!(!StopReason::Empty.is_fatal());
        assert!(StopReason::FetchFailed {
            url: "u".into(),
            error: "e".into()
        }
        .is_fatal());
    }
}
