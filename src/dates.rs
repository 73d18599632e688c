use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDate};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Format of the listing's "Posted on" line once the prefix is gone.
const POSTED_FORMAT: &str = "%d %B %Y";
const POSTED_PREFIX: &str = "Posted on:";

/// Formats accepted when deriving calendar dates from raw columns.
const CALENDAR_FORMATS: &[&str] = &["%d %B %Y", "%d %b %Y", "%Y-%m-%d"];

/// Written in place of a date that could not be parsed. Sorts before anything real.
pub const SENTINEL: &str = "1901-01-01";

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Parse a "Posted on: 24 January 2024" style string. Commas are ignored.
pub fn parse_posted_on(raw: &str) -> Option<NaiveDate> {
    let cleaned = raw.replace(POSTED_PREFIX, "").replace(',', "");
    NaiveDate::parse_from_str(cleaned.trim(), POSTED_FORMAT).ok()
}

/// Lenient calendar date parse used by the transforms.
pub fn parse_calendar_date(text: &str) -> Option<NaiveDate> {
    let cleaned = text.replace(',', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    CALENDAR_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(cleaned, fmt).ok())
}

/// True when `raw_date` is on or after `cutoff` (`YYYY-MM-DD` or `today`).
/// Anything unparseable on either side is excluded.
pub fn in_range(raw_date: &str, cutoff: &str) -> bool {
    let cutoff_date = if cutoff.trim().eq_ignore_ascii_case("today") {
        today()
    } else {
        match NaiveDate::parse_from_str(cutoff.trim(), "%Y-%m-%d") {
            Ok(d) => d,
            Err(e) => {
                warn!("Cannot parse cutoff date '{}': {}", cutoff, e);
                return false;
            }
        }
    };

    match parse_posted_on(raw_date) {
        Some(d) => d >= cutoff_date,
        None => {
            warn!("Cannot parse posted date '{}'", raw_date);
            false
        }
    }
}

#[derive(Debug, Error)]
pub enum CutoffError {
    #[error("invalid cutoff '{0}': expected 'today', 'latest', YYYY-MM-DD or DD-MM-YYYY")]
    Invalid(String),
}

/// Configured cutoff, resolved once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum CutoffSpec {
    Today,
    /// Newest posting date already in the canonical snapshot.
    Latest,
    Date(NaiveDate),
}

impl CutoffSpec {
    pub fn resolve(&self, today: NaiveDate, latest_known: Option<NaiveDate>) -> NaiveDate {
        match self {
            CutoffSpec::Today => today,
            CutoffSpec::Latest => latest_known.unwrap_or(today),
            CutoffSpec::Date(d) => *d,
        }
    }
}

impl Default for CutoffSpec {
    fn default() -> Self {
        CutoffSpec::Today
    }
}

impl FromStr for CutoffSpec {
    type Err = CutoffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        if t.eq_ignore_ascii_case("today") {
            return Ok(CutoffSpec::Today);
        }
        if t.eq_ignore_ascii_case("latest") {
            return Ok(CutoffSpec::Latest);
        }
        NaiveDate::parse_from_str(t, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(t, "%d-%m-%Y"))
            .map(CutoffSpec::Date)
            .map_err(|_| CutoffError::Invalid(s.to_string()))
    }
}

impl TryFrom<String> for CutoffSpec {
    type Error = CutoffError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for CutoffSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CutoffSpec::Today => write!(f, "today"),
            CutoffSpec::Latest => write!(f, "latest"),
            CutoffSpec::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}
