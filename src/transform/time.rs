use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::warn;

use super::{Stage, TransformError, Transformer};
use crate::dataset::Dataset;
use crate::dates::{self, SENTINEL};

const POSTED_PREFIX: &str = "Posted on: ";

/// (source column, derived column, how to cut the date text out of the source)
const DERIVATIONS: [(&str, &str, fn(&str) -> &str); 2] = [
    ("posted_on", "posted_on_date", posted_part),
    ("application_deadline", "application_deadline_date", deadline_part),
];

/// Calendar dates for the posting and deadline columns, as `YYYY-MM-DD`.
pub struct TimeExtraction;

fn posted_part(raw: &str) -> &str {
    raw.split_once(POSTED_PREFIX).map_or(raw, |(_, rest)| rest)
}

/// "30 Apr 2024 - 23:59 (Europe/Brussels)" -> "30 Apr 2024 ". ISO dates pass whole.
fn deadline_part(raw: &str) -> &str {
    let trimmed = raw.trim();
    if NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").is_ok() {
        return trimmed;
    }
    raw.split('-').next().unwrap_or(raw)
}

pub fn normalize_date(text: &str) -> String {
    dates::parse_calendar_date(text)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| SENTINEL.to_string())
}

impl Transformer for TimeExtraction {
    fn name(&self) -> &'static str {
        "time"
    }

    fn stage(&self) -> Stage {
        Stage::Derive
    }

    fn process(&self, mut dataset: Dataset) -> Result<Dataset, TransformError> {
        for (source, target, cut) in DERIVATIONS {
            let values: Vec<String> = match dataset.column(source) {
                Ok(raw) => raw.par_iter().map(|v| normalize_date(cut(*v))).collect(),
                Err(_) => {
                    warn!(
                        "'{}' has no '{}' column, filling '{}' with {}",
                        dataset.name(),
                        source,
                        target,
                        SENTINEL
                    );
                    vec![SENTINEL.to_string(); dataset.len()]
                }
            };
            dataset
                .set_column(target, values)
                .map_err(|e| TransformError::Column {
                    transform: "time",
                    dataset: dataset.name().to_string(),
                    source: e,
                })?;
        }
        Ok(dataset)
    }
}
