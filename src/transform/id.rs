use rayon::prelude::*;

use super::{Stage, TransformError, Transformer};
use crate::dataset::Dataset;

pub const SOURCE_COLUMN: &str = "job_link";
pub const ID_COLUMN: &str = "job_id";

/// `job_id` from the last path segment of `job_link`.
pub struct IdExtraction;

pub fn job_id(link: &str) -> &str {
    link.trim().rsplit('/').next().unwrap_or_default()
}

impl Transformer for IdExtraction {
    fn name(&self) -> &'static str {
        "id"
    }

    fn stage(&self) -> Stage {
        Stage::Identity
    }

    fn process(&self, mut dataset: Dataset) -> Result<Dataset, TransformError> {
        let column_err = |dataset: &Dataset, source| TransformError::Column {
            transform: "id",
            dataset: dataset.name().to_string(),
            source,
        };

        let ids: Vec<String> = dataset
            .column(SOURCE_COLUMN)
            .map_err(|e| column_err(&dataset, e))?
            .par_iter()
            .map(|link| job_id(link).to_string())
            .collect();

        dataset
            .set_column(ID_COLUMN, ids)
            .map_err(|e| column_err(&dataset, e))?;
        Ok(dataset)
    }
}
