//! Column-deriving transforms and the pipeline that orders them.

mod id;
mod time;

use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

use crate::dataset::{Dataset, DatasetError};

pub use id::IdExtraction;
pub use time::TimeExtraction;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("transform '{transform}' on '{dataset}': {source}")]
    Column {
        transform: &'static str,
        dataset: String,
        #[source]
        source: DatasetError,
    },
    #[error("transform '{transform}' changed row count of '{dataset}' from {before} to {after}")]
    RowCount {
        transform: &'static str,
        dataset: String,
        before: usize,
        after: usize,
    },
    #[error("unknown transform '{0}' (known: id, time)")]
    Unknown(String),
}

/// Ordering class. Every `Identity` transform runs before any `Derive` one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Identity,
    Derive,
}

pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;
    fn stage(&self) -> Stage;
    fn process(&self, dataset: Dataset) -> Result<Dataset, TransformError>;
}

/// Every transform the crate knows about, by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    Id,
    Time,
}

impl TransformKind {
    pub const ALL: [TransformKind; 2] = [TransformKind::Id, TransformKind::Time];

    pub fn name(self) -> &'static str {
        match self {
            TransformKind::Id => "id",
            TransformKind::Time => "time",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, TransformError> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| TransformError::Unknown(name.to_string()))
    }

    pub fn build(self) -> Box<dyn Transformer> {
        match self {
            TransformKind::Id => Box::new(IdExtraction),
            TransformKind::Time => Box::new(TimeExtraction),
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    transformers: Vec<Box<dyn Transformer>>,
}

impl PipelineBuilder {
    pub fn with(mut self, kind: TransformKind) -> Self {
        self.transformers.push(kind.build());
        self
    }

    pub fn with_names<S: AsRef<str>>(mut self, names: &[S]) -> Result<Self, TransformError> {
        for name in names {
            self = self.with(TransformKind::from_name(name.as_ref())?);
        }
        Ok(self)
    }

    #[cfg(test)]
    pub fn with_transformer(mut self, transformer: Box<dyn Transformer>) -> Self {
        self.transformers.push(transformer);
        self
    }

    /// Sort by stage; insertion order is kept within a stage.
    pub fn build(mut self) -> Pipeline {
        self.transformers.sort_by_key(|t| t.stage());
        Pipeline {
            transformers: self.transformers,
        }
    }
}

pub struct Pipeline {
    transformers: Vec<Box<dyn Transformer>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// All registered transforms.
    #[cfg(test)]
    pub fn standard() -> Self {
        TransformKind::ALL
            .into_iter()
            .fold(Self::builder(), PipelineBuilder::with)
            .build()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }

    pub fn run(&self, mut dataset: Dataset) -> Result<Dataset, TransformError> {
        for t in &self.transformers {
            let before = dataset.len();
            let name = dataset.name().to_string();
            dataset = t.process(dataset)?;
            if dataset.len() != before {
                return Err(TransformError::RowCount {
                    transform: t.name(),
                    dataset: name,
                    before,
                    after: dataset.len(),
                });
            }
            debug!("Applied '{}' to '{}'", t.name(), name);
        }
        info!(
            "Transformed '{}' ({} rows) with [{}]",
            dataset.name(),
            dataset.len(),
            self.names().join(", ")
        );
        Ok(dataset)
    }
}
