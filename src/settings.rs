use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::dates::CutoffSpec;
use crate::fetch::FetchConfig;
use crate::merge::DuplicatePolicy;
use crate::transform::Pipeline;

/// Runtime settings: `vacancies.toml` if present, then `VACANCIES_*` env vars.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub cutoff_date: CutoffSpec,
    pub output_dir: PathBuf,
    pub daily_dir: PathBuf,
    pub canonical_path: PathBuf,
    /// Output of a full-history crawl; seeds the first merge.
    pub bootstrap_path: PathBuf,
    pub db_path: PathBuf,
    pub archive_dir: Option<PathBuf>,
    pub download_delay_ms: u64,
    pub randomize_delay: bool,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
    pub user_agent: Option<String>,
    pub max_pages: Option<usize>,
    pub duplicate_policy: DuplicatePolicy,
    pub transforms: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "https://euraxess.ec.europa.eu".to_string(),
            cutoff_date: CutoffSpec::Today,
            output_dir: PathBuf::from("output"),
            daily_dir: PathBuf::from("output/daily"),
            canonical_path: PathBuf::from("output/transformed/jobs_combined.csv"),
            bootstrap_path: PathBuf::from("output/jobs.csv"),
            db_path: PathBuf::from("data/vacancies.sqlite"),
            archive_dir: None,
            download_delay_ms: 10_000,
            randomize_delay: true,
            max_retries: 3,
            request_timeout_secs: 30,
            user_agent: None,
            max_pages: None,
            duplicate_policy: DuplicatePolicy::KeepLast,
            transforms: vec!["id".to_string(), "time".to_string()],
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::from_builder(
            Config::builder().add_source(File::with_name("vacancies").required(false)),
        )
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("VACANCIES")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("transforms"),
            )
            .build()
            .context("loading configuration")?
            .try_deserialize()
            .context("parsing configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.base_url()?;
        if self.duplicate_policy == DuplicatePolicy::KeepAll {
            bail!(
                "duplicate_policy 'all' would leave duplicates in the canonical snapshot; \
                 use 'first' or 'last'"
            );
        }
        if self.transforms.is_empty() {
            bail!("transforms must name at least one transform");
        }
        self.pipeline()?;
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.base_url).with_context(|| format!("invalid base_url '{}'", self.base_url))
    }

    pub fn pipeline(&self) -> Result<Pipeline> {
        Ok(Pipeline::builder().with_names(&self.transforms)?.build())
    }

    pub fn fetch_config(&self) -> FetchConfig {
        let defaults = FetchConfig::default();
        FetchConfig {
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            delay: Duration::from_millis(self.download_delay_ms),
            randomize_delay: self.randomize_delay,
            max_retries: self.max_retries,
            timeout: Duration::from_secs(self.request_timeout_secs),
            ..defaults
        }
    }
}
