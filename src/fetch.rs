use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("gave up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: String,
    },
    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Anything that can hand back the HTML of a listings page.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub accept_language: String,
    /// Pause between two consecutive requests.
    pub delay: Duration,
    /// Scale each pause by a random factor in [0.5, 1.5).
    pub randomize_delay: bool,
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            delay: Duration::from_secs(10),
            randomize_delay: true,
            max_retries: 3,
            base_backoff: Duration::from_millis(2000),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Rate-limited reqwest fetcher. Requests are serialized through `last_request`.
pub struct HttpFetcher {
    client: reqwest::Client,
    config: FetchConfig,
    last_request: Mutex<Option<Instant>>,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_str(&config.accept_language)?);

        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            config,
            last_request: Mutex::new(None),
        })
    }

    fn next_delay(&self) -> Duration {
        if self.config.randomize_delay {
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            self.config.delay.mul_f64(factor)
        } else {
            self.config.delay
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<String, FetchError> {
        {
            let mut last = self.last_request.lock().await;
            if let Some(prev) = *last {
                let wait = self.next_delay();
                let elapsed = prev.elapsed();
                if elapsed < wait {
                    tokio::time::sleep(wait - elapsed).await;
                }
            }
            *last = Some(Instant::now());
        }

        let start = Instant::now();
        let response = self.client.get(url.as_str()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.text().await?;
        debug!("Fetched {} ({} bytes) in {}ms", url, body.len(), start.elapsed().as_millis());
        Ok(body)
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let backoff = self.config.base_backoff * 2u32.pow(attempt);
                    warn!(
                        "Fetch of {} failed (attempt {}/{}): {}, backing off {:.1}s",
                        url,
                        attempt + 1,
                        self.config.max_retries,
                        e,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) if attempt > 0 => {
                    return Err(FetchError::Exhausted {
                        url: url.to_string(),
                        attempts: attempt + 1,
                        last: e.to_string(),
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }
}
