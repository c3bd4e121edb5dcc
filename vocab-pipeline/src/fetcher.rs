use crate::traits::{LookupOutcome, PopularityLookup};
use crate::types::{PageviewConfig, PipelineError, Result};
use crate::utils::time::is_valid_yyyymmdd;
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Deserialize)]
struct PageviewResponse {
    #[serde(default)]
    items: Vec<PageviewItem>,
}

#[derive(Debug, Deserialize)]
struct PageviewItem {
    #[serde(default)]
    views: u64,
}

/// Per-article pageview totals from the Wikimedia REST API.
pub struct WikimediaPageviews {
    client: Client,
    config: PageviewConfig,
    rate_limiter: Arc<RwLock<HashMap<String, Instant>>>,
}

impl WikimediaPageviews {
    pub fn new(config: PageviewConfig) -> Result<Self> {
        for date in [&config.start, &config.end] {
            if !is_valid_yyyymmdd(date) {
                return Err(PipelineError::Config(format!(
                    "pageview window dates must be YYYYMMDD, got {:?}",
                    date
                )));
            }
        }
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            config,
            rate_limiter: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &PageviewConfig {
        &self.config
    }

    /// `{base}/{project}/{access}/{agent}/{title}/{granularity}/{start}/{end}`
    ///
    /// Spaces in the title become underscores; every segment is percent-encoded,
    /// so a `/` inside a title cannot change the path shape.
    pub fn article_url(&self, word: &str) -> Result<Url> {
        let mut url = Url::parse(&self.config.api_base)?;
        let title = word.replace(' ', "_");
        url.path_segments_mut()
            .map_err(|_| {
                PipelineError::Config(format!("api base cannot be a base URL: {}", self.config.api_base))
            })?
            .pop_if_empty()
            .extend([
                self.config.project.as_str(),
                self.config.access.as_str(),
                self.config.agent.as_str(),
                title.as_str(),
                self.config.granularity.as_str(),
                self.config.start.as_str(),
                self.config.end.as_str(),
            ]);
        Ok(url)
    }

    fn retry_policy(&self) -> ExponentialBackoff<backoff::SystemClock> {
        let base = Duration::from_millis(self.config.retry_delay_ms.max(1));
        ExponentialBackoff {
            current_interval: base,
            initial_interval: base,
            max_interval: base * 32,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    async fn apply_rate_limit(&self, url: &Url) {
        let host = url.host_str().unwrap_or("").to_string();
        let min_interval = Duration::from_millis(self.config.min_request_interval_ms);

        let mut rate_limiter = self.rate_limiter.write().await;
        if let Some(last_request) = rate_limiter.get(&host) {
            let elapsed = last_request.elapsed();
            if elapsed < min_interval {
                let wait_time = min_interval - elapsed;
                debug!("Rate limiting {}: waiting {:?}", host, wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }
        rate_limiter.insert(host, Instant::now());
    }

    async fn fetch_once(&self, url: &Url) -> Result<LookupOutcome> {
        self.apply_rate_limit(url).await;
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(LookupOutcome::NotFound);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(PipelineError::RateLimited { retry_after_secs });
        }

        if status.is_server_error() {
            return Err(PipelineError::Transient(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        if !status.is_success() {
            return Err(PipelineError::MalformedResponse(format!(
                "HTTP {} for {}",
                status, url
            )));
        }

        let body: PageviewResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::MalformedResponse(e.to_string()))?;
        Ok(LookupOutcome::Views(body.items.iter().map(|item| item.views).sum()))
    }
}

#[async_trait]
impl PopularityLookup for WikimediaPageviews {
    fn lookup_name(&self) -> String {
        format!("Wikimedia pageviews ({})", self.config.project)
    }

    async fn fetch_views(&self, word: &str) -> Result<LookupOutcome> {
        let url = self.article_url(word)?;
        let mut backoff = self.retry_policy();
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.fetch_once(&url).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() => {
                    if attempt < self.config.max_retries {
                        let mut delay = backoff.next_backoff().unwrap_or_default();
                        if let PipelineError::RateLimited { retry_after_secs: Some(secs) } = &e {
                            delay = delay.max(Duration::from_secs(*secs));
                        }
                        warn!("Attempt {} failed for {}, retrying in {:?}: {}", attempt + 1, word, delay, e);
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let error_msg = last_error.map(|e| e.to_string()).unwrap_or_else(|| "Unknown error".to_string());
        Err(PipelineError::Transient(format!(
            "{} failed after {} attempts: {}",
            word,
            self.config.max_retries + 1,
            error_msg
        )))
    }
}
