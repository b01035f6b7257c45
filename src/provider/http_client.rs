use crate::config::ProviderConfig;
use crate::provider::ProviderError;
use anyhow::{Context, Result};
use rand::RngExt;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

pub struct HttpClient {
    inner: reqwest::Client,
    config: ProviderConfig,
}

impl HttpClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    /// POST a JSON body and return the decoded JSON response, with
    /// rate-limiting and a bounded retry loop.
    ///
    /// Network errors, non-success statuses and unreadable bodies all count
    /// against the same attempt budget, with linearly growing backoff
    /// between attempts. Running out of attempts is the caller's fatal
    /// condition, not a skip.
    pub async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ProviderError> {
        self.polite_delay().await;

        let max_attempts = self.config.max_retries + 1;

        for attempt in 1..=max_attempts {
            debug!("POST {} (attempt {}/{})", url, attempt, max_attempts);

            match self.inner.post(url).json(body).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        match resp.json::<Value>().await {
                            Ok(decoded) => return Ok(decoded),
                            Err(e) => {
                                warn!("Unreadable response body on attempt {}: {}", attempt, e);
                            }
                        }
                    } else {
                        warn!("HTTP {} on attempt {}", status, attempt);
                    }
                }
                Err(e) => {
                    warn!("Request failed on attempt {}: {}", attempt, e);
                }
            }

            if attempt < max_attempts {
                let backoff =
                    Duration::from_secs(self.config.retry_base_delay_secs) * attempt;
                warn!("Retrying {} in {:?}", url, backoff);
                sleep(backoff).await;
            }
        }

        Err(ProviderError::RetriesExhausted {
            url: url.to_string(),
            attempts: max_attempts,
        })
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter = rand::rng().random_range(0..=self.config.jitter_ms);
        let total = Duration::from_millis(self.config.request_delay_ms + jitter);
        sleep(total).await;
    }
}
