pub mod http_client;
pub mod wire;

use crate::config::ProviderConfig;
use crate::gap::DateRange;
use crate::models::DailyFigures;
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use self::http_client::HttpClient;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transient transport failure surfaced outside the retry loop.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The bounded retry loop ran out of attempts. Fatal for the whole
    /// collector run: skipping the window would leave a permanent hole.
    #[error("no usable response from {url} after {attempts} attempts")]
    RetriesExhausted { url: String, attempts: u32 },

    /// The provider answered but not in the shape this client understands.
    #[error("unexpected payload: {0}")]
    Payload(String),
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable upstream abstraction: one slot per consecutive calendar date
/// starting at `range.start`.
#[async_trait]
pub trait WeatherDataSource: Send + Sync {
    async fn fetch_daily(&self, range: DateRange) -> Result<Vec<DailyFigures>, ProviderError>;
}

// ── weather.com provider ──────────────────────────────────────────────────────

pub struct WeatherComProvider {
    client: HttpClient,
    endpoint: String,
    geocode: String,
}

impl WeatherComProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            geocode: config.geocode.clone(),
        })
    }
}

#[async_trait]
impl WeatherDataSource for WeatherComProvider {
    async fn fetch_daily(&self, range: DateRange) -> Result<Vec<DailyFigures>, ProviderError> {
        info!("Fetching daily figures for {} ({} days)", range, range.len_days());

        let payload = wire::almanac_request(&self.geocode, range);
        let raw = self.client.post_json(&self.endpoint, &payload).await?;

        wire::parse_almanac_response(&raw, range)
    }
}
