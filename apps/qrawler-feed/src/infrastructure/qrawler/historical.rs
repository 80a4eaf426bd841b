//! Qrawler Historical HTTP Client
//!
//! Implements [`HistoricalEndpoint`] against
//! `GET {base}/ohlc?symbol&venue&feed&from&to&resolution`, which answers with
//! a JSON array of [`OhlcRow`]s.
//!
//! The port is synchronous: requests are driven on the runtime behind the
//! stored [`Handle`], so `fetch_ohlc` must be called from a blocking thread,
//! never from inside an async task.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;

use super::messages::OhlcRow;
use crate::application::ports::{HistoricalEndpoint, OhlcQuery, ProviderOhlcRecord};
use crate::error::{FeedError, FeedResult};

/// Timestamp format of the `from` and `to` query parameters.
const QUERY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Historical client configuration.
#[derive(Debug, Clone)]
pub struct HistoricalClientConfig {
    /// Endpoint base URL, without trailing slash.
    pub base_url: String,
    /// Per-request timeout; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl HistoricalClientConfig {
    /// Configuration without a request timeout.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: None,
        }
    }

    /// Set a per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP client for the historical OHLC endpoint.
#[derive(Debug)]
pub struct QrawlerHistoricalClient {
    client: reqwest::Client,
    base_url: String,
    runtime: Handle,
}

impl QrawlerHistoricalClient {
    /// Create a client whose requests run on `runtime`.
    ///
    /// # Errors
    ///
    /// `ProviderUnavailable` if the HTTP client cannot be built.
    pub fn new(config: &HistoricalClientConfig, runtime: Handle) -> FeedResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| FeedError::ProviderUnavailable(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            runtime,
        })
    }

    fn format_time(time: DateTime<Utc>) -> String {
        time.format(QUERY_TIME_FORMAT).to_string()
    }

    async fn request(&self, query: &OhlcQuery) -> FeedResult<Vec<OhlcRow>> {
        let url = format!("{}/ohlc", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", query.ticker.as_str()),
                ("venue", query.venue.as_str()),
                ("feed", query.feed_code.as_str()),
                ("from", Self::format_time(query.start_utc).as_str()),
                ("to", Self::format_time(query.end_utc).as_str()),
                ("resolution", query.resolution.code()),
            ])
            .send()
            .await
            .map_err(|e| {
                FeedError::ProviderUnavailable(format!("historical request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::ProviderUnavailable(format!(
                "historical endpoint returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| FeedError::ProviderUnavailable(format!("historical payload: {e}")))
    }
}

impl HistoricalEndpoint for QrawlerHistoricalClient {
    fn fetch_ohlc(&self, query: &OhlcQuery) -> FeedResult<Vec<ProviderOhlcRecord>> {
        tracing::debug!(
            ticker = %query.ticker,
            feed = %query.feed_code,
            resolution = query.resolution.code(),
            "Requesting historical OHLC"
        );
        let rows = self.runtime.block_on(self.request(query))?;
        Ok(rows.into_iter().map(ProviderOhlcRecord::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn base_url_loses_trailing_slash() {
        let config = HistoricalClientConfig::new("http://qrawler.local/api/");
        assert_eq!(config.base_url, "http://qrawler.local/api");
        assert_eq!(config.timeout, None);
    }

    #[test]
    fn query_times_are_utc_seconds() {
        let time = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 5).unwrap();
        assert_eq!(
            QrawlerHistoricalClient::format_time(time),
            "2024-01-02T09:30:05Z"
        );
    }
}
