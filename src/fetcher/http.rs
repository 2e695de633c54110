//! Resilient HTTP GET helper
//!
//! Wraps a shared `reqwest::Client` with the retry discipline used across
//! the crate: `tries - 1` guarded attempts treating both transport failures
//! and non-2xx statuses as recoverable, then one final unguarded attempt
//! whose error propagates.

use std::time::Duration;

use reqwest::{Client, Response};
use tracing::warn;

use super::{FetcherError, FetcherResult};

/// HTTP client with built-in bounded retry.
#[derive(Debug, Clone)]
pub struct ResilientHttpClient {
    client: Client,
    tries: u32,
    delay: f64,
}

impl ResilientHttpClient {
    /// Create a client.
    ///
    /// # Arguments
    /// * `tries` - total attempts per request (clamped to at least 1)
    /// * `delay` - wait between attempts, in seconds
    /// * `timeout` - per-request timeout
    ///
    /// # Errors
    /// Returns an error if the underlying client cannot be constructed.
    pub fn new(tries: u32, delay: f64, timeout: Duration) -> FetcherResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetcherError::Network(e.to_string()))?;
        Ok(Self {
            client,
            tries: tries.max(1),
            delay,
        })
    }

    /// Execute a GET request with query parameters.
    ///
    /// Retries transport failures and non-2xx statuses `tries - 1` times
    /// with a fixed wait, then performs one unguarded final attempt.
    ///
    /// # Errors
    /// `FetcherError::Network` for transport failures and
    /// `FetcherError::Http` for non-success statuses on the final attempt.
    pub async fn get(&self, url: &str, params: &[(&str, String)]) -> FetcherResult<Response> {
        let mut remaining = self.tries;

        while remaining > 1 {
            match self.attempt(url, params).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    remaining -= 1;
                    warn!(
                        "request failed: {e}. {remaining} attempts left, waiting {:.1}s",
                        self.delay
                    );
                    tokio::time::sleep(Duration::from_secs_f64(self.delay.max(0.0))).await;
                }
            }
        }

        // Final attempt runs unguarded.
        self.attempt(url, params).await
    }

    async fn attempt(&self, url: &str, params: &[(&str, String)]) -> FetcherResult<Response> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| FetcherError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetcherError::Http(format!("{status} for {url}")));
        }
        Ok(response)
    }
}
