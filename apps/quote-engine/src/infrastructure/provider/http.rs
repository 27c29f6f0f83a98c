//! REST Quote Provider
//!
//! [`QuoteProvider`] over the provider's HTTP API. One request per call, no
//! retries: pacing and quota are the scheduler's job, and failures fall
//! through to the synthetic generator.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::codec::parse_quote;
use crate::application::ports::{ProviderError, QuoteProvider};
use crate::domain::clock::SharedClock;
use crate::domain::quote::Quote;
use crate::infrastructure::config::Credentials;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-Finnhub-Token";

/// HTTP quote provider.
#[derive(Clone)]
pub struct HttpQuoteProvider {
    client: Client,
    base_url: String,
    credentials: Credentials,
    clock: SharedClock,
}

impl std::fmt::Debug for HttpQuoteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpQuoteProvider")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl HttpQuoteProvider {
    /// Create a provider for `base_url` (e.g. `https://finnhub.io/api/v1`).
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Network` if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        timeout: Duration,
        clock: SharedClock,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            clock,
        })
    }
}

#[async_trait]
impl QuoteProvider for HttpQuoteProvider {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, ProviderError> {
        let url = format!("{}/quote", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol)])
            .header(API_KEY_HEADER, self.credentials.api_key())
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if let Some(error) = categorize_status(status) {
            tracing::debug!(symbol, status = status.as_u16(), "Quote request rejected");
            return Err(error);
        }

        let body = response.text().await.map_err(map_transport_error)?;
        let quote = parse_quote(symbol, &body, self.clock.now())?;

        tracing::trace!(symbol, price = %quote.current_price, "Quote fetched");
        Ok(quote)
    }
}

/// Map a non-success status to its error, `None` for success.
fn categorize_status(status: StatusCode) -> Option<ProviderError> {
    match status {
        s if s.is_success() => None,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(ProviderError::Unauthorized),
        StatusCode::TOO_MANY_REQUESTS => Some(ProviderError::RateLimited),
        s => Some(ProviderError::Http(s.as_u16())),
    }
}

fn map_transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Network(error.to_string())
    }
}
