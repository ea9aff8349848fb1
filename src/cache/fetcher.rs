//! HTTP fetcher
//!
//! Builds the shared reqwest client and performs live requests for the
//! `fetch` and `parse` stages. Status codes are not interpreted here; the
//! caller decides what a non-2xx response means.

use crate::cache::{CachedResponse, RequestSignature};
use crate::Settings;
use reqwest::{header::CONTENT_TYPE, redirect::Policy, Client};
use std::time::Duration;

/// Live HTTP client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds an HTTP client from the process settings
    ///
    /// # Returns
    ///
    /// * `Ok(HttpFetcher)` - Successfully built HTTP client
    /// * `Err(reqwest::Error)` - Failed to build client
    pub fn new(settings: &Settings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.http_timeout)
            .connect_timeout(Duration::from_secs(10).min(settings.http_timeout))
            .redirect(Policy::limited(10))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self { client })
    }

    /// Performs the request described by `signature`
    pub async fn fetch(&self, signature: &RequestSignature) -> Result<CachedResponse, reqwest::Error> {
        let mut request = self
            .client
            .request(signature.method().clone(), signature.url().clone());
        if let Some(body) = signature.body() {
            request = request.body(body.to_vec());
        }

        let response = request.send().await?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        tracing::debug!(url = %url, status, "Fetched");

        let body = response.bytes().await?.to_vec();

        Ok(CachedResponse {
            url,
            status,
            content_type,
            body,
        })
    }
}
