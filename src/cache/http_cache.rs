use crate::cache::RequestSignature;
use crate::clock::Clock;
use crate::storage::{lock, CacheRecord, SharedStorage, Storage, StorageResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// An HTTP response as kept by the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Per-crawler HTTP response cache
///
/// Backend failures never fail a request: the cache is bypassed with a
/// warning and the response is fetched live.
pub struct HttpCache {
    storage: SharedStorage,
    clock: Arc<dyn Clock>,
    enabled: bool,
    ttl: Duration,
}

impl HttpCache {
    pub fn new(storage: SharedStorage, clock: Arc<dyn Clock>, enabled: bool, ttl: Duration) -> Self {
        Self {
            storage,
            clock,
            enabled,
            ttl,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the cached response for `signature`, or fetches it
    ///
    /// # Arguments
    ///
    /// * `crawler` - Cache entries are scoped per crawler
    /// * `signature` - Canonical request identity
    /// * `refresh` - Skip the lookup and overwrite any stored entry
    /// * `fetch` - Performs the live request
    ///
    /// # Returns
    ///
    /// The response and whether it came from the cache. Errors from `fetch`
    /// are returned unchanged.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        crawler: &str,
        signature: &RequestSignature,
        refresh: bool,
        fetch: F,
    ) -> Result<(CachedResponse, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedResponse, E>>,
    {
        if !self.enabled {
            return fetch().await.map(|response| (response, false));
        }

        if !refresh {
            match self.lookup(crawler, signature) {
                Ok(Some(response)) => {
                    tracing::debug!(crawler, url = %signature.url(), "HTTP cache hit");
                    return Ok((response, true));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(crawler, "HTTP cache lookup failed, fetching live: {}", e);
                }
            }
        }

        let response = fetch().await?;

        if response.is_success() {
            if let Err(e) = self.store(crawler, signature, &response) {
                tracing::warn!(crawler, "Failed to store response in HTTP cache: {}", e);
            }
        }

        Ok((response, false))
    }

    /// Returns a fresh cached response, if any
    fn lookup(
        &self,
        crawler: &str,
        signature: &RequestSignature,
    ) -> StorageResult<Option<CachedResponse>> {
        let entry = lock(&self.storage)?.get_cache_entry(crawler, signature.as_str())?;
        let now = self.clock.now();

        Ok(entry
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| CachedResponse {
                url: entry.url,
                status: entry.status,
                content_type: entry.content_type,
                body: entry.body,
            }))
    }

    fn store(
        &self,
        crawler: &str,
        signature: &RequestSignature,
        response: &CachedResponse,
    ) -> StorageResult<()> {
        let record = CacheRecord {
            crawler: crawler.to_string(),
            signature: signature.as_str().to_string(),
            url: response.url.clone(),
            status: response.status,
            content_type: response.content_type.clone(),
            body: response.body.clone(),
            fetched_at: self.clock.now(),
            ttl_secs: i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX),
        };
        lock(&self.storage)?.put_cache_entry(&record)
    }

    /// Deletes every cached response of a crawler
    pub fn flush(&self, crawler: &str) -> StorageResult<u64> {
        lock(&self.storage)?.delete_cache_entries(crawler)
    }

    pub fn count(&self, crawler: &str) -> StorageResult<u64> {
        lock(&self.storage)?.count_cache_entries(crawler)
    }
}
