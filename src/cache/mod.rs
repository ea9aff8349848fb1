//! HTTP response cache
//!
//! # Components
//!
//! - `RequestSignature`: canonical request identity (SHA-256 hex)
//! - `HttpCache`: per-crawler response store with TTL
//! - `HttpFetcher`: the live reqwest client behind the cache

mod fetcher;
mod http_cache;
mod signature;

pub use fetcher::HttpFetcher;
pub use http_cache::{CachedResponse, HttpCache};
pub use signature::{canonicalize_url, RequestSignature, SignatureError};
