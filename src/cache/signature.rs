//! Canonical request signatures
//!
//! Two requests that differ only in URL spelling (host case, default port,
//! fragment, query parameter order) map to the same signature, so they share
//! one cache entry and one incremental fingerprint.

use reqwest::Method;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Errors raised while building a signature
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SignatureError {
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),
}

/// Canonical identity of an HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSignature {
    method: Method,
    url: Url,
    body: Option<Vec<u8>>,
    digest: String,
}

impl RequestSignature {
    /// Builds the signature of a request
    ///
    /// # Arguments
    ///
    /// * `method` - HTTP method, case-insensitive
    /// * `url` - Absolute http(s) URL
    /// * `body` - Request body, if any
    pub fn new(method: &str, url: &str, body: Option<&[u8]>) -> Result<Self, SignatureError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| SignatureError::InvalidMethod(method.to_string()))?;
        let url = canonicalize_url(url)?;
        let body = body.map(<[u8]>::to_vec);

        let mut hasher = Sha256::new();
        hasher.update(method.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(url.as_str().as_bytes());
        hasher.update(b"\n");
        if let Some(body) = &body {
            hasher.update(body);
        }
        let digest = hex::encode(hasher.finalize());

        Ok(Self {
            method,
            url,
            body,
            digest,
        })
    }

    /// Signature of a plain GET request
    pub fn get(url: &str) -> Result<Self, SignatureError> {
        Self::new("GET", url, None)
    }

    /// Hex-encoded SHA-256 digest
    pub fn as_str(&self) -> &str {
        &self.digest
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The canonical form of the request URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

/// Canonicalizes a URL for signing
///
/// # Steps
///
/// 1. Parse the URL; reject if malformed or not http(s)
/// 2. Lowercase scheme and host, drop the default port (done by `url`)
/// 3. Remove the fragment
/// 4. Sort query parameters by key, then value
/// 5. Remove an empty query string
pub fn canonicalize_url(url_str: &str) -> Result<Url, SignatureError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| SignatureError::InvalidUrl {
        url: url_str.to_string(),
        message: e.to_string(),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(SignatureError::UnsupportedScheme(url.scheme().to_string()));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(SignatureError::InvalidUrl {
            url: url_str.to_string(),
            message: "missing host".to_string(),
        });
    }

    url.set_fragment(None);

    if url.query().is_some() {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.sort();

        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}
