//! Built-in stage handlers

mod fetch;
mod parse;
mod seed;
mod sequence;

pub use fetch::FetchHandler;
pub use parse::ParseHandler;
pub use seed::SeedHandler;
pub use sequence::SequenceHandler;

use crate::cache::CachedResponse;
use crate::pipeline::StageError;
use serde_json::{Map, Value};

/// Classifies a response status
///
/// # Returns
///
/// * `Ok(true)` - 2xx, continue the branch
/// * `Ok(false)` - other client errors and redirects, end the branch
/// * `Err(StageError::Status)` - 429 or 5xx, worth retrying
fn check_status(response: &CachedResponse) -> Result<bool, StageError> {
    match response.status {
        200..=299 => Ok(true),
        429 | 500..=599 => Err(StageError::Status {
            url: response.url.clone(),
            status: response.status,
        }),
        status => {
            tracing::warn!(url = %response.url, status, "Unexpected HTTP status, ending branch");
            Ok(false)
        }
    }
}

/// Copies the incoming payload (if it is an object) so successors keep context
fn extend_payload(payload: &Value) -> Map<String, Value> {
    payload.as_object().cloned().unwrap_or_default()
}
