use crate::pipeline::{Emission, StageContext, StageError, StageHandler};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// Starts a pipeline from configured URLs
///
/// Emits `{"url": ...}` on `pass` for each entry of `params.urls`, or for
/// `params.url`.
pub struct SeedHandler;

fn seed_urls(params: &Map<String, Value>) -> Result<Vec<String>, StageError> {
    if let Some(urls) = params.get("urls") {
        let urls = urls.as_array().ok_or_else(|| StageError::InvalidParam {
            name: "urls".to_string(),
            message: "expected an array of strings".to_string(),
        })?;

        return urls
            .iter()
            .map(|u| {
                u.as_str().map(str::to_string).ok_or_else(|| StageError::InvalidParam {
                    name: "urls".to_string(),
                    message: format!("expected a string, got {}", u),
                })
            })
            .collect();
    }

    match params.get("url") {
        Some(Value::String(url)) => Ok(vec![url.clone()]),
        Some(other) => Err(StageError::InvalidParam {
            name: "url".to_string(),
            message: format!("expected a string, got {}", other),
        }),
        None => Err(StageError::MissingParam("urls".to_string())),
    }
}

#[async_trait]
impl StageHandler for SeedHandler {
    async fn execute(&self, ctx: &mut StageContext) -> Result<Vec<Emission>, StageError> {
        let urls = seed_urls(ctx.params())?;
        Ok(urls
            .into_iter()
            .map(|url| Emission::pass(json!({ "url": url })))
            .collect())
    }

    fn validate(&self, params: &Map<String, Value>) -> Result<(), StageError> {
        seed_urls(params).map(|_| ())
    }
}
