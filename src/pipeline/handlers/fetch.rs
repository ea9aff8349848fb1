use crate::cache::RequestSignature;
use crate::pipeline::{Emission, StageContext, StageError, StageHandler};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Fetches `payload.url` through the HTTP cache
///
/// Already processed URLs are skipped in incremental mode. A 2xx response
/// emits the page description on `pass`:
///
/// ```json
/// {"url": "...", "final_url": "...", "status": 200,
///  "content_type": "text/html", "signature": "<sha256 hex>"}
/// ```
///
/// 429 and 5xx responses fail the task so it is retried; any other status
/// ends the branch. Set `params.refresh = true` to bypass cached responses.
pub struct FetchHandler;

#[async_trait]
impl StageHandler for FetchHandler {
    async fn execute(&self, ctx: &mut StageContext) -> Result<Vec<Emission>, StageError> {
        let url = ctx.payload_str("url")?.to_string();
        let signature = RequestSignature::get(&url)?;

        if ctx.skip_incremental(signature.as_str()) {
            return Ok(Vec::new());
        }

        let refresh = ctx
            .params()
            .get("refresh")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let (response, from_cache) = ctx.fetch(&signature, refresh).await?;
        if !super::check_status(&response)? {
            return Ok(Vec::new());
        }

        tracing::info!(
            crawler = ctx.crawler(),
            url = %url,
            status = response.status,
            from_cache,
            "Fetched page"
        );

        ctx.mark_seen(signature.as_str());

        let mut payload = super::extend_payload(ctx.payload());
        payload.insert("url".to_string(), json!(url));
        payload.insert("final_url".to_string(), json!(response.url));
        payload.insert("status".to_string(), json!(response.status));
        payload.insert("content_type".to_string(), json!(response.content_type));
        payload.insert("signature".to_string(), json!(signature.as_str()));

        Ok(vec![Emission::pass(Value::Object(payload))])
    }
}
