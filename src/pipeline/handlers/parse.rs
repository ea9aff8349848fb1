use crate::cache::RequestSignature;
use crate::pipeline::{extract_page_links, Emission, StageContext, StageError, StageHandler};
use async_trait::async_trait;
use serde_json::{json, Value};
use url::Url;

/// Extracts links from a fetched page
///
/// Re-reads `payload.url` through the HTTP cache (normally a hit right after
/// `fetch`), then emits the page itself, with its title, on `pass` and each
/// link as `{"url": ...}` on the `fetch` rule. With
/// `params.same_domain = true` only links on the page's host are followed.
pub struct ParseHandler;

fn is_html(content_type: Option<&str>) -> bool {
    content_type.map_or(true, |ct| {
        let ct = ct.to_ascii_lowercase();
        ct.contains("text/html") || ct.contains("application/xhtml")
    })
}

#[async_trait]
impl StageHandler for ParseHandler {
    async fn execute(&self, ctx: &mut StageContext) -> Result<Vec<Emission>, StageError> {
        let url = ctx.payload_str("url")?.to_string();
        let signature = RequestSignature::get(&url)?;

        let (response, _) = ctx.fetch(&signature, false).await?;
        if !super::check_status(&response)? {
            return Ok(Vec::new());
        }

        let mut page = super::extend_payload(ctx.payload());

        if !is_html(response.content_type.as_deref()) {
            tracing::debug!(url = %url, "Not an HTML page, skipping link extraction");
            return Ok(vec![Emission::pass(Value::Object(page))]);
        }

        let base = Url::parse(&response.url).map_err(|e| StageError::InvalidPayload(e.to_string()))?;
        let mut links = extract_page_links(&response.text(), &base);

        let same_domain = ctx
            .params()
            .get("same_domain")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if same_domain {
            links.retain_same_host(&base);
        }

        tracing::debug!(url = %url, links = links.links.len(), "Parsed page");

        page.insert("title".to_string(), json!(links.title));
        page.insert("links".to_string(), json!(links.links.len()));

        let mut emissions = vec![Emission::pass(Value::Object(page))];
        emissions.extend(
            links
                .links
                .into_iter()
                .map(|link| Emission::new("fetch", json!({ "url": link }))),
        );

        Ok(emissions)
    }
}
