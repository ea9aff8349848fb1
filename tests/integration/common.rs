use chrono::{TimeZone, Utc};
use crawlbeat::clock::ManualClock;
use crawlbeat::pipeline::HandlerRegistry;
use crawlbeat::storage::{open_in_memory, SharedStorage};
use crawlbeat::{AppContext, CrawlerDefinition, Settings, StageConfig};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    ))
}

pub fn stage(name: &str, method: &str, params: Value, handle: &[(&str, &str)]) -> StageConfig {
    StageConfig {
        name: name.to_string(),
        method: method.to_string(),
        params: params.as_object().cloned().unwrap_or_else(Map::new),
        handle: handle
            .iter()
            .map(|(rule, target)| (rule.to_string(), target.to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
}

pub fn definition(name: &str, schedule: Option<&str>, stages: Vec<StageConfig>) -> CrawlerDefinition {
    CrawlerDefinition {
        name: name.to_string(),
        description: format!("{} crawler", name),
        schedule: schedule.map(str::to_string),
        disabled: false,
        expire: 1,
        entry: None,
        stages,
    }
}

/// seed -> fetch -> parse, following same-host links back into fetch
pub fn site_crawler(name: &str, base: &str) -> CrawlerDefinition {
    definition(
        name,
        Some("daily"),
        vec![
            stage("init", "seed", json!({ "url": format!("{}/", base) }), &[("pass", "fetch")]),
            stage("fetch", "fetch", json!({}), &[("pass", "parse")]),
            stage("parse", "parse", json!({ "same_domain": true }), &[("fetch", "fetch")]),
        ],
    )
}

/// seed -> fetch, nothing else
pub fn fetch_only_crawler(name: &str, url: &str) -> CrawlerDefinition {
    definition(
        name,
        None,
        vec![
            stage("init", "seed", json!({ "url": url }), &[("pass", "fetch")]),
            stage("fetch", "fetch", json!({}), &[]),
        ],
    )
}

pub fn context(
    settings: Settings,
    clock: Arc<ManualClock>,
    storage: SharedStorage,
    definitions: Vec<CrawlerDefinition>,
) -> AppContext {
    AppContext::from_parts(
        settings,
        clock,
        storage,
        HandlerRegistry::with_builtins(),
        definitions,
    )
    .unwrap()
}

pub fn memory_context(
    settings: Settings,
    definitions: Vec<CrawlerDefinition>,
) -> (AppContext, Arc<ManualClock>, SharedStorage) {
    let clock = clock();
    let storage = open_in_memory().unwrap();
    let ctx = context(settings, clock.clone(), storage.clone(), definitions);
    (ctx, clock, storage)
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!("<html><head><title>Test</title></head><body>{}</body></html>", body),
        "text/html",
    )
}

/// Three pages: / links to itself, /a and /b; /a links to /b; /b is a leaf
pub async fn mount_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/">Home</a><a href="/a">A</a><a href="/b">B</a>"#))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html(r#"<a href="/b">B</a><a href="https://elsewhere.example/">Out</a>"#))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html("leaf"))
        .mount(server)
        .await;
}

/// Number of requests the server received for `path`
pub async fn hits(server: &MockServer, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == request_path)
        .count()
}
