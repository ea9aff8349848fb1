//! Flush, cleanup, due states and loading definitions from disk

use crate::common::{definition, hits, memory_context, mount_site, site_crawler, stage};
use chrono::Duration;
use crawlbeat::clock::Clock;
use crawlbeat::{AppContext, CrawlbeatError, DueState, Settings};
use serde_json::json;
use std::io::Write;
use tempfile::TempDir;
use wiremock::MockServer;

#[tokio::test]
async fn test_flush_forgets_everything() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let (ctx, clock, _) = memory_context(Settings::default(), vec![site_crawler("site", &server.uri())]);
    let crawler = ctx.crawler("site").unwrap();

    crawler.run().unwrap();
    ctx.runner().drain("w").await.unwrap();
    assert_eq!(ctx.services.incremental.count("site").unwrap(), 3);
    assert_eq!(ctx.services.cache.count("site").unwrap(), 3);

    // Leave a queued task behind as well
    crawler.run().unwrap();

    let report = crawler.flush().unwrap();
    assert_eq!(report.tasks, 1);
    assert_eq!(report.fingerprints, 3);
    assert_eq!(report.cache_entries, 3);

    assert_eq!(crawler.pending().unwrap(), 0);
    assert!(crawler.run_state().unwrap().never_run());
    assert_eq!(crawler.due_state(clock.now()).unwrap(), DueState::Yes);

    // Everything is fetched again
    crawler.run().unwrap();
    ctx.runner().drain("w").await.unwrap();
    assert_eq!(hits(&server, "/").await, 2);
    assert_eq!(hits(&server, "/a").await, 2);
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let settings = Settings {
        lease_timeout: std::time::Duration::from_secs(60),
        ..Settings::default()
    };
    let definitions = vec![definition(
        "c",
        Some("hourly"),
        vec![stage("init", "seed", json!({ "url": "https://example.com/" }), &[])],
    )];
    let (ctx, clock, _) = memory_context(settings, definitions);
    let crawler = ctx.crawler("c").unwrap();

    crawler.run().unwrap();
    ctx.services.queue.lease("crashed").unwrap().unwrap();
    assert_eq!(crawler.due_state(clock.now()).unwrap(), DueState::No);

    clock.advance(Duration::minutes(2));
    let report = crawler.cleanup().unwrap();
    assert_eq!(report.requeued, 1);
    assert!(!report.cleared_run);
    assert_eq!(crawler.pending().unwrap(), 1);

    let again = crawler.cleanup().unwrap();
    assert!(again.is_empty());
    assert_eq!(crawler.pending().unwrap(), 1);
}

#[tokio::test]
async fn test_manual_start_reclaims_crashed_run() {
    let settings = Settings {
        lease_timeout: std::time::Duration::from_secs(60),
        ..Settings::default()
    };
    let definitions = vec![definition(
        "c",
        None,
        vec![stage("init", "seed", json!({ "url": "https://example.com/" }), &[])],
    )];
    let (ctx, clock, _) = memory_context(settings, definitions);
    let crawler = ctx.crawler("c").unwrap();

    let crashed_run = crawler.run().unwrap();
    let abandoned = ctx.services.queue.lease("crashed").unwrap().unwrap();

    clock.advance(Duration::minutes(2));
    let run_id = crawler.start().unwrap();
    assert_ne!(run_id, crashed_run);

    // The expired lease was released before the new run was queued
    let requeued = ctx.services.queue.get(abandoned.id).unwrap().unwrap();
    assert_eq!(requeued.state, crawlbeat::TaskState::Queued);
    assert_eq!(requeued.retry_count, 1);
    assert!(requeued.lease_owner.is_none());
    assert_eq!(crawler.pending().unwrap(), 2);
    assert_eq!(crawler.run_state().unwrap().run_count, 2);
}

#[tokio::test]
async fn test_cleanup_clears_abandoned_run() {
    let definitions = vec![definition(
        "c",
        Some("hourly"),
        vec![stage("init", "seed", json!({ "url": "https://example.com/" }), &[])],
    )];
    let (ctx, _, _) = memory_context(Settings::default(), definitions);
    let crawler = ctx.crawler("c").unwrap();

    crawler.run().unwrap();
    ctx.services.queue.flush("c").unwrap();
    assert!(crawler.run_state().unwrap().current_run.is_some());

    let reports = ctx.registry.run_cleanup().unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].1.cleared_run);
    assert!(crawler.run_state().unwrap().current_run.is_none());

    assert!(crawler.cleanup().unwrap().is_empty());
}

#[test]
fn test_due_states() {
    let mut disabled = definition("disabled", Some("daily"), vec![]);
    disabled.disabled = true;
    let definitions = vec![
        with_seed(disabled),
        with_seed(definition("manual", None, vec![])),
        with_seed(definition("off", Some("disabled"), vec![])),
        with_seed(definition("fresh", Some("@every 10m"), vec![])),
    ];
    let (ctx, clock, _) = memory_context(Settings::default(), definitions);
    let now = clock.now();

    let due = |name: &str| ctx.crawler(name).unwrap().due_state(now).unwrap();
    assert_eq!(due("disabled"), DueState::Off);
    assert_eq!(due("manual"), DueState::No);
    assert_eq!(due("off"), DueState::Off);
    assert_eq!(due("fresh"), DueState::Yes);

    // Disabling at runtime
    ctx.crawler("fresh").unwrap().set_disabled(true);
    assert_eq!(due("fresh"), DueState::Off);
}

fn with_seed(mut def: crawlbeat::CrawlerDefinition) -> crawlbeat::CrawlerDefinition {
    def.stages = vec![stage("init", "seed", json!({ "url": "https://example.com/" }), &[])];
    def
}

#[test]
fn test_init_from_config_directory() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("crawlers");
    std::fs::create_dir(&config).unwrap();

    let files = [
        (
            "b.toml",
            r#"
name = "beta"
schedule = "weekly"

[[stages]]
name = "init"
method = "sequence"
params = { stop = 3 }
"#,
        ),
        (
            "a.toml",
            r#"
name = "alpha"
description = "First"
schedule = "*/5 * * * *"

[[stages]]
name = "init"
method = "seed"
params = { urls = ["https://example.com/"] }
handle = { pass = "fetch" }

[[stages]]
name = "fetch"
method = "fetch"
"#,
        ),
    ];
    for (name, content) in files {
        let mut file = std::fs::File::create(config.join(name)).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    let settings = Settings {
        config_path: config,
        database_path: dir.path().join("crawlbeat.db"),
        ..Settings::default()
    };
    let ctx = AppContext::init(settings).unwrap();

    let names: Vec<_> = ctx.registry.iter().map(|c| c.name().to_string()).collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    assert_eq!(ctx.crawler("alpha").unwrap().description(), "First");
    assert!(ctx.crawler("alpha").unwrap().schedule().is_some());
    assert!(matches!(
        ctx.crawler("gamma"),
        Err(CrawlbeatError::CrawlerNotFound(_))
    ));
    assert!(dir.path().join("crawlbeat.db").exists());
}

#[test]
fn test_init_rejects_invalid_handler_params() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("bad.toml");
    std::fs::write(
        &file,
        r#"
name = "bad"

[[stages]]
name = "init"
method = "sequence"
params = { step = 0, stop = 3 }
"#,
    )
    .unwrap();

    let settings = Settings {
        config_path: file,
        database_path: dir.path().join("crawlbeat.db"),
        ..Settings::default()
    };
    assert!(matches!(
        AppContext::init(settings),
        Err(CrawlbeatError::Pipeline { .. })
    ));
}
