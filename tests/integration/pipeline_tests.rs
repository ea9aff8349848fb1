//! End-to-end pipeline runs against a mock site

use crate::common::{
    context, fetch_only_crawler, hits, memory_context, mount_site, site_crawler,
};
use chrono::Duration;
use crawlbeat::clock::Clock;
use crawlbeat::{DueState, Settings};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_site_crawl_end_to_end() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let (ctx, clock, _) = memory_context(Settings::default(), vec![site_crawler("site", &server.uri())]);
    let crawler = ctx.crawler("site").unwrap();

    let run_id = crawler.run().unwrap();
    assert_eq!(crawler.run_state().unwrap().current_run.as_deref(), Some(run_id.as_str()));

    let executed = ctx.runner().drain("w").await.unwrap();

    // seed, fetch /, parse /, fetch / /a /b, parse /a /b, fetch /b
    assert_eq!(executed, 9);
    assert_eq!(hits(&server, "/").await, 1);
    assert_eq!(hits(&server, "/a").await, 1);
    assert_eq!(hits(&server, "/b").await, 1);

    let state = crawler.run_state().unwrap();
    assert_eq!(state.run_count, 1);
    assert_eq!(state.tasks_completed, 9);
    assert_eq!(state.tasks_failed, 0);
    assert!(state.current_run.is_none());
    assert_eq!(crawler.pending().unwrap(), 0);

    let listing = ctx.registry.listing(clock.now()).unwrap();
    assert_eq!(listing[0].due, DueState::No);

    clock.advance(Duration::days(1) + Duration::seconds(1));
    assert_eq!(crawler.due_state(clock.now()).unwrap(), DueState::Yes);
}

#[tokio::test]
async fn test_incremental_skips_seen_pages() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let settings = Settings {
        http_cache: false,
        ..Settings::default()
    };
    let (ctx, clock, storage) = memory_context(settings.clone(), vec![site_crawler("site", &server.uri())]);
    let crawler = ctx.crawler("site").unwrap();

    crawler.run().unwrap();
    ctx.runner().drain("w").await.unwrap();
    let first = server.received_requests().await.unwrap().len();

    // Second run: every fetch is skipped, nothing goes out
    clock.advance(Duration::hours(1));
    crawler.run().unwrap();
    assert_eq!(ctx.runner().drain("w").await.unwrap(), 2);
    assert_eq!(server.received_requests().await.unwrap().len(), first);

    // The same store without incremental mode refetches
    let eager = context(
        Settings {
            incremental: false,
            max_depth: 3,
            ..settings
        },
        clock.clone(),
        storage,
        vec![site_crawler("site", &server.uri())],
    );
    eager.crawler("site").unwrap().run().unwrap();
    eager.runner().drain("w").await.unwrap();
    assert!(hits(&server, "/").await > 1);
}

#[tokio::test]
async fn test_seen_pages_expire() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let settings = Settings {
        http_cache: false,
        ..Settings::default()
    };
    let (ctx, clock, _) = memory_context(settings, vec![site_crawler("site", &server.uri())]);
    let crawler = ctx.crawler("site").unwrap();

    crawler.run().unwrap();
    ctx.runner().drain("w").await.unwrap();

    clock.advance(Duration::days(1) + Duration::minutes(1));
    crawler.run().unwrap();
    ctx.runner().drain("w").await.unwrap();

    assert_eq!(hits(&server, "/").await, 2);
    assert_eq!(hits(&server, "/b").await, 2);
}

#[tokio::test]
async fn test_cache_serves_until_ttl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .mount(&server)
        .await;

    let settings = Settings {
        incremental: false,
        cache_ttl: std::time::Duration::from_secs(3600),
        ..Settings::default()
    };
    let url = format!("{}/feed", server.uri());
    let (ctx, clock, _) = memory_context(settings, vec![fetch_only_crawler("feed", &url)]);
    let crawler = ctx.crawler("feed").unwrap();

    for _ in 0..2 {
        crawler.run().unwrap();
        ctx.runner().drain("w").await.unwrap();
    }
    assert_eq!(hits(&server, "/feed").await, 1);
    assert_eq!(ctx.services.cache.count("feed").unwrap(), 1);

    clock.advance(Duration::hours(2));
    crawler.run().unwrap();
    ctx.runner().drain("w").await.unwrap();
    assert_eq!(hits(&server, "/feed").await, 2);
}

#[tokio::test]
async fn test_cache_with_maximal_ttl_keeps_serving() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .mount(&server)
        .await;

    // Built directly, past what settings validation accepts
    let settings = Settings {
        incremental: false,
        cache_ttl: std::time::Duration::from_secs(u64::MAX),
        ..Settings::default()
    };
    let url = format!("{}/feed", server.uri());
    let (ctx, clock, _) = memory_context(settings, vec![fetch_only_crawler("feed", &url)]);
    let crawler = ctx.crawler("feed").unwrap();

    for _ in 0..2 {
        crawler.run().unwrap();
        assert_eq!(ctx.runner().drain("w").await.unwrap(), 2);
        clock.advance(Duration::days(365));
    }

    assert_eq!(hits(&server, "/feed").await, 1);
    assert!(crawler.failed_tasks().unwrap().is_empty());
}

#[tokio::test]
async fn test_error_responses_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let settings = Settings {
        incremental: false,
        ..Settings::default()
    };
    let url = format!("{}/missing", server.uri());
    let (ctx, _, _) = memory_context(settings, vec![fetch_only_crawler("gone", &url)]);
    let crawler = ctx.crawler("gone").unwrap();

    for _ in 0..2 {
        crawler.run().unwrap();
        ctx.runner().drain("w").await.unwrap();
    }

    // A 404 ends the branch without failing the task
    assert_eq!(hits(&server, "/missing").await, 2);
    assert_eq!(ctx.services.cache.count("gone").unwrap(), 0);
    assert!(crawler.failed_tasks().unwrap().is_empty());
}

#[tokio::test]
async fn test_server_errors_retried_then_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let settings = Settings {
        max_retries: 1,
        ..Settings::default()
    };
    let url = format!("{}/flaky", server.uri());
    let (ctx, clock, _) = memory_context(settings, vec![fetch_only_crawler("flaky", &url)]);
    let crawler = ctx.crawler("flaky").unwrap();
    let runner = ctx.runner();

    crawler.run().unwrap();
    runner.drain("w").await.unwrap();
    assert_eq!(hits(&server, "/flaky").await, 1);
    assert_eq!(crawler.pending().unwrap(), 1);

    clock.advance(Duration::seconds(2));
    runner.drain("w").await.unwrap();
    assert_eq!(hits(&server, "/flaky").await, 2);

    let failed = crawler.failed_tasks().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].stage, "fetch");
    assert_eq!(failed[0].retry_count, 2);
    assert!(failed[0].last_error.as_deref().unwrap_or("").contains("503"));

    let state = crawler.run_state().unwrap();
    assert_eq!(state.tasks_failed, 1);
    assert!(state.current_run.is_none());
}

#[tokio::test]
async fn test_workers_process_until_shutdown() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let settings = Settings {
        poll_interval: std::time::Duration::from_millis(20),
        ..Settings::default()
    };
    let (ctx, _, _) = memory_context(settings, vec![site_crawler("site", &server.uri())]);
    let crawler = ctx.crawler("site").unwrap();
    crawler.run().unwrap();

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(ctx.runner().run(3, rx));

    for _ in 0..200 {
        if crawler.pending().unwrap() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(crawler.pending().unwrap(), 0);
    assert!(hits(&server, "/b").await >= 1);
    assert!(crawler.run_state().unwrap().current_run.is_none());
}
