//! At-least-once delivery through expired leases

use crate::common::{definition, memory_context, stage};
use chrono::Duration;
use crawlbeat::Settings;
use serde_json::json;

fn settings(max_retries: u32) -> Settings {
    Settings {
        max_retries,
        lease_timeout: std::time::Duration::from_secs(60),
        ..Settings::default()
    }
}

fn seed_only() -> Vec<crawlbeat::CrawlerDefinition> {
    vec![definition(
        "c",
        None,
        vec![stage("init", "seed", json!({ "url": "https://example.com/" }), &[])],
    )]
}

#[tokio::test]
async fn test_expired_lease_redelivered() {
    let (ctx, clock, _) = memory_context(settings(3), seed_only());
    let queue = &ctx.services.queue;
    ctx.crawler("c").unwrap().run().unwrap();

    let first = queue.lease("w1").unwrap().unwrap();
    assert!(queue.lease("w2").unwrap().is_none());

    // Lease expires, the task is requeued with backoff
    clock.advance(Duration::seconds(61));
    assert!(queue.lease("w2").unwrap().is_none());
    clock.advance(Duration::seconds(2));
    let second = queue.lease("w2").unwrap().unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.retry_count, 1);
    assert_eq!(second.lease_owner.as_deref(), Some("w2"));

    // The original worker no longer owns it
    assert!(!queue.complete(&first, "w1", &[]).unwrap());
    assert!(queue.complete(&second, "w2", &[]).unwrap());
    assert_eq!(ctx.crawler("c").unwrap().pending().unwrap(), 0);
}

#[tokio::test]
async fn test_repeated_expiry_fails_task() {
    let (ctx, clock, _) = memory_context(settings(1), seed_only());
    let queue = &ctx.services.queue;
    let crawler = ctx.crawler("c").unwrap();
    crawler.run().unwrap();

    queue.lease("w1").unwrap().unwrap();
    clock.advance(Duration::seconds(61));
    let report = queue.reclaim_expired(None).unwrap();
    assert_eq!((report.requeued, report.failed), (1, 0));

    clock.advance(Duration::seconds(2));
    queue.lease("w2").unwrap().unwrap();
    clock.advance(Duration::seconds(61));
    let report = queue.reclaim_expired(None).unwrap();
    assert_eq!((report.requeued, report.failed), (0, 1));

    let failed = crawler.failed_tasks().unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].last_error.as_deref().unwrap_or("").contains("w2"));
    assert_eq!(crawler.pending().unwrap(), 0);
}

#[tokio::test]
async fn test_runner_completes_redelivered_task() {
    let (ctx, clock, _) = memory_context(settings(3), seed_only());
    let queue = &ctx.services.queue;
    let crawler = ctx.crawler("c").unwrap();
    crawler.run().unwrap();

    // A worker that crashed mid-task
    queue.lease("crashed").unwrap().unwrap();
    clock.advance(Duration::seconds(63));

    assert_eq!(ctx.runner().drain("w").await.unwrap(), 0);
    clock.advance(Duration::seconds(2));
    assert_eq!(ctx.runner().drain("w").await.unwrap(), 1);

    let state = crawler.run_state().unwrap();
    assert_eq!(state.tasks_completed, 1);
    assert!(state.current_run.is_none());
}
