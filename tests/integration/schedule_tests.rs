//! Scheduling passes and the beat loop

use crate::common::{definition, memory_context, stage};
use chrono::Duration;
use crawlbeat::{CrawlerDefinition, Settings};
use serde_json::json;

fn scheduled(name: &str, schedule: Option<&str>) -> CrawlerDefinition {
    definition(
        name,
        schedule,
        vec![stage("init", "seed", json!({ "url": "https://example.com/" }), &[])],
    )
}

#[tokio::test]
async fn test_scheduled_starts_due_crawlers_once() {
    let mut disabled = scheduled("disabled", Some("hourly"));
    disabled.disabled = true;
    let definitions = vec![
        scheduled("hourly", Some("@hourly")),
        scheduled("manual", None),
        scheduled("broken", Some("every tuesday")),
        disabled,
    ];
    let (ctx, clock, _) = memory_context(Settings::default(), definitions);

    let report = ctx.registry.run_scheduled().unwrap();
    let started: Vec<_> = report.started.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(started, vec!["hourly"]);
    assert!(report.errors.is_empty());

    // Still running: not started again
    assert!(ctx.registry.run_scheduled().unwrap().started.is_empty());

    ctx.runner().drain("w").await.unwrap();
    clock.advance(Duration::minutes(30));
    assert!(ctx.registry.run_scheduled().unwrap().started.is_empty());

    clock.advance(Duration::minutes(31));
    let report = ctx.registry.run_scheduled().unwrap();
    assert_eq!(report.started.len(), 1);
    assert_eq!(ctx.crawler("hourly").unwrap().run_state().unwrap().run_count, 2);
    assert!(ctx.crawler("manual").unwrap().run_state().unwrap().never_run());
}

#[tokio::test]
async fn test_scheduled_recovers_crashed_run() {
    let settings = Settings {
        lease_timeout: std::time::Duration::from_secs(60),
        ..Settings::default()
    };
    let (ctx, clock, _) = memory_context(settings, vec![scheduled("c", Some("@every 5m"))]);
    let crawler = ctx.crawler("c").unwrap();

    ctx.registry.run_scheduled().unwrap();
    ctx.services.queue.lease("crashed").unwrap().unwrap();

    // A run in progress, even an abandoned one, is never restarted
    clock.advance(Duration::minutes(10));
    assert!(ctx.registry.run_scheduled().unwrap().started.is_empty());

    let reports = ctx.registry.run_cleanup().unwrap();
    assert_eq!(reports[0].1.requeued, 1);
    assert_eq!(crawler.pending().unwrap(), 1);

    clock.advance(Duration::seconds(5));
    assert_eq!(ctx.runner().drain("w").await.unwrap(), 1);
    let report = ctx.registry.run_scheduled().unwrap();
    assert_eq!(report.started.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_beat_runs_until_shutdown() {
    let settings = Settings {
        beat_interval: std::time::Duration::from_secs(60),
        ..Settings::default()
    };
    let (ctx, _, _) = memory_context(settings, vec![scheduled("c", Some("@every 10m"))]);
    let beat = ctx.beat();

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(async move { beat.run(rx).await });

    tokio::time::sleep(std::time::Duration::from_secs(150)).await;
    tx.send(true).unwrap();

    let passes = handle.await.unwrap().unwrap();
    assert_eq!(passes, 3);

    // Only the first pass found the crawler due
    let state = ctx.crawler("c").unwrap().run_state().unwrap();
    assert_eq!(state.run_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_beat_stops_when_sender_dropped() {
    let (ctx, _, _) = memory_context(Settings::default(), vec![scheduled("c", None)]);
    let (tx, rx) = tokio::sync::watch::channel(false);
    drop(tx);

    assert_eq!(ctx.beat().run(rx).await.unwrap(), 1);
}
