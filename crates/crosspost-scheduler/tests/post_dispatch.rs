//! End-to-end tests for single-post dispatch, reconciliation and manual controls.

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use pretty_assertions::assert_eq;

use common::{FaultyStore, Harness, ScriptedAdapter, Step};
use crosspost_scheduler::{
    DeliveryResult, DeliveryStatus, EventNotifier, ItemStatus, MediaRef, PendingReason, PlatformId,
    PlatformState, Repeat, RetractOutcome, ScheduledItem, SchedulerConfig, SchedulerError,
    SendEvent, SendLogStatus, StateChange, Store, TargetPlatforms,
};

fn bluesky() -> TargetPlatforms {
    TargetPlatforms::single(PlatformId::Bluesky)
}

fn both() -> TargetPlatforms {
    TargetPlatforms::new([PlatformId::Bluesky, PlatformId::Mastodon]).unwrap()
}

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

// === Testable scenarios ===

#[tokio::test]
async fn scenario_a_one_shot_success() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let harness = Harness::new(SchedulerConfig::default(), vec![Arc::clone(&adapter)]);
    let now = Utc::now();
    let item = harness
        .insert(ScheduledItem::once(0, "hello", bluesky(), now - Duration::seconds(1)))
        .await;

    let report = harness.scheduler.tick_at(now).await;
    assert_eq!(report.posts.succeeded, 1);

    let item = harness.item(item.id).await;
    assert_eq!(item.status, ItemStatus::Sent);
    assert_eq!(item.scheduled_at, None);
    assert_eq!(
        item.post_uri.as_deref(),
        Some("at://did:plc:test/app.bsky.feed.post/1")
    );
    assert_eq!(item.retry.retry_attempt, 0);

    let log = harness.log(item.id).await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, SendLogStatus::Success);
    assert_eq!(log[0].attempt, 1);
    assert_eq!(log[0].content_snapshot.as_deref(), Some("hello"));
}

#[tokio::test]
async fn scenario_b_one_shot_failure_backs_off() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    adapter.script([Step::Fail("rate limited".to_string())]);
    let config = SchedulerConfig::default();
    let base = config.retry_base_delay;
    let harness = Harness::new(config, vec![adapter]);
    let now = Utc::now();
    let item = harness
        .insert(ScheduledItem::once(0, "hello", bluesky(), now - Duration::seconds(1)))
        .await;

    harness.scheduler.tick_at(now).await;

    let item = harness.item(item.id).await;
    assert_eq!(item.status, ItemStatus::Scheduled);
    assert_eq!(
        item.scheduled_at,
        Some(now + Duration::from_std(base).unwrap())
    );
    assert_eq!(item.retry.retry_attempt, 1);
    assert_eq!(item.retry.last_retry_delay_ms, Some(60_000));
    assert_eq!(item.post_uri, None);

    let result = &item.platform_results[&PlatformId::Bluesky];
    assert_eq!(result.status, DeliveryStatus::Failed);
    assert_eq!(result.attempts, 3);

    let log = harness.log(item.id).await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, SendLogStatus::Failed);
    assert!(log[0].error_message.as_deref().unwrap().contains("rate limited"));
}

#[tokio::test]
async fn scenario_c_daily_recurrence_keeps_anchor_exact() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let config = SchedulerConfig::default().with_jitter_minutes(15);
    let harness = Harness::new(config, vec![adapter]);
    let anchor = at(2024, 1, 10, 9, 0);
    let item = harness
        .insert(ScheduledItem::recurring(0, "daily", bluesky(), Repeat::Daily, anchor))
        .await;

    harness
        .scheduler
        .tick_at(anchor + Duration::seconds(30))
        .await;

    let item = harness.item(item.id).await;
    let next_anchor = at(2024, 1, 11, 9, 0);
    assert_eq!(item.status, ItemStatus::Scheduled);
    assert_eq!(item.repeat_anchor_at, Some(next_anchor));
    assert_eq!(item.scheduled_planned_at, Some(next_anchor));
    let fire = item.scheduled_at.unwrap();
    assert!((fire - next_anchor).num_minutes().abs() <= 15);
    assert!(item.post_uri.is_some());
}

#[tokio::test]
async fn scenario_d_reconciler_parks_stale_items() {
    let config = SchedulerConfig {
        grace_window: StdDuration::from_secs(10 * 60),
        ..SchedulerConfig::default()
    };
    let harness = Harness::new(config, vec![ScriptedAdapter::new(PlatformId::Bluesky)]);
    let now = at(2024, 1, 10, 10, 0);
    let stale = harness
        .insert(ScheduledItem::once(0, "stale", bluesky(), at(2024, 1, 10, 9, 45)))
        .await;
    let recent = harness
        .insert(ScheduledItem::once(0, "recent", bluesky(), at(2024, 1, 10, 9, 55)))
        .await;

    let moved = harness.scheduler.reconcile(now).await.unwrap();
    assert_eq!(moved, vec![stale.id]);

    let stale = harness.item(stale.id).await;
    assert_eq!(stale.status, ItemStatus::PendingManual);
    assert_eq!(stale.pending_reason, Some(PendingReason::MissedWhileOffline));
    assert_eq!(harness.item(recent.id).await.status, ItemStatus::Scheduled);

    let pending = harness.scheduler.list_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, stale.id);
}

// === Idempotence and partial delivery ===

#[tokio::test]
async fn dispatching_fully_sent_item_is_a_noop() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let harness = Harness::new(SchedulerConfig::default(), vec![Arc::clone(&adapter)]);
    let now = Utc::now();
    let mut item = ScheduledItem::once(0, "done", bluesky(), now - Duration::minutes(1));
    item.platform_results.insert(
        PlatformId::Bluesky,
        DeliveryResult::simulated("at://did:plc:test/app.bsky.feed.post/9".to_string(), now),
    );
    let item = harness.insert(item).await;

    harness.scheduler.tick_at(now).await;
    let after_tick = harness.item(item.id).await;
    let after_publish = harness.scheduler.publish_now(item.id, now).await.unwrap();

    assert!(adapter.sends().is_empty());
    assert_eq!(after_tick, item);
    assert_eq!(after_publish, item);
    assert!(harness.log(item.id).await.is_empty());
}

#[tokio::test]
async fn retry_only_resends_failed_platforms() {
    let bsky = ScriptedAdapter::new(PlatformId::Bluesky);
    let masto = ScriptedAdapter::new(PlatformId::Mastodon);
    masto.script([Step::Fail("server error".to_string())]);
    let harness = Harness::new(
        SchedulerConfig::default(),
        vec![Arc::clone(&bsky), Arc::clone(&masto)],
    );
    let now = Utc::now();
    let item = harness
        .insert(ScheduledItem::once(0, "both", both(), now - Duration::seconds(5)))
        .await;

    harness.scheduler.tick_at(now).await;
    let first = harness.item(item.id).await;
    assert_eq!(first.status, ItemStatus::Scheduled);
    assert_eq!(first.post_uri, None);
    assert!(first.platform_results[&PlatformId::Bluesky].is_sent());

    let later = first.scheduled_at.unwrap() + Duration::seconds(1);
    harness.scheduler.tick_at(later).await;
    let second = harness.item(item.id).await;

    assert_eq!(bsky.sends().len(), 1);
    assert_eq!(masto.sends().len(), 2);
    assert_eq!(second.status, ItemStatus::Sent);
    assert_eq!(second.retry.retry_attempt, 0);
    // Only this dispatch's successes are considered, so the Mastodon copy wins.
    assert_eq!(
        second.post_uri.as_deref(),
        Some("https://mastodon.test/@crosspost/1")
    );

    let attempts: Vec<_> = harness.log(item.id).await.iter().map(|e| e.attempt).collect();
    assert_eq!(attempts, vec![3, 2, 1]);
}

#[tokio::test]
async fn missing_credentials_fail_only_that_platform() {
    let bsky = ScriptedAdapter::new(PlatformId::Bluesky);
    let masto = ScriptedAdapter::unconfigured(PlatformId::Mastodon);
    let harness = Harness::new(
        SchedulerConfig::default(),
        vec![Arc::clone(&bsky), Arc::clone(&masto)],
    );
    let now = Utc::now();
    let item = harness
        .insert(ScheduledItem::once(0, "both", both(), now - Duration::seconds(5)))
        .await;

    harness.scheduler.tick_at(now).await;
    let item = harness.item(item.id).await;

    assert_eq!(bsky.sends().len(), 1);
    assert!(masto.sends().is_empty());
    let masto_result = &item.platform_results[&PlatformId::Mastodon];
    assert_eq!(masto_result.status, DeliveryStatus::Failed);
    assert_eq!(masto_result.attempts, 0);
    assert!(item.platform_results[&PlatformId::Bluesky].is_sent());

    let log = harness.log(item.id).await;
    let config_entry = log
        .iter()
        .find(|e| e.platform == PlatformId::Mastodon)
        .unwrap();
    assert_eq!(config_entry.error_code.as_deref(), Some("config_error"));
}

#[tokio::test]
async fn adapter_panic_is_recorded_as_failure() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    adapter.script([Step::Panic]);
    let harness = Harness::new(SchedulerConfig::default(), vec![adapter]);
    let now = Utc::now();
    let item = harness
        .insert(ScheduledItem::once(0, "boom", bluesky(), now - Duration::seconds(1)))
        .await;

    let report = harness.scheduler.tick_at(now).await;
    assert_eq!(report.posts.succeeded, 1);

    let item = harness.item(item.id).await;
    assert_eq!(item.status, ItemStatus::Scheduled);
    assert_eq!(item.retry.retry_attempt, 1);
    assert_eq!(
        item.platform_results[&PlatformId::Bluesky].error.as_deref(),
        Some("adapter panicked")
    );
}

#[tokio::test]
async fn send_log_failure_never_blocks_delivery() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let harness = Harness::with_store(
        Arc::new(FaultyStore::new().failing_send_log()),
        SchedulerConfig::default(),
        vec![adapter],
        EventNotifier::disabled(),
    );
    let now = Utc::now();
    let item = harness
        .insert(ScheduledItem::once(0, "hello", bluesky(), now - Duration::seconds(1)))
        .await;

    harness.scheduler.tick_at(now).await;

    assert_eq!(harness.item(item.id).await.status, ItemStatus::Sent);
}

#[tokio::test]
async fn failed_save_after_delivery_surfaces_store_error() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let harness = Harness::with_store(
        Arc::new(FaultyStore::new().failing_item_saves()),
        SchedulerConfig::default(),
        vec![Arc::clone(&adapter)],
        EventNotifier::disabled(),
    );
    let now = Utc::now();
    let item = harness
        .insert(ScheduledItem::once(0, "hello", bluesky(), now - Duration::seconds(1)))
        .await;

    let err = harness.scheduler.publish_now(item.id, now).await.unwrap_err();

    assert!(matches!(err, SchedulerError::Store(_)));
    assert_eq!(adapter.deliveries().len(), 1);
    let log = harness.log(item.id).await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, SendLogStatus::Success);
}

#[tokio::test]
async fn run_waits_for_in_flight_scans_on_shutdown() {
    let adapter = ScriptedAdapter::slow(PlatformId::Bluesky, StdDuration::from_millis(500));
    let harness = Harness::new(SchedulerConfig::default(), vec![Arc::clone(&adapter)]);
    let item = harness
        .insert(ScheduledItem::once(
            0,
            "hello",
            bluesky(),
            Utc::now() - Duration::seconds(1),
        ))
        .await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        let _ = shutdown_tx.send(true);
    });
    harness.scheduler.run(shutdown_rx).await;

    assert_eq!(adapter.sends().len(), 1);
    assert_eq!(harness.item(item.id).await.status, ItemStatus::Sent);
}

#[tokio::test]
async fn recurring_item_backs_off_when_next_occurrence_is_out_of_reach() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let config = SchedulerConfig::default();
    let base = config.retry_base_delay;
    let harness = Harness::new(config, vec![Arc::clone(&adapter)]);
    let now = at(2024, 6, 1, 12, 0);
    let anchor = now - Duration::days(400);
    let item = harness
        .insert(ScheduledItem::recurring(0, "daily", bluesky(), Repeat::Daily, anchor))
        .await;

    let item = harness.scheduler.publish_now(item.id, now).await.unwrap();

    assert_eq!(adapter.sends().len(), 1);
    assert_eq!(item.status, ItemStatus::Scheduled);
    assert_eq!(item.repeat_anchor_at, Some(anchor));
    assert_eq!(
        item.scheduled_at,
        Some(now + Duration::from_std(base).unwrap())
    );
    assert_eq!(item.retry.retry_attempt, 1);
    assert_eq!(harness.item(item.id).await, item);
}

#[tokio::test]
async fn recurring_partial_failure_advances_and_counts_attempts() {
    let bluesky_adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let mastodon = ScriptedAdapter::new(PlatformId::Mastodon);
    mastodon.script([Step::Fail("instance down".to_string())]);
    let harness = Harness::new(
        SchedulerConfig::default(),
        vec![Arc::clone(&bluesky_adapter), Arc::clone(&mastodon)],
    );
    let anchor = at(2024, 1, 10, 9, 0);
    let item = harness
        .insert(ScheduledItem::recurring(0, "daily", both(), Repeat::Daily, anchor))
        .await;

    harness
        .scheduler
        .tick_at(anchor + Duration::seconds(30))
        .await;

    let next_anchor = at(2024, 1, 11, 9, 0);
    let after_failure = harness.item(item.id).await;
    assert_eq!(after_failure.status, ItemStatus::Scheduled);
    assert_eq!(after_failure.repeat_anchor_at, Some(next_anchor));
    assert_eq!(after_failure.scheduled_at, Some(next_anchor));
    assert_eq!(after_failure.retry.retry_attempt, 1);
    assert_eq!(after_failure.retry.next_retry_at, None);
    assert_eq!(
        after_failure.platform_results[&PlatformId::Mastodon].status,
        DeliveryStatus::Failed
    );

    harness
        .scheduler
        .tick_at(next_anchor + Duration::seconds(30))
        .await;

    let recovered = harness.item(item.id).await;
    assert_eq!(recovered.status, ItemStatus::Scheduled);
    assert_eq!(recovered.repeat_anchor_at, Some(at(2024, 1, 12, 9, 0)));
    assert_eq!(recovered.retry.retry_attempt, 0);
    assert_eq!(mastodon.sends().len(), 2);
}

#[tokio::test]
async fn vanished_and_future_items_are_skipped() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let harness = Harness::new(SchedulerConfig::default(), vec![Arc::clone(&adapter)]);
    let now = Utc::now();
    let mut deleted = harness
        .insert(ScheduledItem::once(0, "gone", bluesky(), now - Duration::seconds(1)))
        .await;
    deleted.deleted_at = Some(now);
    harness.store.save_item(&deleted).await.unwrap();
    harness
        .insert(ScheduledItem::once(0, "later", bluesky(), now + Duration::hours(1)))
        .await;

    let report = harness.scheduler.tick_at(now).await;

    assert_eq!(report.posts.total, 0);
    assert!(adapter.sends().is_empty());
}

#[tokio::test]
async fn overlapping_ticks_dispatch_once() {
    let adapter = ScriptedAdapter::slow(PlatformId::Bluesky, StdDuration::from_millis(50));
    let harness = Harness::new(SchedulerConfig::default(), vec![Arc::clone(&adapter)]);
    let now = Utc::now();
    let item = harness
        .insert(ScheduledItem::once(0, "once", bluesky(), now - Duration::seconds(1)))
        .await;

    let (first, second) = tokio::join!(
        harness.scheduler.tick_at(now),
        harness.scheduler.tick_at(now)
    );

    assert_eq!(first.posts.total + second.posts.total, 2);
    assert_eq!(adapter.sends().len(), 1);
    assert_eq!(harness.log(item.id).await.len(), 1);
}

#[tokio::test]
async fn batch_respects_batch_size() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let config = SchedulerConfig {
        batch_size: 2,
        worker_count: 2,
        ..SchedulerConfig::default()
    };
    let harness = Harness::new(config, vec![Arc::clone(&adapter)]);
    let now = Utc::now();
    for n in 0..3 {
        harness
            .insert(ScheduledItem::once(
                0,
                format!("post {}", n),
                bluesky(),
                now - Duration::minutes(n),
            ))
            .await;
    }

    let first = harness.scheduler.tick_at(now).await;
    let second = harness.scheduler.tick_at(now).await;

    assert_eq!(first.posts.total, 2);
    assert_eq!(second.posts.total, 1);
    assert_eq!(adapter.sends().len(), 3);
}

// === Discard mode ===

#[tokio::test]
async fn discard_mode_simulates_delivery() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let config = SchedulerConfig {
        discard_mode: true,
        ..SchedulerConfig::default()
    };
    let harness = Harness::new(config, vec![Arc::clone(&adapter)]);
    let now = Utc::now();
    let item = harness
        .insert(ScheduledItem::once(0, "demo", both(), now - Duration::seconds(1)))
        .await;

    harness.scheduler.tick_at(now).await;
    let item = harness.item(item.id).await;

    assert!(adapter.sends().is_empty());
    assert_eq!(item.status, ItemStatus::Sent);
    let expected_uri = format!("demo://bluesky/post/{}", item.id);
    assert_eq!(item.post_uri.as_deref(), Some(expected_uri.as_str()));
    for platform in [PlatformId::Bluesky, PlatformId::Mastodon] {
        let result = &item.platform_results[&platform];
        assert!(result.simulated);
        assert_eq!(result.attempts, 0);
    }

    let log = harness.log(item.id).await;
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|e| e.status == SendLogStatus::Skipped));
}

// === Manual controls ===

#[tokio::test]
async fn publish_now_bypasses_schedule() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let harness = Harness::new(SchedulerConfig::default(), vec![Arc::clone(&adapter)]);
    let now = Utc::now();
    let item = harness
        .insert(ScheduledItem::once(0, "early", bluesky(), now + Duration::days(2)))
        .await;

    let published = harness.scheduler.publish_now(item.id, now).await.unwrap();

    assert_eq!(published.status, ItemStatus::Sent);
    assert_eq!(adapter.sends().len(), 1);
}

#[tokio::test]
async fn publish_now_unknown_item_is_not_found() {
    let harness = Harness::new(SchedulerConfig::default(), vec![]);
    let err = harness.scheduler.publish_now(42, Utc::now()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::ItemNotFound(42)));
}

#[tokio::test]
async fn publish_pending_once_for_one_shot() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let harness = Harness::new(SchedulerConfig::default(), vec![Arc::clone(&adapter)]);
    let now = at(2024, 3, 1, 12, 0);
    let item = harness
        .insert(ScheduledItem::once(0, "missed", bluesky(), at(2024, 3, 1, 8, 0)))
        .await;
    harness.scheduler.reconcile(now).await.unwrap();

    let item = harness
        .scheduler
        .publish_pending_once(item.id, now)
        .await
        .unwrap();

    assert_eq!(item.status, ItemStatus::Sent);
    assert_eq!(item.pending_reason, None);
    assert_eq!(adapter.sends().len(), 1);
}

#[tokio::test]
async fn publish_pending_once_keeps_recurring_cadence() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let harness = Harness::new(SchedulerConfig::default(), vec![Arc::clone(&adapter)]);
    let anchor = at(2024, 3, 1, 9, 0);
    let now = at(2024, 3, 4, 12, 0);
    let item = harness
        .insert(ScheduledItem::recurring(0, "daily", bluesky(), Repeat::Daily, anchor))
        .await;
    harness.scheduler.reconcile(now).await.unwrap();

    let item = harness
        .scheduler
        .publish_pending_once(item.id, now)
        .await
        .unwrap();

    assert_eq!(item.status, ItemStatus::Scheduled);
    assert_eq!(item.pending_reason, None);
    assert_eq!(item.repeat_anchor_at, Some(at(2024, 3, 5, 9, 0)));
    assert_eq!(adapter.sends().len(), 1);
}

#[tokio::test]
async fn pending_controls_reject_other_statuses() {
    let harness = Harness::new(SchedulerConfig::default(), vec![]);
    let now = Utc::now();
    let item = harness
        .insert(ScheduledItem::once(0, "fresh", bluesky(), now + Duration::hours(1)))
        .await;

    let err = harness
        .scheduler
        .discard_pending(item.id, now)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::InvalidStatus {
            expected: ItemStatus::PendingManual,
            actual: ItemStatus::Scheduled,
            ..
        }
    ));
}

#[tokio::test]
async fn discard_pending_one_shot_is_skipped() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let harness = Harness::new(SchedulerConfig::default(), vec![Arc::clone(&adapter)]);
    let now = at(2024, 3, 1, 12, 0);
    let item = harness
        .insert(ScheduledItem::once(0, "missed", bluesky(), at(2024, 3, 1, 8, 0)))
        .await;
    harness.scheduler.reconcile(now).await.unwrap();

    let item = harness.scheduler.discard_pending(item.id, now).await.unwrap();

    assert_eq!(item.status, ItemStatus::Skipped);
    assert_eq!(item.pending_reason, Some(PendingReason::DiscardedByUser));
    assert_eq!(item.scheduled_at, None);
    assert!(adapter.sends().is_empty());
}

#[tokio::test]
async fn discard_pending_recurring_skips_to_next_occurrence() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let harness = Harness::new(SchedulerConfig::default(), vec![Arc::clone(&adapter)]);
    let anchor = at(2024, 3, 4, 9, 0); // Monday
    let now = at(2024, 3, 6, 10, 0);
    let mut weekly = ScheduledItem::recurring(0, "weekly", bluesky(), Repeat::Weekly, anchor);
    weekly.repeat_days_of_week = [1, 4].into_iter().collect();
    let item = harness.insert(weekly).await;
    harness.scheduler.reconcile(now).await.unwrap();

    let item = harness.scheduler.discard_pending(item.id, now).await.unwrap();

    // Thursday after the reference, time of day preserved.
    let next = at(2024, 3, 7, 9, 0);
    assert_eq!(item.status, ItemStatus::Scheduled);
    assert_eq!(item.repeat_anchor_at, Some(next));
    assert_eq!(item.scheduled_at, Some(next));
    assert_eq!(item.scheduled_at.unwrap().hour(), 9);
    assert!(adapter.sends().is_empty());
}

#[tokio::test]
async fn retract_deletes_and_logs() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let harness = Harness::new(SchedulerConfig::default(), vec![Arc::clone(&adapter)]);
    let now = Utc::now();
    let item = harness
        .insert(ScheduledItem::once(0, "oops", bluesky(), now - Duration::seconds(1)))
        .await;
    harness.scheduler.tick_at(now).await;

    let report = harness
        .scheduler
        .retract(item.id, None, now)
        .await
        .unwrap();

    assert_eq!(
        report.outcomes[&PlatformId::Bluesky],
        RetractOutcome::Deleted
    );
    assert_eq!(adapter.deletes(), adapter.deliveries());
    assert_eq!(report.item.post_uri, None);
    assert_eq!(
        report.item.platform_results[&PlatformId::Bluesky].status,
        DeliveryStatus::Deleted
    );

    let history = harness.scheduler.history(item.id, 50, 0).await.unwrap();
    assert_eq!(history[0].event, SendEvent::Delete);
    assert_eq!(history[0].attempt, 2);

    let states = harness.scheduler.platform_states(item.id).await.unwrap();
    assert_eq!(states[&PlatformId::Bluesky], PlatformState::Deleted);
}

#[tokio::test]
async fn create_item_validates_and_anchors() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let harness = Harness::new(SchedulerConfig::default(), vec![adapter]);
    let now = at(2024, 5, 1, 8, 0);

    let too_long = ScheduledItem::once(0, "x".repeat(301), bluesky(), now);
    assert!(matches!(
        harness.scheduler.create_item(too_long, now).await,
        Err(SchedulerError::InvalidItem(_))
    ));

    let first = at(2024, 5, 2, 9, 30);
    let mut monthly = ScheduledItem::recurring(0, "monthly", bluesky(), Repeat::Monthly, first);
    monthly.repeat_anchor_at = None;
    let stored = harness.scheduler.create_item(monthly, now).await.unwrap();
    assert_eq!(stored.repeat_anchor_at, Some(first));
    assert_eq!(stored.status, ItemStatus::Scheduled);
}

#[tokio::test]
async fn item_media_is_capped_and_forwarded() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let harness = Harness::new(SchedulerConfig::default(), vec![Arc::clone(&adapter)]);
    let now = Utc::now();
    let photos: Vec<MediaRef> = (1..=5)
        .map(|n| {
            MediaRef::new(format!("/srv/media/{}.jpg", n)).with_alt_text(format!("photo {}", n))
        })
        .collect();

    let crowded = ScheduledItem::once(0, "album", bluesky(), now).with_media(photos.clone());
    assert!(matches!(
        harness.scheduler.create_item(crowded, now).await,
        Err(SchedulerError::InvalidItem(_))
    ));

    let item = harness
        .scheduler
        .create_item(
            ScheduledItem::once(0, "album", bluesky(), now - Duration::seconds(1))
                .with_media(photos[..4].to_vec()),
            now,
        )
        .await
        .unwrap();
    assert_eq!(harness.item(item.id).await.media.len(), 4);

    harness.scheduler.tick_at(now).await;

    let sends = adapter.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].media, photos[..4].to_vec());
    assert_eq!(sends[0].media[3].alt_text, "photo 4");
}

#[tokio::test]
async fn state_changes_are_broadcast() {
    let adapter = ScriptedAdapter::new(PlatformId::Bluesky);
    let (notifier, mut rx) = EventNotifier::channel(16);
    let harness = Harness::with_store(
        Arc::new(crosspost_scheduler::MemoryStore::new()),
        SchedulerConfig::default(),
        vec![adapter],
        notifier,
    );
    let now = Utc::now();
    let item = harness
        .insert(ScheduledItem::once(0, "hi", bluesky(), now - Duration::seconds(1)))
        .await;

    harness.scheduler.tick_at(now).await;

    assert_eq!(
        rx.recv().await.unwrap(),
        StateChange::Item {
            id: item.id,
            status: ItemStatus::Sent
        }
    );
}
