//! Single-post dispatcher.
//!
//! Drives one [`ScheduledItem`] through delivery to each of its target
//! platforms, records every attempt, and then either finishes the item, retries
//! it with backoff, or reschedules the next occurrence of a recurring item.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use crate::SchedulerError;
use crate::context::DispatchContext;
use crate::platform::{AdapterError, PostPayload};
use crate::recurrence::apply_jitter;
use crate::send_log::{CONFIG_ERROR, DELETE_FAILED, DELIVERY_FAILED};
use crate::types::{
    DeliveryResult, DeliveryStatus, ItemId, ItemStatus, NewSendLogEntry, PlatformId, Repeat,
    ScheduledItem, SendEvent,
};

/// How a dispatch was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Periodic tick: the item must still be due.
    Due,
    /// Manual publish: skips the due check and keeps the recurring cadence.
    Immediate,
}

/// Outcome of retracting one platform's copy of a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetractOutcome {
    Deleted,
    NotPublished,
    Failed(String),
}

/// Result of a retraction.
#[derive(Debug, Clone)]
pub struct RetractReport {
    pub item: ScheduledItem,
    pub outcomes: BTreeMap<PlatformId, RetractOutcome>,
}

impl RetractReport {
    pub fn any_deleted(&self) -> bool {
        self.outcomes.values().any(|o| *o == RetractOutcome::Deleted)
    }
}

/// Delivers single posts.
#[derive(Clone)]
pub struct PostDispatcher {
    ctx: DispatchContext,
}

impl PostDispatcher {
    pub fn new(ctx: DispatchContext) -> Self {
        Self { ctx }
    }

    /// Dispatch one item.
    ///
    /// Returns `Ok(None)` when the item vanished, is no longer due, or has
    /// nothing left to deliver. Those cases leave state untouched.
    #[tracing::instrument(skip(self), fields(item_id = id))]
    pub async fn dispatch(
        &self,
        id: ItemId,
        mode: DispatchMode,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledItem>, SchedulerError> {
        let Some(mut item) = self.ctx.store.get_item(id).await? else {
            debug!("item vanished before dispatch");
            return Ok(None);
        };

        if mode == DispatchMode::Due && !item.is_due(now) {
            debug!(status = %item.status, "item no longer due");
            return Ok(None);
        }

        if item.repeat == Repeat::None && item.all_sent() {
            debug!("every platform already sent");
            return Ok(None);
        }

        let mut successes = Vec::new();
        if self.ctx.config.discard_mode {
            self.simulate(&mut item, now, &mut successes).await;
        } else {
            self.deliver_all(&mut item, now, &mut successes).await;
        }

        let all_sent = item.all_sent();
        if let Some((platform, result)) = PlatformId::pick_preferred(&successes)
            && (item.repeat.is_recurring() || all_sent)
        {
            item.post_uri = result.uri.clone().or_else(|| result.status_id.clone());
            item.posted_at = result.posted_at;
            debug!(%platform, "primary delivery selected");
        }

        item.pending_reason = None;
        item.status = ItemStatus::Scheduled;

        if item.repeat.is_recurring() {
            self.reschedule(&mut item, mode, all_sent, now);
        } else if all_sent {
            item.status = ItemStatus::Sent;
            item.scheduled_at = None;
            item.scheduled_planned_at = None;
            item.retry.reset();
        } else {
            self.schedule_retry(&mut item, now);
        }

        if let Err(e) = self.ctx.store.save_item(&item).await {
            let delivered: Vec<String> = successes
                .iter()
                .map(|(platform, result)| {
                    let remote = result.uri.as_deref().or(result.status_id.as_deref());
                    format!("{}={}", platform, remote.unwrap_or("?"))
                })
                .collect();
            error!(
                item_id = item.id,
                ?delivered,
                error = %e,
                "failed to save item after delivery, it may be delivered again"
            );
            return Err(e.into());
        }

        info!(
            status = %item.status,
            all_sent,
            next = ?item.scheduled_at,
            retry_attempt = item.retry.retry_attempt,
            "dispatched item"
        );
        self.ctx.notifier.item(item.id, item.status);

        Ok(Some(item))
    }

    async fn simulate(
        &self,
        item: &mut ScheduledItem,
        now: DateTime<Utc>,
        successes: &mut Vec<(PlatformId, DeliveryResult)>,
    ) {
        let targets = item.target_platforms.clone();
        for platform in targets.iter() {
            let uri = format!("demo://{}/post/{}", platform, item.id);
            let result = DeliveryResult::simulated(uri.clone(), now);
            self.ctx
                .send_log
                .record(NewSendLogEntry::skipped(
                    item.id,
                    platform,
                    &uri,
                    &item.content,
                    now,
                ))
                .await;
            successes.push((platform, result.clone()));
            item.platform_results.insert(platform, result);
        }
        info!(item_id = item.id, "discard mode: marked item as delivered");
    }

    async fn deliver_all(
        &self,
        item: &mut ScheduledItem,
        now: DateTime<Utc>,
        successes: &mut Vec<(PlatformId, DeliveryResult)>,
    ) {
        let targets = item.target_platforms.clone();
        for platform in targets.iter() {
            let already_sent = item
                .platform_results
                .get(&platform)
                .is_some_and(DeliveryResult::is_sent);
            if item.repeat == Repeat::None && already_sent {
                debug!(%platform, "already sent, skipping");
                continue;
            }

            let result = self.deliver(item, platform, now).await;
            if result.is_sent() {
                successes.push((platform, result.clone()));
            }
            item.platform_results.insert(platform, result);
        }
    }

    async fn deliver(
        &self,
        item: &ScheduledItem,
        platform: PlatformId,
        now: DateTime<Utc>,
    ) -> DeliveryResult {
        let adapter = match self.ctx.platforms.ready(platform) {
            Ok(adapter) => adapter,
            Err(e) => {
                error!(item_id = item.id, %platform, error = %e, "platform not configured");
                self.ctx
                    .send_log
                    .record(NewSendLogEntry::failed(
                        item.id,
                        platform,
                        SendEvent::Send,
                        CONFIG_ERROR,
                        e.to_string(),
                        now,
                    ))
                    .await;
                return DeliveryResult::failed(e.to_string(), 0, now);
            }
        };

        let payload = PostPayload::new(item.content.clone()).with_media(&item.media);
        let outcome = AssertUnwindSafe(adapter.send(&payload))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(AdapterError::delivery("adapter panicked", 1)));

        match outcome {
            Ok(delivery) => {
                info!(
                    item_id = item.id,
                    %platform,
                    uri = ?delivery.remote.uri,
                    attempts = delivery.attempts,
                    "post delivered"
                );
                self.ctx
                    .send_log
                    .record(NewSendLogEntry::sent(
                        item.id,
                        platform,
                        &delivery,
                        &item.content,
                    ))
                    .await;
                DeliveryResult::sent(&delivery)
            }
            Err(e) => {
                let code = match e {
                    AdapterError::Configuration(_) => CONFIG_ERROR,
                    _ => DELIVERY_FAILED,
                };
                warn!(item_id = item.id, %platform, error = %e, "post delivery failed");
                self.ctx
                    .send_log
                    .record(NewSendLogEntry::failed(
                        item.id,
                        platform,
                        SendEvent::Send,
                        code,
                        e.to_string(),
                        now,
                    ))
                    .await;
                DeliveryResult::failed(e.to_string(), e.attempts(), now)
            }
        }
    }

    /// Move a recurring item to its next occurrence.
    fn reschedule(
        &self,
        item: &mut ScheduledItem,
        mode: DispatchMode,
        all_sent: bool,
        now: DateTime<Utc>,
    ) {
        let rule = item.recurrence();
        let anchor = item.repeat_anchor_at.or(item.scheduled_at).unwrap_or(now);
        let next = match mode {
            DispatchMode::Due => rule.next_occurrence(anchor),
            DispatchMode::Immediate if anchor > now => Some(anchor),
            DispatchMode::Immediate => rule.next_occurrence_after(anchor, now),
        };

        let Some(next) = next else {
            warn!(item_id = item.id, %anchor, "next occurrence undetermined, backing off");
            self.schedule_retry(item, now);
            return;
        };

        let jitter = self.ctx.config.effective_jitter_minutes();
        item.repeat_anchor_at = Some(next);
        item.scheduled_planned_at = Some(next);
        item.scheduled_at = Some(apply_jitter(next, jitter, &mut rand::thread_rng()));
        if all_sent {
            item.retry.reset();
        } else {
            item.retry.retry_attempt = item.retry.retry_attempt.saturating_add(1);
            item.retry.next_retry_at = None;
        }
    }

    fn schedule_retry(&self, item: &mut ScheduledItem, now: DateTime<Utc>) {
        let policy = self.ctx.config.retry_policy();
        let attempt = item.retry.retry_attempt.saturating_add(1);
        let delay = policy.delay(attempt);
        let at = now + policy.chrono_delay(attempt);

        item.retry.retry_attempt = attempt;
        item.retry.next_retry_at = Some(at);
        item.retry.last_retry_delay_ms = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        item.scheduled_at = Some(at);
        debug!(item_id = item.id, attempt, retry_at = %at, "scheduled retry");
    }

    /// Delete published copies of an item.
    ///
    /// With `platforms = None` every platform holding a sent result is tried.
    #[tracing::instrument(skip(self), fields(item_id = id))]
    pub async fn retract(
        &self,
        id: ItemId,
        platforms: Option<Vec<PlatformId>>,
        now: DateTime<Utc>,
    ) -> Result<RetractReport, SchedulerError> {
        let mut item = self
            .ctx
            .store
            .get_item(id)
            .await?
            .ok_or(SchedulerError::ItemNotFound(id))?;

        let selected: Vec<PlatformId> = match platforms {
            Some(list) => list,
            None => item.platform_results.keys().copied().collect(),
        };

        let mut outcomes = BTreeMap::new();
        for platform in selected {
            let outcome = self.retract_one(&mut item, platform, now).await;
            outcomes.insert(platform, outcome);
        }

        let report = RetractReport { item, outcomes };
        if !report.any_deleted() {
            return Ok(report);
        }

        let mut item = report.item;
        if item.repeat == Repeat::None {
            item.post_uri = None;
            item.posted_at = None;
            item.scheduled_at = None;
        }
        self.ctx.store.save_item(&item).await?;
        self.ctx.notifier.item(item.id, item.status);
        let deleted = report
            .outcomes
            .values()
            .filter(|o| **o == RetractOutcome::Deleted)
            .count();
        info!(deleted, "retracted item");

        Ok(RetractReport {
            item,
            outcomes: report.outcomes,
        })
    }

    async fn retract_one(
        &self,
        item: &mut ScheduledItem,
        platform: PlatformId,
        now: DateTime<Utc>,
    ) -> RetractOutcome {
        let Some(result) = item.platform_results.get(&platform).cloned() else {
            return RetractOutcome::NotPublished;
        };
        if result.status != DeliveryStatus::Sent {
            return RetractOutcome::NotPublished;
        }

        let mut remote = result.remote_ref().unwrap_or_default();
        if remote.uri.is_none()
            && let Ok(Some(entry)) = self.ctx.send_log.latest_success(item.id, platform).await
        {
            remote.uri = entry.post_uri;
            remote.cid = entry.post_cid;
        }
        if remote.canonical_id().is_none() {
            return RetractOutcome::Failed("no remote identifier recorded".to_string());
        }

        if !result.simulated {
            let deleted = match self.ctx.platforms.ready(platform) {
                Ok(adapter) => adapter.delete(&remote).await,
                Err(e) => Err(e),
            };
            if let Err(e) = deleted {
                let code = match e {
                    AdapterError::Configuration(_) => CONFIG_ERROR,
                    _ => DELETE_FAILED,
                };
                warn!(item_id = item.id, %platform, error = %e, "retraction failed");
                self.ctx
                    .send_log
                    .record(NewSendLogEntry::failed(
                        item.id,
                        platform,
                        SendEvent::Delete,
                        code,
                        e.to_string(),
                        now,
                    ))
                    .await;
                return RetractOutcome::Failed(e.to_string());
            }
        }

        self.ctx
            .send_log
            .record(NewSendLogEntry::deleted(
                item.id,
                platform,
                remote.uri.clone(),
                remote.cid.clone(),
                now,
            ))
            .await;

        if let Some(entry) = item.platform_results.get_mut(&platform) {
            entry.status = DeliveryStatus::Deleted;
            entry.deleted_at = Some(now);
            entry.error = None;
        }
        info!(item_id = item.id, %platform, "retracted post");
        RetractOutcome::Deleted
    }
}
