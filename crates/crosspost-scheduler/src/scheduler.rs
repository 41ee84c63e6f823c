//! Tick orchestration and the manual control surface.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::SchedulerError;
use crate::batch::{BatchReport, run_batch};
use crate::config::SchedulerConfig;
use crate::context::DispatchContext;
use crate::notify::EventNotifier;
use crate::platform::PlatformRegistry;
use crate::post::{DispatchMode, PostDispatcher, RetractReport};
use crate::recurrence::apply_jitter;
use crate::reconcile::Reconciler;
use crate::store::Store;
use crate::thread::ThreadDispatcher;
use crate::types::{
    ItemId, ItemStatus, NewSegment, PendingReason, PlatformId, PlatformState, Repeat,
    ScheduledItem, SendLogEntry, Thread, ThreadId, ThreadSegment, ThreadStatus, check_media,
};

/// Ids currently being dispatched by this process.
type InFlight = Arc<Mutex<HashSet<i64>>>;

/// Marks an id as in flight until dropped.
struct Claim {
    set: InFlight,
    id: i64,
}

impl Claim {
    fn acquire(set: &InFlight, id: i64) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.insert(id) {
            return None;
        }
        Some(Self {
            set: Arc::clone(set),
            id,
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub posts: BatchReport,
    pub threads: BatchReport,
}

/// The dispatch engine.
#[derive(Clone)]
pub struct Scheduler {
    ctx: DispatchContext,
    posts: PostDispatcher,
    threads: ThreadDispatcher,
    reconciler: Reconciler,
    items_in_flight: InFlight,
    threads_in_flight: InFlight,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(
        store: Arc<dyn Store>,
        platforms: PlatformRegistry,
        config: SchedulerConfig,
        notifier: EventNotifier,
    ) -> Self {
        let ctx = DispatchContext::new(store, platforms, config, notifier);
        Self {
            posts: PostDispatcher::new(ctx.clone()),
            threads: ThreadDispatcher::new(ctx.clone()),
            reconciler: Reconciler::new(ctx.clone()),
            ctx,
            items_in_flight: InFlight::default(),
            threads_in_flight: InFlight::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.ctx.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.ctx.store
    }

    /// Park stale overdue posts for manual review.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<Vec<ItemId>, SchedulerError> {
        self.reconciler.run(now).await
    }

    /// Run both scans for `now` and wait for them.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let (posts, threads) = tokio::join!(self.scan_posts(now), self.scan_threads(now));
        TickReport { posts, threads }
    }

    /// Dispatch due posts with the worker pool.
    #[tracing::instrument(skip(self))]
    pub async fn scan_posts(&self, now: DateTime<Utc>) -> BatchReport {
        let due = match self.ctx.store.due_items(now, self.ctx.config.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "failed to load due posts");
                return BatchReport::default();
            }
        };
        if due.is_empty() {
            return BatchReport::default();
        }

        let ids: Vec<ItemId> = due.iter().map(|item| item.id).collect();
        let report = run_batch(ids, self.ctx.config.worker_count, |id| async move {
            let Some(_claim) = Claim::acquire(&self.items_in_flight, id) else {
                debug!(item_id = id, "item already in flight, skipping");
                return Ok(());
            };
            self.posts
                .dispatch(id, DispatchMode::Due, now)
                .await
                .map(|_| ())
        })
        .await;

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "post scan finished"
        );
        report
    }

    /// Dispatch due threads with the worker pool.
    #[tracing::instrument(skip(self))]
    pub async fn scan_threads(&self, now: DateTime<Utc>) -> BatchReport {
        let due = match self
            .ctx
            .store
            .due_threads(now, self.ctx.config.batch_size)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "failed to load due threads");
                return BatchReport::default();
            }
        };
        if due.is_empty() {
            return BatchReport::default();
        }

        let ids: Vec<ThreadId> = due.iter().map(|thread| thread.id).collect();
        let report = run_batch(ids, self.ctx.config.worker_count, |id| async move {
            let Some(_claim) = Claim::acquire(&self.threads_in_flight, id) else {
                debug!(thread_id = id, "thread already in flight, skipping");
                return Ok(());
            };
            self.threads
                .dispatch(id, DispatchMode::Due, now)
                .await
                .map(|_| ())
        })
        .await;

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "thread scan finished"
        );
        report
    }

    /// Run the scheduler loop.
    ///
    /// Reconciles once, then fires a tick every `tick_interval`. Each tick runs
    /// its post and thread scans as separate tasks so a slow tick never delays
    /// the next one. Scans still running at shutdown are awaited before this
    /// returns.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            tick_secs = self.ctx.config.tick_interval.as_secs(),
            discard_mode = self.ctx.config.discard_mode,
            "scheduler starting"
        );

        match self.reconcile(Utc::now()).await {
            Ok(moved) => debug!(count = moved.len(), "startup reconciliation finished"),
            Err(e) => error!(error = %e, "startup reconciliation failed"),
        }

        let mut ticker = interval(self.ctx.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut scans: JoinSet<BatchReport> = JoinSet::new();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("scheduler received shutdown signal");
                    }
                }
                _ = ticker.tick() => {
                    while let Some(finished) = scans.try_join_next() {
                        log_scan_exit(finished);
                    }
                    let now = Utc::now();
                    let posts = self.clone();
                    scans.spawn(async move { posts.scan_posts(now).await });
                    let threads = self.clone();
                    scans.spawn(async move { threads.scan_threads(now).await });
                }
            }
        }

        if !scans.is_empty() {
            info!(running = scans.len(), "waiting for in-flight scans");
        }
        while let Some(finished) = scans.join_next().await {
            log_scan_exit(finished);
        }

        info!("scheduler shut down gracefully");
    }

    // === Manual controls ===

    /// Validate and store a new scheduled item.
    #[tracing::instrument(skip(self, item), fields(repeat = item.repeat.as_str()))]
    pub async fn create_item(
        &self,
        mut item: ScheduledItem,
        now: DateTime<Utc>,
    ) -> Result<ScheduledItem, SchedulerError> {
        item.validate()?;
        self.validate_content(&item.content, item.target_platforms.iter())?;

        if item.repeat.is_recurring() && item.scheduled_at.is_none() {
            let first = item
                .recurrence()
                .next_occurrence(now)
                .ok_or(SchedulerError::Recurrence(item.id))?;
            item.scheduled_at = Some(first);
        }
        item.status = ItemStatus::Scheduled;
        item.pending_reason = None;
        item.scheduled_planned_at = item.scheduled_at;
        if item.repeat.is_recurring() {
            item.repeat_anchor_at = item.scheduled_at;
        }

        let stored = self.ctx.store.insert_item(item).await?;
        info!(item_id = stored.id, scheduled_at = ?stored.scheduled_at, "scheduled item");
        self.ctx.notifier.item(stored.id, stored.status);
        Ok(stored)
    }

    /// Validate and store a new scheduled thread.
    pub async fn create_thread(
        &self,
        thread: Thread,
        segments: Vec<NewSegment>,
    ) -> Result<(Thread, Vec<ThreadSegment>), SchedulerError> {
        if segments.is_empty() {
            return Err(SchedulerError::InvalidItem(
                "a thread needs at least one segment".to_string(),
            ));
        }
        for segment in &segments {
            if segment.content.trim().is_empty() {
                return Err(SchedulerError::InvalidItem(
                    "thread segments must not be empty".to_string(),
                ));
            }
            check_media(&segment.media)?;
            self.validate_content(&segment.content, thread.target_platforms.iter())?;
        }

        let (stored, segments) = self.ctx.store.insert_thread(thread, segments).await?;
        info!(thread_id = stored.id, segments = segments.len(), "scheduled thread");
        self.ctx.notifier.thread(stored.id, stored.status);
        Ok((stored, segments))
    }

    fn validate_content(
        &self,
        content: &str,
        platforms: impl Iterator<Item = PlatformId>,
    ) -> Result<(), SchedulerError> {
        for platform in platforms {
            if let Some(adapter) = self.ctx.platforms.get(platform) {
                adapter
                    .validate_content(content)
                    .map_err(|e| SchedulerError::InvalidItem(format!("{}: {}", platform, e)))?;
            }
        }
        Ok(())
    }

    /// Dispatch an item immediately, bypassing the due check.
    #[tracing::instrument(skip(self))]
    pub async fn publish_now(
        &self,
        id: ItemId,
        now: DateTime<Utc>,
    ) -> Result<ScheduledItem, SchedulerError> {
        let current = self.require_item(id).await?;
        let Some(_claim) = Claim::acquire(&self.items_in_flight, id) else {
            return Err(SchedulerError::Busy(format!("item {}", id)));
        };

        match self.posts.dispatch(id, DispatchMode::Immediate, now).await? {
            Some(item) => Ok(item),
            None => Ok(current),
        }
    }

    /// Resolve a `pending_manual` item by publishing it once.
    ///
    /// Recurring items keep their cadence: the next occurrence is computed from
    /// the stored anchor, skipping forward past `now`.
    pub async fn publish_pending_once(
        &self,
        id: ItemId,
        now: DateTime<Utc>,
    ) -> Result<ScheduledItem, SchedulerError> {
        self.require_pending(id).await?;
        self.publish_now(id, now).await
    }

    /// Skip a missed occurrence without dispatching it.
    ///
    /// One-shot items become `skipped`; recurring items move to their next
    /// occurrence after `now`.
    #[tracing::instrument(skip(self))]
    pub async fn discard_pending(
        &self,
        id: ItemId,
        now: DateTime<Utc>,
    ) -> Result<ScheduledItem, SchedulerError> {
        let mut item = self.require_pending(id).await?;

        if item.repeat == Repeat::None {
            item.status = ItemStatus::Skipped;
            item.pending_reason = Some(PendingReason::DiscardedByUser);
            item.scheduled_at = None;
        } else {
            let anchor = item.repeat_anchor_at.or(item.scheduled_at).unwrap_or(now);
            let next = item
                .recurrence()
                .next_occurrence_after(anchor, now)
                .ok_or(SchedulerError::Recurrence(id))?;
            let jitter = self.ctx.config.effective_jitter_minutes();
            item.status = ItemStatus::Scheduled;
            item.pending_reason = None;
            item.repeat_anchor_at = Some(next);
            item.scheduled_planned_at = Some(next);
            item.scheduled_at = Some(apply_jitter(next, jitter, &mut rand::thread_rng()));
        }

        self.ctx.store.save_item(&item).await?;
        info!(status = %item.status, next = ?item.scheduled_at, "discarded pending occurrence");
        self.ctx.notifier.item(item.id, item.status);
        Ok(item)
    }

    /// Items awaiting manual review.
    pub async fn list_pending(&self) -> Result<Vec<ScheduledItem>, SchedulerError> {
        Ok(self.ctx.store.pending_items().await?)
    }

    /// Dispatch a thread immediately.
    ///
    /// Allowed from `draft`, `scheduled` and `failed`.
    #[tracing::instrument(skip(self))]
    pub async fn publish_thread_now(
        &self,
        id: ThreadId,
        now: DateTime<Utc>,
    ) -> Result<Thread, SchedulerError> {
        let thread = self
            .ctx
            .store
            .get_thread(id)
            .await?
            .ok_or(SchedulerError::ThreadNotFound(id))?;
        if !matches!(
            thread.status,
            ThreadStatus::Draft | ThreadStatus::Scheduled | ThreadStatus::Failed
        ) {
            return Err(SchedulerError::InvalidThreadStatus {
                id,
                actual: thread.status,
            });
        }
        let Some(_claim) = Claim::acquire(&self.threads_in_flight, id) else {
            return Err(SchedulerError::Busy(format!("thread {}", id)));
        };

        self.threads
            .dispatch(id, DispatchMode::Immediate, now)
            .await?
            .ok_or(SchedulerError::ThreadNotFound(id))
    }

    /// Send-log entries of an item, newest first.
    pub async fn history(
        &self,
        id: ItemId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SendLogEntry>, SchedulerError> {
        self.require_item(id).await?;
        self.ctx.send_log.history(id, limit, offset).await
    }

    /// Remote state per target platform, derived from the send log.
    pub async fn platform_states(
        &self,
        id: ItemId,
    ) -> Result<BTreeMap<PlatformId, PlatformState>, SchedulerError> {
        let item = self.require_item(id).await?;
        self.ctx
            .send_log
            .platform_states(id, item.target_platforms.iter())
            .await
    }

    /// Delete published copies of an item.
    pub async fn retract(
        &self,
        id: ItemId,
        platforms: Option<Vec<PlatformId>>,
        now: DateTime<Utc>,
    ) -> Result<RetractReport, SchedulerError> {
        let Some(_claim) = Claim::acquire(&self.items_in_flight, id) else {
            return Err(SchedulerError::Busy(format!("item {}", id)));
        };
        let report = self.posts.retract(id, platforms, now).await?;
        if !report.any_deleted() {
            warn!(item_id = id, "nothing was retracted");
        }
        Ok(report)
    }

    async fn require_item(&self, id: ItemId) -> Result<ScheduledItem, SchedulerError> {
        self.ctx
            .store
            .get_item(id)
            .await?
            .ok_or(SchedulerError::ItemNotFound(id))
    }

    async fn require_pending(&self, id: ItemId) -> Result<ScheduledItem, SchedulerError> {
        let item = self.require_item(id).await?;
        if item.status != ItemStatus::PendingManual {
            return Err(SchedulerError::InvalidStatus {
                id,
                expected: ItemStatus::PendingManual,
                actual: item.status,
            });
        }
        Ok(item)
    }
}

fn log_scan_exit(finished: Result<BatchReport, tokio::task::JoinError>) {
    if let Err(e) = finished {
        error!(error = %e, "scan task aborted");
    }
}
