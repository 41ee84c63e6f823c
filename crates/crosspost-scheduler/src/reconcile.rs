//! Missed-execution reconciliation.
//!
//! On start, posts that should have fired longer ago than the grace
//! window are parked for manual review instead of being flushed by the first tick.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::SchedulerError;
use crate::context::DispatchContext;
use crate::types::{ItemId, ItemStatus, PendingReason};

/// Parks stale overdue posts in `pending_manual`.
#[derive(Clone)]
pub struct Reconciler {
    ctx: DispatchContext,
}

impl Reconciler {
    pub fn new(ctx: DispatchContext) -> Self {
        Self { ctx }
    }

    /// Move items scheduled before `now - grace_window` to `pending_manual`.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, now: DateTime<Utc>) -> Result<Vec<ItemId>, SchedulerError> {
        let cutoff = now - self.ctx.config.grace_window_chrono();
        let moved = self
            .ctx
            .store
            .mark_missed_pending(cutoff, PendingReason::MissedWhileOffline)
            .await?;

        for id in &moved {
            self.ctx.notifier.item(*id, ItemStatus::PendingManual);
        }
        if !moved.is_empty() {
            info!(count = moved.len(), %cutoff, "parked missed posts for manual review");
        }
        Ok(moved)
    }
}
