//! Send-log recorder.
//!
//! Every platform attempt is appended to a durable log with a per-item attempt
//! number assigned by the store. Recording is best-effort: a failed write is
//! logged and dropped, and never changes the delivery outcome.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::SchedulerError;
use crate::platform::Delivery;
use crate::store::Store;
use crate::types::{
    ItemId, NewSendLogEntry, PlatformId, PlatformState, SendEvent, SendLogEntry, SendLogStatus,
};

/// Default page size for history queries.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Error code for missing credentials or adapters.
pub const CONFIG_ERROR: &str = "config_error";

/// Error code for a failed platform call.
pub const DELIVERY_FAILED: &str = "delivery_failed";

/// Error code for a failed retraction.
pub const DELETE_FAILED: &str = "delete_failed";

/// Marker code on entries written in discard mode.
pub const DISCARD_MODE: &str = "discard_mode";

impl NewSendLogEntry {
    fn base(
        item_id: ItemId,
        platform: PlatformId,
        event: SendEvent,
        status: SendLogStatus,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            item_id,
            platform,
            event,
            status,
            posted_at: at,
            post_uri: None,
            post_cid: None,
            error_code: None,
            error_message: None,
            content_snapshot: None,
        }
    }

    /// A successful send.
    pub fn sent(item_id: ItemId, platform: PlatformId, delivery: &Delivery, content: &str) -> Self {
        Self {
            post_uri: delivery
                .remote
                .uri
                .clone()
                .or_else(|| delivery.remote.status_id.clone()),
            post_cid: delivery.remote.cid.clone(),
            content_snapshot: Some(content.to_string()),
            ..Self::base(
                item_id,
                platform,
                SendEvent::Send,
                SendLogStatus::Success,
                delivery.posted_at,
            )
        }
    }

    /// A failed send or delete.
    pub fn failed(
        item_id: ItemId,
        platform: PlatformId,
        event: SendEvent,
        code: &str,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            error_code: Some(code.to_string()),
            error_message: Some(message.into()),
            ..Self::base(item_id, platform, event, SendLogStatus::Failed, at)
        }
    }

    /// A send simulated in discard mode.
    pub fn skipped(
        item_id: ItemId,
        platform: PlatformId,
        uri: &str,
        content: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            post_uri: Some(uri.to_string()),
            error_code: Some(DISCARD_MODE.to_string()),
            content_snapshot: Some(content.to_string()),
            ..Self::base(item_id, platform, SendEvent::Send, SendLogStatus::Skipped, at)
        }
    }

    /// A successful delete.
    pub fn deleted(
        item_id: ItemId,
        platform: PlatformId,
        uri: Option<String>,
        cid: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            post_uri: uri,
            post_cid: cid,
            ..Self::base(item_id, platform, SendEvent::Delete, SendLogStatus::Success, at)
        }
    }
}

/// Writes and reads the attempt log.
#[derive(Clone)]
pub struct SendLogRecorder {
    store: Arc<dyn Store>,
}

impl SendLogRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append an entry. Failures are logged and swallowed.
    pub async fn record(&self, entry: NewSendLogEntry) -> Option<SendLogEntry> {
        let item_id = entry.item_id;
        let platform = entry.platform;
        match self.store.append_send_log(entry).await {
            Ok(stored) => {
                debug!(
                    item_id,
                    %platform,
                    attempt = stored.attempt,
                    status = stored.status.as_str(),
                    "recorded send attempt"
                );
                Some(stored)
            }
            Err(e) => {
                warn!(item_id, %platform, error = %e, "failed to write send log");
                None
            }
        }
    }

    /// Entries of an item, newest first.
    pub async fn history(
        &self,
        item_id: ItemId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SendLogEntry>, SchedulerError> {
        Ok(self.store.send_log(item_id, limit, offset).await?)
    }

    /// Latest remote state per platform, derived from the log.
    ///
    /// Platforms in `platforms` without any entry report `unknown`.
    pub async fn platform_states(
        &self,
        item_id: ItemId,
        platforms: impl IntoIterator<Item = PlatformId>,
    ) -> Result<BTreeMap<PlatformId, PlatformState>, SchedulerError> {
        let entries = self.store.send_log(item_id, usize::MAX, 0).await?;
        let states = platforms
            .into_iter()
            .map(|platform| {
                let latest = entries
                    .iter()
                    .find(|e| e.platform == platform && e.status != SendLogStatus::Skipped);
                (platform, PlatformState::from_latest(latest))
            })
            .collect();
        Ok(states)
    }

    /// Identifiers of the latest successful send on a platform.
    pub async fn latest_success(
        &self,
        item_id: ItemId,
        platform: PlatformId,
    ) -> Result<Option<SendLogEntry>, SchedulerError> {
        let entries = self.store.send_log(item_id, usize::MAX, 0).await?;
        Ok(entries.into_iter().find(|e| {
            e.platform == platform
                && e.event == SendEvent::Send
                && e.status == SendLogStatus::Success
        }))
    }
}
