//! Conversions between domain types and table rows.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Row, ToSql};

use crosspost_scheduler::{
    ItemStatus, MediaRef, PendingReason, PlatformId, Repeat, RetryState, ScheduledItem, SendEvent,
    SendLogEntry, SendLogStatus, Thread, ThreadSegment, ThreadStatus,
};

use crate::DbError;

/// Named SQL parameters borrowed from encoded columns.
pub(crate) type NamedParams<'a> = Vec<(&'static str, &'a dyn ToSql)>;

/// Encode a timestamp as fixed-width UTC text, so text order is time order.
pub(crate) fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn encode_opt_time(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(encode_time)
}

fn decode_time(column: &'static str, raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| DbError::corrupt(column, raw))
}

fn decode_opt_time(
    column: &'static str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, DbError> {
    raw.map(|raw| decode_time(column, &raw)).transpose()
}

/// Encode attachments as a JSON array.
pub(crate) fn encode_media(media: &[MediaRef]) -> Result<String, DbError> {
    Ok(serde_json::to_string(media)?)
}

fn decode_enum<T>(
    column: &'static str,
    raw: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, DbError> {
    parse(raw).ok_or_else(|| DbError::corrupt(column, raw))
}

// === Scheduled items ===

pub(crate) const ITEM_COLUMNS: &str = "id, content, media, scheduled_at, scheduled_planned_at, \
    repeat_anchor_at, repeat, repeat_days_of_week, repeat_day_of_week, repeat_day_of_month, \
    status, pending_reason, target_platforms, platform_results, post_uri, posted_at, \
    retry_attempt, next_retry_at, last_retry_delay_ms, created_at, deleted_at";

/// Raw `scheduled_items` row.
pub(crate) struct ItemRow {
    id: i64,
    content: String,
    media: String,
    scheduled_at: Option<String>,
    scheduled_planned_at: Option<String>,
    repeat_anchor_at: Option<String>,
    repeat: String,
    repeat_days_of_week: String,
    repeat_day_of_week: Option<u8>,
    repeat_day_of_month: Option<u32>,
    status: String,
    pending_reason: Option<String>,
    target_platforms: String,
    platform_results: String,
    post_uri: Option<String>,
    posted_at: Option<String>,
    retry_attempt: u32,
    next_retry_at: Option<String>,
    last_retry_delay_ms: Option<i64>,
    created_at: String,
    deleted_at: Option<String>,
}

impl ItemRow {
    pub(crate) fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            content: row.get("content")?,
            media: row.get("media")?,
            scheduled_at: row.get("scheduled_at")?,
            scheduled_planned_at: row.get("scheduled_planned_at")?,
            repeat_anchor_at: row.get("repeat_anchor_at")?,
            repeat: row.get("repeat")?,
            repeat_days_of_week: row.get("repeat_days_of_week")?,
            repeat_day_of_week: row.get("repeat_day_of_week")?,
            repeat_day_of_month: row.get("repeat_day_of_month")?,
            status: row.get("status")?,
            pending_reason: row.get("pending_reason")?,
            target_platforms: row.get("target_platforms")?,
            platform_results: row.get("platform_results")?,
            post_uri: row.get("post_uri")?,
            posted_at: row.get("posted_at")?,
            retry_attempt: row.get("retry_attempt")?,
            next_retry_at: row.get("next_retry_at")?,
            last_retry_delay_ms: row.get("last_retry_delay_ms")?,
            created_at: row.get("created_at")?,
            deleted_at: row.get("deleted_at")?,
        })
    }

    pub(crate) fn into_item(self) -> Result<ScheduledItem, DbError> {
        Ok(ScheduledItem {
            id: self.id,
            content: self.content,
            media: serde_json::from_str(&self.media)?,
            scheduled_at: decode_opt_time("scheduled_at", self.scheduled_at)?,
            scheduled_planned_at: decode_opt_time(
                "scheduled_planned_at",
                self.scheduled_planned_at,
            )?,
            repeat_anchor_at: decode_opt_time("repeat_anchor_at", self.repeat_anchor_at)?,
            repeat: decode_enum("repeat", &self.repeat, Repeat::parse)?,
            repeat_days_of_week: serde_json::from_str(&self.repeat_days_of_week)?,
            repeat_day_of_week: self.repeat_day_of_week,
            repeat_day_of_month: self.repeat_day_of_month,
            status: decode_enum("status", &self.status, ItemStatus::parse)?,
            pending_reason: self
                .pending_reason
                .as_deref()
                .map(|raw| decode_enum("pending_reason", raw, PendingReason::parse))
                .transpose()?,
            target_platforms: serde_json::from_str(&self.target_platforms)?,
            platform_results: serde_json::from_str(&self.platform_results)?,
            post_uri: self.post_uri,
            posted_at: decode_opt_time("posted_at", self.posted_at)?,
            retry: RetryState {
                retry_attempt: self.retry_attempt,
                next_retry_at: decode_opt_time("next_retry_at", self.next_retry_at)?,
                last_retry_delay_ms: self.last_retry_delay_ms.map(|ms| ms.max(0) as u64),
            },
            created_at: decode_time("created_at", &self.created_at)?,
            deleted_at: decode_opt_time("deleted_at", self.deleted_at)?,
        })
    }
}

/// Encoded column values of an item, ready for binding.
pub(crate) struct ItemColumns<'a> {
    item: &'a ScheduledItem,
    media: String,
    scheduled_at: Option<String>,
    scheduled_planned_at: Option<String>,
    repeat_anchor_at: Option<String>,
    repeat: &'static str,
    repeat_days_of_week: String,
    status: &'static str,
    pending_reason: Option<&'static str>,
    target_platforms: String,
    platform_results: String,
    posted_at: Option<String>,
    next_retry_at: Option<String>,
    last_retry_delay_ms: Option<i64>,
    created_at: String,
    deleted_at: Option<String>,
}

impl<'a> ItemColumns<'a> {
    pub(crate) const INSERT: &'static str = "INSERT INTO scheduled_items (content, media, \
        scheduled_at, scheduled_planned_at, repeat_anchor_at, repeat, repeat_days_of_week, \
        repeat_day_of_week, repeat_day_of_month, status, pending_reason, target_platforms, \
        platform_results, post_uri, posted_at, retry_attempt, next_retry_at, \
        last_retry_delay_ms, created_at, deleted_at) VALUES (:content, :media, :scheduled_at, \
        :scheduled_planned_at, :repeat_anchor_at, :repeat, :repeat_days_of_week, \
        :repeat_day_of_week, :repeat_day_of_month, :status, :pending_reason, \
        :target_platforms, :platform_results, :post_uri, :posted_at, :retry_attempt, \
        :next_retry_at, :last_retry_delay_ms, :created_at, :deleted_at)";

    pub(crate) const ASSIGNMENTS: &'static str = "content = :content, \
        media = :media, scheduled_at = :scheduled_at, \
        scheduled_planned_at = :scheduled_planned_at, \
        repeat_anchor_at = :repeat_anchor_at, repeat = :repeat, \
        repeat_days_of_week = :repeat_days_of_week, repeat_day_of_week = :repeat_day_of_week, \
        repeat_day_of_month = :repeat_day_of_month, status = :status, \
        pending_reason = :pending_reason, target_platforms = :target_platforms, \
        platform_results = :platform_results, post_uri = :post_uri, posted_at = :posted_at, \
        retry_attempt = :retry_attempt, next_retry_at = :next_retry_at, \
        last_retry_delay_ms = :last_retry_delay_ms, created_at = :created_at, \
        deleted_at = :deleted_at";

    pub(crate) fn encode(item: &'a ScheduledItem) -> Result<Self, DbError> {
        Ok(Self {
            item,
            media: encode_media(&item.media)?,
            scheduled_at: encode_opt_time(item.scheduled_at),
            scheduled_planned_at: encode_opt_time(item.scheduled_planned_at),
            repeat_anchor_at: encode_opt_time(item.repeat_anchor_at),
            repeat: item.repeat.as_str(),
            repeat_days_of_week: serde_json::to_string(&item.repeat_days_of_week)?,
            status: item.status.as_str(),
            pending_reason: item.pending_reason.map(|r| r.as_str()),
            target_platforms: serde_json::to_string(&item.target_platforms)?,
            platform_results: serde_json::to_string(&item.platform_results)?,
            posted_at: encode_opt_time(item.posted_at),
            next_retry_at: encode_opt_time(item.retry.next_retry_at),
            last_retry_delay_ms: item
                .retry
                .last_retry_delay_ms
                .map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)),
            created_at: encode_time(item.created_at),
            deleted_at: encode_opt_time(item.deleted_at),
        })
    }

    /// Parameters named in [`Self::INSERT`] and [`Self::ASSIGNMENTS`].
    pub(crate) fn params(&self) -> NamedParams<'_> {
        vec![
            (":content", &self.item.content as &dyn ToSql),
            (":media", &self.media),
            (":scheduled_at", &self.scheduled_at),
            (":scheduled_planned_at", &self.scheduled_planned_at),
            (":repeat_anchor_at", &self.repeat_anchor_at),
            (":repeat", &self.repeat),
            (":repeat_days_of_week", &self.repeat_days_of_week),
            (":repeat_day_of_week", &self.item.repeat_day_of_week),
            (":repeat_day_of_month", &self.item.repeat_day_of_month),
            (":status", &self.status),
            (":pending_reason", &self.pending_reason),
            (":target_platforms", &self.target_platforms),
            (":platform_results", &self.platform_results),
            (":post_uri", &self.item.post_uri),
            (":posted_at", &self.posted_at),
            (":retry_attempt", &self.item.retry.retry_attempt),
            (":next_retry_at", &self.next_retry_at),
            (":last_retry_delay_ms", &self.last_retry_delay_ms),
            (":created_at", &self.created_at),
            (":deleted_at", &self.deleted_at),
        ]
    }
}

// === Threads ===

pub(crate) const THREAD_COLUMNS: &str =
    "id, title, scheduled_at, status, target_platforms, metadata, created_at";

pub(crate) struct ThreadRow {
    id: i64,
    title: Option<String>,
    scheduled_at: Option<String>,
    status: String,
    target_platforms: String,
    metadata: String,
    created_at: String,
}

impl ThreadRow {
    pub(crate) fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            scheduled_at: row.get("scheduled_at")?,
            status: row.get("status")?,
            target_platforms: row.get("target_platforms")?,
            metadata: row.get("metadata")?,
            created_at: row.get("created_at")?,
        })
    }

    pub(crate) fn into_thread(self) -> Result<Thread, DbError> {
        Ok(Thread {
            id: self.id,
            title: self.title,
            scheduled_at: decode_opt_time("scheduled_at", self.scheduled_at)?,
            status: decode_enum("status", &self.status, ThreadStatus::parse)?,
            target_platforms: serde_json::from_str(&self.target_platforms)?,
            metadata: serde_json::from_str(&self.metadata)?,
            created_at: decode_time("created_at", &self.created_at)?,
        })
    }
}

pub(crate) struct ThreadColumns<'a> {
    thread: &'a Thread,
    scheduled_at: Option<String>,
    status: &'static str,
    target_platforms: String,
    metadata: String,
    created_at: String,
}

impl<'a> ThreadColumns<'a> {
    pub(crate) const INSERT: &'static str = "INSERT INTO threads (title, scheduled_at, \
        status, target_platforms, metadata, created_at) VALUES (:title, :scheduled_at, \
        :status, :target_platforms, :metadata, :created_at)";

    pub(crate) const ASSIGNMENTS: &'static str = "title = :title, \
        scheduled_at = :scheduled_at, status = :status, target_platforms = :target_platforms, \
        metadata = :metadata, created_at = :created_at";

    pub(crate) fn encode(thread: &'a Thread) -> Result<Self, DbError> {
        Ok(Self {
            thread,
            scheduled_at: encode_opt_time(thread.scheduled_at),
            status: thread.status.as_str(),
            target_platforms: serde_json::to_string(&thread.target_platforms)?,
            metadata: serde_json::to_string(&thread.metadata)?,
            created_at: encode_time(thread.created_at),
        })
    }

    pub(crate) fn params(&self) -> NamedParams<'_> {
        vec![
            (":title", &self.thread.title as &dyn ToSql),
            (":scheduled_at", &self.scheduled_at),
            (":status", &self.status),
            (":target_platforms", &self.target_platforms),
            (":metadata", &self.metadata),
            (":created_at", &self.created_at),
        ]
    }
}

pub(crate) const SEGMENT_COLUMNS: &str =
    "id, thread_id, sequence, content, media, remote_id, posted_at";

pub(crate) struct SegmentRow {
    id: i64,
    thread_id: i64,
    sequence: u32,
    content: String,
    media: String,
    remote_id: Option<String>,
    posted_at: Option<String>,
}

impl SegmentRow {
    pub(crate) fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            thread_id: row.get("thread_id")?,
            sequence: row.get("sequence")?,
            content: row.get("content")?,
            media: row.get("media")?,
            remote_id: row.get("remote_id")?,
            posted_at: row.get("posted_at")?,
        })
    }

    pub(crate) fn into_segment(self) -> Result<ThreadSegment, DbError> {
        Ok(ThreadSegment {
            id: self.id,
            thread_id: self.thread_id,
            sequence: self.sequence,
            content: self.content,
            media: serde_json::from_str(&self.media)?,
            remote_id: self.remote_id,
            posted_at: decode_opt_time("posted_at", self.posted_at)?,
        })
    }
}

pub(crate) fn segment_posted_at(segment: &ThreadSegment) -> Option<String> {
    encode_opt_time(segment.posted_at)
}

// === Send log ===

pub(crate) const SEND_LOG_COLUMNS: &str = "id, item_id, platform, event, status, posted_at, \
    post_uri, post_cid, error_code, error_message, content_snapshot, attempt";

pub(crate) struct SendLogRow {
    id: i64,
    item_id: i64,
    platform: String,
    event: String,
    status: String,
    posted_at: String,
    post_uri: Option<String>,
    post_cid: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    content_snapshot: Option<String>,
    attempt: u32,
}

impl SendLogRow {
    pub(crate) fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            item_id: row.get("item_id")?,
            platform: row.get("platform")?,
            event: row.get("event")?,
            status: row.get("status")?,
            posted_at: row.get("posted_at")?,
            post_uri: row.get("post_uri")?,
            post_cid: row.get("post_cid")?,
            error_code: row.get("error_code")?,
            error_message: row.get("error_message")?,
            content_snapshot: row.get("content_snapshot")?,
            attempt: row.get("attempt")?,
        })
    }

    pub(crate) fn into_entry(self) -> Result<SendLogEntry, DbError> {
        Ok(SendLogEntry {
            id: self.id,
            item_id: self.item_id,
            platform: decode_enum("platform", &self.platform, PlatformId::parse)?,
            event: decode_enum("event", &self.event, SendEvent::parse)?,
            status: decode_enum("status", &self.status, SendLogStatus::parse)?,
            posted_at: decode_time("posted_at", &self.posted_at)?,
            post_uri: self.post_uri,
            post_cid: self.post_cid,
            error_code: self.error_code,
            error_message: self.error_message,
            content_snapshot: self.content_snapshot,
            attempt: self.attempt,
        })
    }
}
