//! Scheduler types.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SchedulerError;
use crate::platform::Delivery;
use crate::recurrence::RecurrenceRule;

/// Identifier of a single scheduled post.
pub type ItemId = i64;

/// Identifier of a thread.
pub type ThreadId = i64;

/// Identifier of a thread segment.
pub type SegmentId = i64;

/// An external delivery destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformId {
    Bluesky,
    Mastodon,
}

impl PlatformId {
    /// Every known platform.
    pub const ALL: [PlatformId; 2] = [PlatformId::Bluesky, PlatformId::Mastodon];

    /// Platform whose identifiers win when one canonical remote id is needed.
    pub const PREFERRED: PlatformId = PlatformId::Bluesky;

    /// Pick the preferred platform's entry, else the first one.
    pub fn pick_preferred<T>(entries: &[(PlatformId, T)]) -> Option<&(PlatformId, T)> {
        entries
            .iter()
            .find(|(platform, _)| *platform == Self::PREFERRED)
            .or_else(|| entries.first())
    }

    /// Stable string form used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bluesky => "bluesky",
            Self::Mastodon => "mastodon",
        }
    }

    /// Parse from the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bluesky" => Some(Self::Bluesky),
            "mastodon" => Some(Self::Mastodon),
            _ => None,
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown platform '{}'", s))
    }
}

/// Non-empty, duplicate-free list of target platforms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PlatformId>", into = "Vec<PlatformId>")]
pub struct TargetPlatforms(Vec<PlatformId>);

impl TargetPlatforms {
    /// Build a target list, dropping duplicates while keeping first-seen order.
    pub fn new(platforms: impl IntoIterator<Item = PlatformId>) -> Result<Self, SchedulerError> {
        let mut seen = BTreeSet::new();
        let list: Vec<_> = platforms.into_iter().filter(|p| seen.insert(*p)).collect();
        if list.is_empty() {
            return Err(SchedulerError::InvalidItem(
                "target platforms must not be empty".to_string(),
            ));
        }
        Ok(Self(list))
    }

    /// A target list with exactly one platform.
    pub fn single(platform: PlatformId) -> Self {
        Self(vec![platform])
    }

    pub fn iter(&self) -> impl Iterator<Item = PlatformId> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[PlatformId] {
        &self.0
    }

    pub fn contains(&self, platform: PlatformId) -> bool {
        self.0.contains(&platform)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<PlatformId>> for TargetPlatforms {
    type Error = String;

    fn try_from(value: Vec<PlatformId>) -> Result<Self, Self::Error> {
        Self::new(value).map_err(|e| e.to_string())
    }
}

impl From<TargetPlatforms> for Vec<PlatformId> {
    fn from(value: TargetPlatforms) -> Self {
        value.0
    }
}

/// How a post repeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Repeat {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

impl Repeat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl FromStr for Repeat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown repeat mode '{}'", s))
    }
}

/// Lifecycle status of a scheduled post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Draft,
    Scheduled,
    Sent,
    PendingManual,
    Skipped,
    Error,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sent => "sent",
            Self::PendingManual => "pending_manual",
            Self::Skipped => "skipped",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "scheduled" => Some(Self::Scheduled),
            "sent" => Some(Self::Sent),
            "pending_manual" => Some(Self::PendingManual),
            "skipped" => Some(Self::Skipped),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an item is waiting for an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingReason {
    /// The item came due while the process was not running.
    MissedWhileOffline,
    /// An operator discarded a one-shot item.
    DiscardedByUser,
}

impl PendingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissedWhileOffline => "missed_while_offline",
            Self::DiscardedByUser => "discarded_by_user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "missed_while_offline" => Some(Self::MissedWhileOffline),
            "discarded_by_user" => Some(Self::DiscardedByUser),
            _ => None,
        }
    }
}

/// Outcome of delivering to one platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Deleted,
}

/// Per-platform delivery record embedded in an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    /// Set when the result was synthesized in discard mode.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub simulated: bool,
}

impl DeliveryResult {
    /// A successful delivery reported by an adapter.
    pub fn sent(delivery: &Delivery) -> Self {
        Self {
            status: DeliveryStatus::Sent,
            uri: delivery.remote.uri.clone(),
            status_id: delivery.remote.status_id.clone(),
            cid: delivery.remote.cid.clone(),
            posted_at: Some(delivery.posted_at),
            failed_at: None,
            deleted_at: None,
            error: None,
            attempts: delivery.attempts,
            simulated: false,
        }
    }

    /// A failed delivery.
    pub fn failed(error: impl Into<String>, attempts: u32, at: DateTime<Utc>) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            uri: None,
            status_id: None,
            cid: None,
            posted_at: None,
            failed_at: Some(at),
            deleted_at: None,
            error: Some(error.into()),
            attempts,
            simulated: false,
        }
    }

    /// A success-shaped result that never touched a platform.
    pub fn simulated(uri: String, at: DateTime<Utc>) -> Self {
        Self {
            status: DeliveryStatus::Sent,
            uri: Some(uri),
            status_id: None,
            cid: None,
            posted_at: Some(at),
            failed_at: None,
            deleted_at: None,
            error: None,
            attempts: 0,
            simulated: true,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == DeliveryStatus::Sent
    }

    /// Remote identifiers of a sent result.
    pub fn remote_ref(&self) -> Option<RemoteRef> {
        if self.uri.is_none() && self.status_id.is_none() {
            return None;
        }
        Some(RemoteRef {
            uri: self.uri.clone(),
            cid: self.cid.clone(),
            status_id: self.status_id.clone(),
        })
    }
}

/// Identifiers of a post on a remote platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    /// URI (AT URI on Bluesky, status URL on Mastodon).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Content hash (Bluesky only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    /// Status id (Mastodon only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<String>,
}

impl RemoteRef {
    /// The identifier persisted as a segment's canonical remote id.
    pub fn canonical_id(&self) -> Option<&str> {
        self.uri.as_deref().or(self.status_id.as_deref())
    }
}

/// Transient retry bookkeeping for one item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    /// Consecutive failed dispatches (resets once every platform is sent).
    pub retry_attempt: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_retry_delay_ms: Option<u64>,
}

impl RetryState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Most media attachments a post or thread segment carries.
pub const MAX_MEDIA: usize = 4;

const DEFAULT_MEDIA_MIME: &str = "image/jpeg";

fn default_media_mime() -> String {
    DEFAULT_MEDIA_MIME.to_string()
}

/// An image file attached to a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Local file uploaded at dispatch time.
    pub path: PathBuf,
    #[serde(default = "default_media_mime")]
    pub mime: String,
    #[serde(default)]
    pub alt_text: String,
}

impl MediaRef {
    /// Attach `path`, guessing the MIME type from its extension.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mime = match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            _ => DEFAULT_MEDIA_MIME,
        };
        Self {
            path,
            mime: mime.to_string(),
            alt_text: String::new(),
        }
    }

    pub fn with_alt_text(mut self, alt_text: impl Into<String>) -> Self {
        self.alt_text = alt_text.into();
        self
    }
}

/// Reject attachment lists over [`MAX_MEDIA`].
pub fn check_media(media: &[MediaRef]) -> Result<(), SchedulerError> {
    if media.len() > MAX_MEDIA {
        return Err(SchedulerError::InvalidItem(format!(
            "at most {} media attachments are allowed, got {}",
            MAX_MEDIA,
            media.len()
        )));
    }
    Ok(())
}

/// A single post scheduled for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledItem {
    pub id: ItemId,
    pub content: String,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    /// Next fire time (may carry jitter). `None` once terminal.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Jitter-free planned time of the next occurrence.
    pub scheduled_planned_at: Option<DateTime<Utc>>,
    /// Anchor recurrence math is computed from.
    pub repeat_anchor_at: Option<DateTime<Utc>>,
    pub repeat: Repeat,
    /// Weekdays (0 = Sunday .. 6 = Saturday) for weekly repeats.
    #[serde(default)]
    pub repeat_days_of_week: BTreeSet<u8>,
    /// Single stored weekday, used when no weekday set is configured.
    #[serde(default)]
    pub repeat_day_of_week: Option<u8>,
    /// Day of month (1..=31) for monthly repeats.
    #[serde(default)]
    pub repeat_day_of_month: Option<u32>,
    pub status: ItemStatus,
    pub pending_reason: Option<PendingReason>,
    pub target_platforms: TargetPlatforms,
    #[serde(default)]
    pub platform_results: BTreeMap<PlatformId, DeliveryResult>,
    pub post_uri: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry: RetryState,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ScheduledItem {
    /// Create a one-shot item firing at `at`.
    pub fn once(
        id: ItemId,
        content: impl Into<String>,
        target_platforms: TargetPlatforms,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            content: content.into(),
            media: Vec::new(),
            scheduled_at: Some(at),
            scheduled_planned_at: Some(at),
            repeat_anchor_at: None,
            repeat: Repeat::None,
            repeat_days_of_week: BTreeSet::new(),
            repeat_day_of_week: None,
            repeat_day_of_month: None,
            status: ItemStatus::Scheduled,
            pending_reason: None,
            target_platforms,
            platform_results: BTreeMap::new(),
            post_uri: None,
            posted_at: None,
            retry: RetryState::default(),
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    /// Create a recurring item whose first occurrence (and anchor) is `first`.
    pub fn recurring(
        id: ItemId,
        content: impl Into<String>,
        target_platforms: TargetPlatforms,
        repeat: Repeat,
        first: DateTime<Utc>,
    ) -> Self {
        Self {
            repeat,
            repeat_anchor_at: Some(first),
            ..Self::once(id, content, target_platforms, first)
        }
    }

    pub fn with_media(mut self, media: Vec<MediaRef>) -> Self {
        self.media = media;
        self
    }

    /// Check if this item is due for dispatch at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.deleted_at.is_some() || self.status != ItemStatus::Scheduled {
            return false;
        }
        if self.repeat == Repeat::None && self.post_uri.is_some() {
            return false;
        }
        self.scheduled_at.is_some_and(|at| at <= now)
    }

    /// Recurrence settings of this item.
    pub fn recurrence(&self) -> RecurrenceRule {
        RecurrenceRule {
            repeat: self.repeat,
            days_of_week: self.repeat_days_of_week.clone(),
            day_of_week: self.repeat_day_of_week,
            day_of_month: self.repeat_day_of_month,
        }
    }

    /// True when every target platform's latest result is `sent`.
    pub fn all_sent(&self) -> bool {
        self.target_platforms
            .iter()
            .all(|p| self.platform_results.get(&p).is_some_and(DeliveryResult::is_sent))
    }

    /// Check the fields an item needs before it may be scheduled.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.content.trim().is_empty() {
            return Err(SchedulerError::InvalidItem("content is required".to_string()));
        }
        if self.repeat == Repeat::None && self.scheduled_at.is_none() {
            return Err(SchedulerError::InvalidItem(
                "scheduled_at is required when repeat is none".to_string(),
            ));
        }
        if let Some(day) = self.repeat_days_of_week.iter().find(|d| **d > 6) {
            return Err(SchedulerError::InvalidItem(format!(
                "weekday {} is out of range 0-6",
                day
            )));
        }
        if self.repeat_day_of_week.is_some_and(|d| d > 6) {
            return Err(SchedulerError::InvalidItem(
                "repeat_day_of_week must be between 0 and 6".to_string(),
            ));
        }
        if self
            .repeat_day_of_month
            .is_some_and(|d| !(1..=31).contains(&d))
        {
            return Err(SchedulerError::InvalidItem(
                "repeat_day_of_month must be between 1 and 31".to_string(),
            ));
        }
        check_media(&self.media)
    }
}

/// Lifecycle status of a thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    #[default]
    Draft,
    Scheduled,
    Publishing,
    Published,
    Failed,
    Deleted,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "scheduled" => Some(Self::Scheduled),
            "publishing" => Some(Self::Publishing),
            "published" => Some(Self::Published),
            "failed" => Some(Self::Failed),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery record of one segment on one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentResult {
    pub sequence: u32,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub remote: RemoteRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub simulated: bool,
}

/// Delivery record of a whole thread on one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadPlatformResult {
    pub status: DeliveryStatus,
    #[serde(default)]
    pub segments: Vec<SegmentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Dispatch bookkeeping stored on a thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadMetadata {
    #[serde(default)]
    pub platform_results: BTreeMap<PlatformId, ThreadPlatformResult>,
    pub last_dispatch_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// A multi-post thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub title: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: ThreadStatus,
    pub target_platforms: TargetPlatforms,
    #[serde(default)]
    pub metadata: ThreadMetadata,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    /// Create a thread scheduled at `at`.
    pub fn scheduled(id: ThreadId, target_platforms: TargetPlatforms, at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: None,
            scheduled_at: Some(at),
            status: ThreadStatus::Scheduled,
            target_platforms,
            metadata: ThreadMetadata::default(),
            created_at: Utc::now(),
        }
    }

    /// Check if this thread is due for dispatch at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ThreadStatus::Scheduled && self.scheduled_at.is_some_and(|at| at <= now)
    }
}

/// One post of a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSegment {
    pub id: SegmentId,
    pub thread_id: ThreadId,
    /// Dispatch order, unique per thread.
    pub sequence: u32,
    pub content: String,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    pub remote_id: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
}

impl ThreadSegment {
    pub fn new(
        id: SegmentId,
        thread_id: ThreadId,
        sequence: u32,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id,
            thread_id,
            sequence,
            content: content.into(),
            media: Vec::new(),
            remote_id: None,
            posted_at: None,
        }
    }

    pub fn with_media(mut self, media: Vec<MediaRef>) -> Self {
        self.media = media;
        self
    }
}

/// Content of a thread segment before it is stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewSegment {
    pub content: String,
    pub media: Vec<MediaRef>,
}

impl NewSegment {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            media: Vec::new(),
        }
    }

    pub fn with_media(mut self, media: Vec<MediaRef>) -> Self {
        self.media = media;
        self
    }
}

impl From<String> for NewSegment {
    fn from(content: String) -> Self {
        Self::new(content)
    }
}

impl From<&str> for NewSegment {
    fn from(content: &str) -> Self {
        Self::new(content)
    }
}

/// Kind of platform operation recorded in the send log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendEvent {
    #[default]
    Send,
    Delete,
}

impl SendEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "send" => Some(Self::Send),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Outcome recorded in the send log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendLogStatus {
    Success,
    Failed,
    Skipped,
}

impl SendLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// A send-log row before the store assigns its id and attempt number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSendLogEntry {
    pub item_id: ItemId,
    pub platform: PlatformId,
    pub event: SendEvent,
    pub status: SendLogStatus,
    pub posted_at: DateTime<Utc>,
    pub post_uri: Option<String>,
    pub post_cid: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub content_snapshot: Option<String>,
}

impl NewSendLogEntry {
    /// Attach the store-assigned id and attempt number.
    pub fn into_entry(self, id: i64, attempt: u32) -> SendLogEntry {
        SendLogEntry {
            id,
            item_id: self.item_id,
            platform: self.platform,
            event: self.event,
            status: self.status,
            posted_at: self.posted_at,
            post_uri: self.post_uri,
            post_cid: self.post_cid,
            error_code: self.error_code,
            error_message: self.error_message,
            content_snapshot: self.content_snapshot,
            attempt,
        }
    }
}

/// A durable record of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendLogEntry {
    pub id: i64,
    pub item_id: ItemId,
    pub platform: PlatformId,
    pub event: SendEvent,
    pub status: SendLogStatus,
    pub posted_at: DateTime<Utc>,
    pub post_uri: Option<String>,
    pub post_cid: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub content_snapshot: Option<String>,
    /// Strictly increasing per item, starting at 1.
    pub attempt: u32,
}

/// Remote state of an item on one platform, derived from its latest log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformState {
    Online,
    Deleted,
    DeleteFailed,
    SendFailed,
    Unknown,
}

impl PlatformState {
    /// Derive the state from the most recent log entry of a platform.
    pub fn from_latest(entry: Option<&SendLogEntry>) -> Self {
        let Some(entry) = entry else {
            return Self::Unknown;
        };
        match (entry.event, entry.status) {
            (SendEvent::Send, SendLogStatus::Success) => Self::Online,
            (SendEvent::Send, SendLogStatus::Failed) => Self::SendFailed,
            (SendEvent::Delete, SendLogStatus::Success) => Self::Deleted,
            (SendEvent::Delete, SendLogStatus::Failed) => Self::DeleteFailed,
            (_, SendLogStatus::Skipped) => Self::Unknown,
        }
    }
}
