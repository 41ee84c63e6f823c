//! Persistent store port and an in-memory implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::types::{
    ItemId, ItemStatus, NewSegment, NewSendLogEntry, PendingReason, ScheduledItem, SegmentId,
    SendLogEntry, Thread, ThreadId, ThreadSegment, ThreadStatus,
};

/// Storage used by the dispatch engine.
///
/// Soft-deleted items are invisible to every item query. Field updates are
/// last-writer-wins; only send-log attempt numbering is transactional.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new item. The id on `item` is ignored and a fresh one assigned.
    async fn insert_item(&self, item: ScheduledItem) -> Result<ScheduledItem, StoreError>;

    async fn get_item(&self, id: ItemId) -> Result<Option<ScheduledItem>, StoreError>;

    async fn save_item(&self, item: &ScheduledItem) -> Result<(), StoreError>;

    /// Due single posts, oldest `scheduled_at` first.
    async fn due_items(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledItem>, StoreError>;

    /// Move scheduled items with `scheduled_at < cutoff` to `pending_manual`.
    async fn mark_missed_pending(
        &self,
        cutoff: DateTime<Utc>,
        reason: PendingReason,
    ) -> Result<Vec<ItemId>, StoreError>;

    /// Items awaiting manual review, oldest `scheduled_at` first.
    async fn pending_items(&self) -> Result<Vec<ScheduledItem>, StoreError>;

    /// Insert a thread with its segments, numbered from 1 in the given order.
    async fn insert_thread(
        &self,
        thread: Thread,
        segments: Vec<NewSegment>,
    ) -> Result<(Thread, Vec<ThreadSegment>), StoreError>;

    async fn get_thread(&self, id: ThreadId) -> Result<Option<Thread>, StoreError>;

    async fn save_thread(&self, thread: &Thread) -> Result<(), StoreError>;

    /// Segments of a thread in ascending sequence.
    async fn thread_segments(&self, id: ThreadId) -> Result<Vec<ThreadSegment>, StoreError>;

    async fn save_segment(&self, segment: &ThreadSegment) -> Result<(), StoreError>;

    /// Due threads, oldest `scheduled_at` first.
    async fn due_threads(&self, now: DateTime<Utc>, limit: usize)
    -> Result<Vec<Thread>, StoreError>;

    /// Append a log entry with `attempt = max(existing for item) + 1`.
    ///
    /// Reading the maximum and writing the row happen atomically.
    async fn append_send_log(&self, entry: NewSendLogEntry) -> Result<SendLogEntry, StoreError>;

    /// Log entries of an item, newest first.
    async fn send_log(
        &self,
        item_id: ItemId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SendLogEntry>, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    items: BTreeMap<ItemId, ScheduledItem>,
    threads: BTreeMap<ThreadId, Thread>,
    segments: BTreeMap<SegmentId, ThreadSegment>,
    send_log: Vec<SendLogEntry>,
    next_item_id: ItemId,
    next_thread_id: ThreadId,
    next_segment_id: SegmentId,
}

/// Store kept entirely in memory. Used for tests and discard-mode demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_by_schedule<T>(values: &mut [T], key: impl Fn(&T) -> (Option<DateTime<Utc>>, i64)) {
    values.sort_by_key(|v| key(v));
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_item(&self, mut item: ScheduledItem) -> Result<ScheduledItem, StoreError> {
        let mut state = self.state.lock().await;
        state.next_item_id += 1;
        item.id = state.next_item_id;
        state.items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<ScheduledItem>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .get(&id)
            .filter(|item| item.deleted_at.is_none())
            .cloned())
    }

    async fn save_item(&self, item: &ScheduledItem) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.items.contains_key(&item.id) {
            return Err(StoreError::Backend(format!("item {} does not exist", item.id)));
        }
        state.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn due_items(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledItem>, StoreError> {
        let state = self.state.lock().await;
        let mut due: Vec<_> = state
            .items
            .values()
            .filter(|item| item.is_due(now))
            .cloned()
            .collect();
        sort_by_schedule(&mut due, |item| (item.scheduled_at, item.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn mark_missed_pending(
        &self,
        cutoff: DateTime<Utc>,
        reason: PendingReason,
    ) -> Result<Vec<ItemId>, StoreError> {
        let mut state = self.state.lock().await;
        let mut moved = Vec::new();
        for item in state.items.values_mut() {
            let missed = item.deleted_at.is_none()
                && item.status == ItemStatus::Scheduled
                && item.scheduled_at.is_some_and(|at| at < cutoff);
            if missed {
                item.status = ItemStatus::PendingManual;
                item.pending_reason = Some(reason);
                moved.push(item.id);
            }
        }
        Ok(moved)
    }

    async fn pending_items(&self) -> Result<Vec<ScheduledItem>, StoreError> {
        let state = self.state.lock().await;
        let mut pending: Vec<_> = state
            .items
            .values()
            .filter(|item| item.deleted_at.is_none() && item.status == ItemStatus::PendingManual)
            .cloned()
            .collect();
        sort_by_schedule(&mut pending, |item| (item.scheduled_at, item.id));
        Ok(pending)
    }

    async fn insert_thread(
        &self,
        mut thread: Thread,
        segments: Vec<NewSegment>,
    ) -> Result<(Thread, Vec<ThreadSegment>), StoreError> {
        let mut state = self.state.lock().await;
        state.next_thread_id += 1;
        thread.id = state.next_thread_id;

        let mut inserted = Vec::with_capacity(segments.len());
        for (index, draft) in segments.into_iter().enumerate() {
            state.next_segment_id += 1;
            let segment = ThreadSegment::new(
                state.next_segment_id,
                thread.id,
                index as u32 + 1,
                draft.content,
            )
            .with_media(draft.media);
            state.segments.insert(segment.id, segment.clone());
            inserted.push(segment);
        }

        state.threads.insert(thread.id, thread.clone());
        Ok((thread, inserted))
    }

    async fn get_thread(&self, id: ThreadId) -> Result<Option<Thread>, StoreError> {
        Ok(self.state.lock().await.threads.get(&id).cloned())
    }

    async fn save_thread(&self, thread: &Thread) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.threads.contains_key(&thread.id) {
            return Err(StoreError::Backend(format!(
                "thread {} does not exist",
                thread.id
            )));
        }
        state.threads.insert(thread.id, thread.clone());
        Ok(())
    }

    async fn thread_segments(&self, id: ThreadId) -> Result<Vec<ThreadSegment>, StoreError> {
        let state = self.state.lock().await;
        let mut segments: Vec<_> = state
            .segments
            .values()
            .filter(|s| s.thread_id == id)
            .cloned()
            .collect();
        segments.sort_by_key(|s| s.sequence);
        Ok(segments)
    }

    async fn save_segment(&self, segment: &ThreadSegment) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.segments.values().any(|s| {
            s.thread_id == segment.thread_id
                && s.sequence == segment.sequence
                && s.id != segment.id
        }) {
            return Err(StoreError::Corrupt(format!(
                "thread {} already has segment {}",
                segment.thread_id, segment.sequence
            )));
        }
        state.segments.insert(segment.id, segment.clone());
        Ok(())
    }

    async fn due_threads(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Thread>, StoreError> {
        let state = self.state.lock().await;
        let mut due: Vec<_> = state
            .threads
            .values()
            .filter(|t| t.status == ThreadStatus::Scheduled && t.is_due(now))
            .cloned()
            .collect();
        sort_by_schedule(&mut due, |t| (t.scheduled_at, t.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn append_send_log(&self, entry: NewSendLogEntry) -> Result<SendLogEntry, StoreError> {
        let mut state = self.state.lock().await;
        let attempt = state
            .send_log
            .iter()
            .filter(|e| e.item_id == entry.item_id)
            .map(|e| e.attempt)
            .max()
            .unwrap_or(0)
            + 1;
        let id = state.send_log.len() as i64 + 1;
        let stored = entry.into_entry(id, attempt);
        state.send_log.push(stored.clone());
        Ok(stored)
    }

    async fn send_log(
        &self,
        item_id: ItemId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SendLogEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .send_log
            .iter()
            .rev()
            .filter(|e| e.item_id == item_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
