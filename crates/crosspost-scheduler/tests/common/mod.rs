//! Shared fixtures for scheduler integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crosspost_scheduler::{
    AdapterError, Delivery, EventNotifier, ItemId, MemoryStore, NewSegment, NewSendLogEntry,
    PendingReason, PlatformAdapter, PlatformId, PlatformRegistry, PostPayload, RemoteRef,
    ScheduledItem, Scheduler, SchedulerConfig, SendLogEntry, Store, StoreError, Thread, ThreadId,
    ThreadSegment,
};

/// Scripted outcome of one send.
#[derive(Debug, Clone)]
pub enum Step {
    Ok,
    Fail(String),
    Panic,
}

/// Adapter whose send results follow a script. Unscripted sends succeed.
pub struct ScriptedAdapter {
    platform: PlatformId,
    configured: bool,
    delay: Option<Duration>,
    script: Mutex<VecDeque<Step>>,
    sends: Mutex<Vec<PostPayload>>,
    deliveries: Mutex<Vec<RemoteRef>>,
    deletes: Mutex<Vec<RemoteRef>>,
    counter: AtomicU32,
}

impl ScriptedAdapter {
    pub fn new(platform: PlatformId) -> Arc<Self> {
        Arc::new(Self::build(platform, true, None))
    }

    pub fn unconfigured(platform: PlatformId) -> Arc<Self> {
        Arc::new(Self::build(platform, false, None))
    }

    pub fn slow(platform: PlatformId, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(platform, true, Some(delay)))
    }

    fn build(platform: PlatformId, configured: bool, delay: Option<Duration>) -> Self {
        Self {
            platform,
            configured,
            delay,
            script: Mutex::new(VecDeque::new()),
            sends: Mutex::new(Vec::new()),
            deliveries: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            counter: AtomicU32::new(0),
        }
    }

    pub fn script(&self, steps: impl IntoIterator<Item = Step>) {
        self.script.lock().unwrap().extend(steps);
    }

    pub fn sends(&self) -> Vec<PostPayload> {
        self.sends.lock().unwrap().clone()
    }

    pub fn deliveries(&self) -> Vec<RemoteRef> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<RemoteRef> {
        self.deletes.lock().unwrap().clone()
    }

    fn remote(&self, n: u32) -> RemoteRef {
        match self.platform {
            PlatformId::Bluesky => RemoteRef {
                uri: Some(format!("at://did:plc:test/app.bsky.feed.post/{}", n)),
                cid: Some(format!("bafycid{}", n)),
                status_id: None,
            },
            PlatformId::Mastodon => RemoteRef {
                uri: Some(format!("https://mastodon.test/@crosspost/{}", n)),
                cid: None,
                status_id: Some(n.to_string()),
            },
        }
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    fn platform(&self) -> PlatformId {
        self.platform
    }

    fn validate_credentials(&self) -> Result<(), AdapterError> {
        if self.configured {
            Ok(())
        } else {
            Err(AdapterError::Configuration(format!(
                "{} credentials are missing",
                self.platform
            )))
        }
    }

    fn validate_content(&self, content: &str) -> Result<(), AdapterError> {
        if content.chars().count() > 300 {
            return Err(AdapterError::Validation("too long".to_string()));
        }
        Ok(())
    }

    async fn send(&self, payload: &PostPayload) -> Result<Delivery, AdapterError> {
        self.sends.lock().unwrap().push(payload.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Ok);
        match step {
            Step::Ok => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
                let remote = self.remote(n);
                self.deliveries.lock().unwrap().push(remote.clone());
                Ok(Delivery {
                    remote,
                    posted_at: Utc::now(),
                    attempts: 1,
                })
            }
            Step::Fail(message) => Err(AdapterError::delivery(message, 3)),
            Step::Panic => panic!("scripted adapter panic"),
        }
    }

    async fn delete(&self, remote: &RemoteRef) -> Result<(), AdapterError> {
        self.deletes.lock().unwrap().push(remote.clone());
        Ok(())
    }
}

/// Scheduler wired to an in-memory store.
pub struct Harness {
    pub store: Arc<dyn Store>,
    pub scheduler: Scheduler,
}

impl Harness {
    pub fn new(config: SchedulerConfig, adapters: Vec<Arc<ScriptedAdapter>>) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config, adapters, EventNotifier::disabled())
    }

    pub fn with_store(
        store: Arc<dyn Store>,
        config: SchedulerConfig,
        adapters: Vec<Arc<ScriptedAdapter>>,
        notifier: EventNotifier,
    ) -> Self {
        let mut registry = PlatformRegistry::new();
        for adapter in adapters {
            registry.register(adapter);
        }
        let scheduler = Scheduler::new(Arc::clone(&store), registry, config, notifier);
        Self { store, scheduler }
    }

    pub async fn insert(&self, item: ScheduledItem) -> ScheduledItem {
        self.store.insert_item(item).await.unwrap()
    }

    pub async fn item(&self, id: ItemId) -> ScheduledItem {
        self.store.get_item(id).await.unwrap().unwrap()
    }

    pub async fn insert_thread(
        &self,
        thread: Thread,
        segments: &[&str],
    ) -> (Thread, Vec<ThreadSegment>) {
        self.store
            .insert_thread(thread, segments.iter().map(|s| NewSegment::from(*s)).collect())
            .await
            .unwrap()
    }

    pub async fn thread(&self, id: ThreadId) -> Thread {
        self.store.get_thread(id).await.unwrap().unwrap()
    }

    pub async fn segments(&self, id: ThreadId) -> Vec<ThreadSegment> {
        self.store.thread_segments(id).await.unwrap()
    }

    pub async fn log(&self, id: ItemId) -> Vec<SendLogEntry> {
        self.store.send_log(id, usize::MAX, 0).await.unwrap()
    }
}

/// In-memory store whose selected writes always fail.
pub struct FaultyStore {
    inner: MemoryStore,
    send_log: bool,
    save_item: bool,
    save_segment: bool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            send_log: false,
            save_item: false,
            save_segment: false,
        }
    }

    pub fn failing_send_log(mut self) -> Self {
        self.send_log = true;
        self
    }

    pub fn failing_item_saves(mut self) -> Self {
        self.save_item = true;
        self
    }

    pub fn failing_segment_saves(mut self) -> Self {
        self.save_segment = true;
        self
    }

    fn locked(table: &str) -> StoreError {
        StoreError::Backend(format!("{} table is locked", table))
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn insert_item(&self, item: ScheduledItem) -> Result<ScheduledItem, StoreError> {
        self.inner.insert_item(item).await
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<ScheduledItem>, StoreError> {
        self.inner.get_item(id).await
    }

    async fn save_item(&self, item: &ScheduledItem) -> Result<(), StoreError> {
        if self.save_item {
            return Err(Self::locked("scheduled_items"));
        }
        self.inner.save_item(item).await
    }

    async fn due_items(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledItem>, StoreError> {
        self.inner.due_items(now, limit).await
    }

    async fn mark_missed_pending(
        &self,
        cutoff: DateTime<Utc>,
        reason: PendingReason,
    ) -> Result<Vec<ItemId>, StoreError> {
        self.inner.mark_missed_pending(cutoff, reason).await
    }

    async fn pending_items(&self) -> Result<Vec<ScheduledItem>, StoreError> {
        self.inner.pending_items().await
    }

    async fn insert_thread(
        &self,
        thread: Thread,
        segments: Vec<NewSegment>,
    ) -> Result<(Thread, Vec<ThreadSegment>), StoreError> {
        self.inner.insert_thread(thread, segments).await
    }

    async fn get_thread(&self, id: ThreadId) -> Result<Option<Thread>, StoreError> {
        self.inner.get_thread(id).await
    }

    async fn save_thread(&self, thread: &Thread) -> Result<(), StoreError> {
        self.inner.save_thread(thread).await
    }

    async fn thread_segments(&self, id: ThreadId) -> Result<Vec<ThreadSegment>, StoreError> {
        self.inner.thread_segments(id).await
    }

    async fn save_segment(&self, segment: &ThreadSegment) -> Result<(), StoreError> {
        if self.save_segment {
            return Err(Self::locked("thread_segments"));
        }
        self.inner.save_segment(segment).await
    }

    async fn due_threads(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Thread>, StoreError> {
        self.inner.due_threads(now, limit).await
    }

    async fn append_send_log(&self, entry: NewSendLogEntry) -> Result<SendLogEntry, StoreError> {
        if self.send_log {
            return Err(Self::locked("send_log"));
        }
        self.inner.append_send_log(entry).await
    }

    async fn send_log(
        &self,
        item_id: ItemId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SendLogEntry>, StoreError> {
        self.inner.send_log(item_id, limit, offset).await
    }
}
