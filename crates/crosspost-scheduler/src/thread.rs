//! Thread dispatcher.
//!
//! Publishes the segments of a thread in ascending sequence to every target
//! platform, chaining each segment as a reply to the previous one. Platforms are
//! independent: a failure stops only the failing platform's remaining segments.
//! Threads are never retried automatically.

use std::panic::AssertUnwindSafe;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use crate::SchedulerError;
use crate::context::DispatchContext;
use crate::platform::{AdapterError, PostPayload, ReplyTo};
use crate::post::DispatchMode;
use crate::types::{
    DeliveryStatus, PlatformId, RemoteRef, SegmentResult, Thread, ThreadId, ThreadPlatformResult,
    ThreadSegment, ThreadStatus,
};

const NO_SEGMENTS: &str = "thread has no segments";
const GENERIC_FAILURE: &str = "thread delivery failed";

/// Reply chain of one platform.
#[derive(Debug, Clone)]
struct ChainState {
    root: RemoteRef,
    parent: RemoteRef,
}

impl ChainState {
    fn advance(chain: Option<Self>, posted: RemoteRef) -> Self {
        match chain {
            None => Self {
                root: posted.clone(),
                parent: posted,
            },
            Some(chain) => Self {
                root: chain.root,
                parent: posted,
            },
        }
    }

    fn reply_to(&self) -> ReplyTo {
        ReplyTo {
            root: self.root.clone(),
            parent: self.parent.clone(),
        }
    }
}

/// Successful deliveries of each segment, indexed like the segment list.
type SegmentSuccesses = Vec<Vec<(PlatformId, SegmentResult)>>;

/// Delivers threads.
#[derive(Clone)]
pub struct ThreadDispatcher {
    ctx: DispatchContext,
}

impl ThreadDispatcher {
    pub fn new(ctx: DispatchContext) -> Self {
        Self { ctx }
    }

    /// Dispatch one thread.
    ///
    /// Returns `Ok(None)` when the thread vanished or (in [`DispatchMode::Due`])
    /// is no longer due.
    #[tracing::instrument(skip(self), fields(thread_id = id))]
    pub async fn dispatch(
        &self,
        id: ThreadId,
        mode: DispatchMode,
        now: DateTime<Utc>,
    ) -> Result<Option<Thread>, SchedulerError> {
        let Some(mut thread) = self.ctx.store.get_thread(id).await? else {
            debug!("thread vanished before dispatch");
            return Ok(None);
        };

        if mode == DispatchMode::Due && !thread.is_due(now) {
            debug!(status = %thread.status, "thread no longer due");
            return Ok(None);
        }

        let mut segments = self.ctx.store.thread_segments(id).await?;
        if segments.is_empty() {
            warn!("thread has no segments");
            thread.status = ThreadStatus::Failed;
            thread.metadata.last_error = Some(NO_SEGMENTS.to_string());
            thread.metadata.last_dispatch_at = Some(now);
            self.finish(&thread).await?;
            return Ok(Some(thread));
        }

        thread.status = ThreadStatus::Publishing;
        self.ctx.store.save_thread(&thread).await?;
        self.ctx.notifier.thread(thread.id, thread.status);

        if let Err(e) = self.publish(&mut thread, &mut segments, now).await {
            error!(error = %e, "thread dispatch aborted after publishing started");
            thread.status = ThreadStatus::Failed;
            thread.scheduled_at = None;
            thread.metadata.last_dispatch_at = Some(now);
            thread.metadata.last_error = Some(e.to_string());
            if let Err(save) = self.finish(&thread).await {
                error!(error = %save, "failed to mark thread as failed");
            }
            return Err(e);
        }

        info!(
            status = %thread.status,
            segments = segments.len(),
            "dispatched thread"
        );
        Ok(Some(thread))
    }

    /// Deliver every platform's chain and persist the outcome.
    async fn publish(
        &self,
        thread: &mut Thread,
        segments: &mut [ThreadSegment],
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let mut successes: SegmentSuccesses = vec![Vec::new(); segments.len()];
        let mut first_error = None;

        let targets = thread.target_platforms.clone();
        for platform in targets.iter() {
            let result = if self.ctx.config.discard_mode {
                simulate_chain(thread.id, segments, platform, now, &mut successes)
            } else {
                self.publish_chain(segments, platform, now, &mut successes)
                    .await
            };
            if result.status != DeliveryStatus::Sent && first_error.is_none() {
                first_error = result.error.clone();
            }
            thread.metadata.platform_results.insert(platform, result);
        }

        for (segment, delivered) in segments.iter_mut().zip(&successes) {
            let Some((platform, result)) = PlatformId::pick_preferred(delivered) else {
                continue;
            };
            segment.remote_id = result.remote.canonical_id().map(str::to_string);
            segment.posted_at = result.posted_at;
            debug!(sequence = segment.sequence, %platform, "segment canonical id selected");
            self.ctx.store.save_segment(segment).await?;
        }

        let all_sent = thread
            .target_platforms
            .iter()
            .all(|p| {
                thread
                    .metadata
                    .platform_results
                    .get(&p)
                    .is_some_and(|r| r.status == DeliveryStatus::Sent)
            });

        thread.scheduled_at = None;
        thread.metadata.last_dispatch_at = Some(now);
        if all_sent {
            thread.status = ThreadStatus::Published;
            thread.metadata.last_success_at = Some(now);
            thread.metadata.last_error = None;
        } else {
            thread.status = ThreadStatus::Failed;
            thread.metadata.last_error = Some(
                first_error
                    .or_else(|| thread.metadata.last_error.take())
                    .unwrap_or_else(|| GENERIC_FAILURE.to_string()),
            );
        }

        self.finish(thread).await
    }

    async fn finish(&self, thread: &Thread) -> Result<(), SchedulerError> {
        self.ctx.store.save_thread(thread).await?;
        self.ctx.notifier.thread(thread.id, thread.status);
        Ok(())
    }

    /// Publish every segment to one platform, stopping at its first failure.
    async fn publish_chain(
        &self,
        segments: &[ThreadSegment],
        platform: PlatformId,
        now: DateTime<Utc>,
        successes: &mut SegmentSuccesses,
    ) -> ThreadPlatformResult {
        let adapter = match self.ctx.platforms.ready(platform) {
            Ok(adapter) => adapter,
            Err(e) => {
                error!(%platform, error = %e, "platform not configured");
                return ThreadPlatformResult {
                    status: DeliveryStatus::Failed,
                    segments: Vec::new(),
                    error: Some(e.to_string()),
                    completed_at: Some(now),
                };
            }
        };

        let mut chain: Option<ChainState> = None;
        let mut results = Vec::with_capacity(segments.len());

        for (index, segment) in segments.iter().enumerate() {
            let mut payload = PostPayload::new(segment.content.clone()).with_media(&segment.media);
            if let Some(chain) = &chain {
                payload = payload.replying_to(chain.reply_to());
            }

            let outcome = AssertUnwindSafe(adapter.send(&payload))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(AdapterError::delivery("adapter panicked", 1)));

            match outcome {
                Ok(delivery) => {
                    debug!(
                        %platform,
                        sequence = segment.sequence,
                        uri = ?delivery.remote.uri,
                        "segment delivered"
                    );
                    let result = SegmentResult {
                        sequence: segment.sequence,
                        status: DeliveryStatus::Sent,
                        remote: delivery.remote.clone(),
                        posted_at: Some(delivery.posted_at),
                        failed_at: None,
                        error: None,
                        simulated: false,
                    };
                    chain = Some(ChainState::advance(chain, delivery.remote));
                    successes[index].push((platform, result.clone()));
                    results.push(result);
                }
                Err(e) => {
                    warn!(
                        %platform,
                        sequence = segment.sequence,
                        error = %e,
                        "segment delivery failed, halting platform"
                    );
                    results.push(SegmentResult {
                        sequence: segment.sequence,
                        status: DeliveryStatus::Failed,
                        remote: RemoteRef::default(),
                        posted_at: None,
                        failed_at: Some(now),
                        error: Some(e.to_string()),
                        simulated: false,
                    });
                    return ThreadPlatformResult {
                        status: DeliveryStatus::Failed,
                        segments: results,
                        error: Some(format!("segment {}: {}", segment.sequence, e)),
                        completed_at: Some(now),
                    };
                }
            }
        }

        ThreadPlatformResult {
            status: DeliveryStatus::Sent,
            segments: results,
            error: None,
            completed_at: Some(now),
        }
    }
}

/// Success-shaped results for discard mode.
fn simulate_chain(
    thread_id: ThreadId,
    segments: &[ThreadSegment],
    platform: PlatformId,
    now: DateTime<Utc>,
    successes: &mut SegmentSuccesses,
) -> ThreadPlatformResult {
    let results: Vec<_> = segments
        .iter()
        .map(|segment| SegmentResult {
            sequence: segment.sequence,
            status: DeliveryStatus::Sent,
            remote: RemoteRef {
                uri: Some(format!(
                    "demo://thread/{}/seg/{}",
                    thread_id, segment.sequence
                )),
                ..RemoteRef::default()
            },
            posted_at: Some(now),
            failed_at: None,
            error: None,
            simulated: true,
        })
        .collect();

    for (index, result) in results.iter().enumerate() {
        successes[index].push((platform, result.clone()));
    }
    info!(thread_id, %platform, "discard mode: marked thread as delivered");

    ThreadPlatformResult {
        status: DeliveryStatus::Sent,
        segments: results,
        error: None,
        completed_at: Some(now),
    }
}
