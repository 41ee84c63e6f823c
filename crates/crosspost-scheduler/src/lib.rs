//! Scheduling and dispatch engine for crosspost.
//!
//! This crate provides the engine that:
//! - Finds due posts and threads on a periodic tick
//! - Delivers them to every target platform with a bounded worker pool
//! - Retries failed posts with exponential backoff
//! - Recomputes recurring schedules with jitter-free anchors
//! - Chains thread segments as replies on each platform
//! - Attaches up to four images with alt text to each post
//! - Logs every delivery attempt with per-item attempt numbers
//! - Parks posts missed during downtime for manual review

pub mod batch;
pub mod config;
mod context;
mod error;
pub mod notify;
pub mod platform;
pub mod post;
pub mod recurrence;
pub mod reconcile;
pub mod retry;
mod scheduler;
pub mod send_log;
pub mod store;
pub mod thread;
pub mod types;

pub use batch::{BatchReport, run_batch};
pub use config::SchedulerConfig;
pub use context::DispatchContext;
pub use error::{SchedulerError, StoreError};
pub use notify::{EventNotifier, StateChange};
pub use platform::{
    AdapterError, Delivery, PlatformAdapter, PlatformRegistry, PostPayload, ReplyTo,
};
pub use post::{DispatchMode, PostDispatcher, RetractOutcome, RetractReport};
pub use recurrence::RecurrenceRule;
pub use reconcile::Reconciler;
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, TickReport};
pub use send_log::SendLogRecorder;
pub use store::{MemoryStore, Store};
pub use thread::ThreadDispatcher;
pub use types::{
    DeliveryResult, DeliveryStatus, ItemId, ItemStatus, MAX_MEDIA, MediaRef, NewSegment,
    NewSendLogEntry, PendingReason, PlatformId, PlatformState, RemoteRef, Repeat, RetryState,
    ScheduledItem, SegmentId, SegmentResult, SendEvent, SendLogEntry, SendLogStatus,
    TargetPlatforms, Thread, ThreadId, ThreadMetadata, ThreadPlatformResult, ThreadSegment,
    ThreadStatus,
};
