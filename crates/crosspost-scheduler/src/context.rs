//! Collaborators shared by the dispatchers.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::notify::EventNotifier;
use crate::platform::PlatformRegistry;
use crate::send_log::SendLogRecorder;
use crate::store::Store;

/// Handles every dispatcher needs. Cheap to clone.
#[derive(Clone)]
pub struct DispatchContext {
    pub store: Arc<dyn Store>,
    pub platforms: PlatformRegistry,
    pub config: Arc<SchedulerConfig>,
    pub notifier: EventNotifier,
    pub send_log: SendLogRecorder,
}

impl DispatchContext {
    pub fn new(
        store: Arc<dyn Store>,
        platforms: PlatformRegistry,
        config: SchedulerConfig,
        notifier: EventNotifier,
    ) -> Self {
        Self {
            send_log: SendLogRecorder::new(Arc::clone(&store)),
            store,
            platforms,
            config: Arc::new(config),
            notifier,
        }
    }
}
