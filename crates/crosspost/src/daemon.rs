//! Daemon command: reconcile once, then tick until interrupted.

use miette::Result;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crosspost_scheduler::{Scheduler, StateChange};

/// Run the scheduler loop until Ctrl-C.
pub async fn run(scheduler: Scheduler, events: broadcast::Receiver<StateChange>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let logger = tokio::spawn(log_state_changes(events));

    scheduler.run(shutdown_rx).await;

    logger.abort();
    info!("daemon stopped");
    Ok(())
}

async fn log_state_changes(mut events: broadcast::Receiver<StateChange>) {
    loop {
        match events.recv().await {
            Ok(StateChange::Item { id, status }) => {
                debug!(item_id = id, %status, "item state changed");
            }
            Ok(StateChange::Thread { id, status }) => {
                debug!(thread_id = id, %status, "thread state changed");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "state-change log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
