use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use nourish_core::queue::OfflineQueue;

/// Run the periodic drain loop in the foreground until Ctrl-C.
pub(crate) async fn cmd_sync(queue: &Arc<OfflineQueue>, interval: Duration) -> Result<()> {
    eprintln!(
        "Syncing every {}s ({} pending). Press Ctrl-C to stop.",
        interval.as_secs(),
        queue.len()
    );
    let handle = queue.spawn_drain_loop(interval);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    handle.abort();

    tracing::info!(pending = queue.len(), "sync loop stopped");
    eprintln!("Stopped with {} operation(s) pending.", queue.len());
    Ok(())
}
