//! Background tasks for the yomiage server.
//!
//! Includes:
//! - Evicting idle codec workers.
//! - Probing the synthesis engine while it is marked down.
//! - Restoring live sessions that dropped at runtime.

use crate::AppState;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Starts the codec eviction task.
///
/// Runs indefinitely, destroying idle workers older than the idle timeout
/// while keeping the configured minimum warm.
pub async fn start_codec_eviction_task(state: Arc<AppState>, idle_timeout: Duration) {
    // Check twice per idle timeout, at most once a second.
    let interval = (idle_timeout / 2).max(Duration::from_secs(1));
    tracing::info!(
        interval_ms = interval.as_millis() as u64,
        "starting codec eviction task"
    );

    loop {
        sleep(interval).await;
        let evicted = state.runtime.codec.evict_idle().await;
        if evicted > 0 {
            let stats = state.runtime.codec.stats();
            tracing::debug!(
                evicted,
                idle = stats.idle,
                live = stats.live,
                "evicted idle codec workers"
            );
        }
    }
}

/// Starts the engine health probe task.
///
/// While the engine is marked down, probes it every `interval`. On recovery
/// the speaker catalog is refreshed.
pub async fn start_engine_probe_task(state: Arc<AppState>, interval: Duration) {
    if interval.is_zero() {
        tracing::warn!("engine probe task disabled (interval=0)");
        return;
    }
    tracing::info!(
        interval_ms = interval.as_millis() as u64,
        "starting engine probe task"
    );

    loop {
        sleep(interval).await;
        let runtime = &state.runtime;
        if runtime.client.is_healthy() {
            continue;
        }
        if runtime.client.probe().await {
            let source = runtime.catalog.refresh(&runtime.client).await;
            tracing::info!(?source, "speaker catalog refreshed after engine recovery");
        } else {
            tracing::debug!("synthesis engine still unavailable");
        }
    }
}

/// Starts the lost session restoration task.
pub async fn start_reconnect_task(state: Arc<AppState>, interval: Duration) {
    if interval.is_zero() {
        tracing::warn!("reconnect task disabled (interval=0)");
        return;
    }
    tracing::info!(
        interval_ms = interval.as_millis() as u64,
        "starting reconnect task"
    );

    loop {
        sleep(interval).await;
        let summary = state.runtime.connections.reconnect_lost().await;
        if summary.failed > 0 {
            tracing::warn!(
                total = summary.total,
                failed = summary.failed,
                "some lost live sessions could not be restored"
            );
        }
    }
}
