//! Per-shard periodic tick.
//!
//! Each shard owns at most one timer task: replication, then lifecycle,
//! then rearm. A read-only shard absorbs the timer (it never rearms). A
//! tick that overruns the interval queues the next one relative to its own
//! completion.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::Shard;

/// Delay before the first tick after the first `configure`.
pub const FIRST_TICK_DELAY_MS: u64 = 5_000;

/// Arm the shard's scheduler if no timer exists yet.
pub(crate) fn arm(shard: Arc<Shard>, initial_interval_ms: u64) {
    if shard.scheduler_armed().swap(true, Ordering::SeqCst) {
        return;
    }
    tokio::spawn(async move {
        tracing::debug!(shard = %shard.name(), interval_ms = initial_interval_ms, "scheduler armed");
        tokio::time::sleep(Duration::from_millis(FIRST_TICK_DELAY_MS)).await;
        loop {
            match shard.tick().await {
                Some(interval_ms) => {
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                }
                None => break,
            }
        }
        tracing::debug!(shard = %shard.name(), "scheduler stopped");
    });
}
