//! Heartbeat supervisor: periodic liveness writes plus a dead-man timer.
//!
//! The device silently stops notifying if it decides the host is gone, so
//! the supervisor writes a one-byte heartbeat every two seconds and, when no
//! liveness confirmation lands for two minutes, re-runs the notification
//! subscriptions instead of tearing the whole session down.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;

use crate::device::link::{CharKind, GattLink};
use crate::device::types::SessionMetrics;

/// Bias added to `last_received` when the supervisor starts, covering the
/// device's slow first notifications after the handshake.
pub const GRACE_BIAS_SECS: i64 = 20;

/// Delay before the first heartbeat tick.
pub const INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Interval between heartbeat ticks.
pub const TICK_INTERVAL: Duration = Duration::from_secs(2);

/// Silence longer than this counts as a missed heartbeat.
pub const DEAD_MAN_SECS: i64 = 120;

/// Liveness timestamp plus the running timer handle.
///
/// Created when authentication completes; the timestamp is only ever
/// mutated by the supervisor itself.
#[derive(Debug, Default)]
pub struct HeartbeatState {
    last_received: Arc<AtomicI64>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatState {
    /// Seconds-since-epoch liveness mark (test observability).
    pub fn last_received(&self) -> i64 {
        self.last_received.load(Ordering::Relaxed)
    }

    /// Whether the recurring timer is running.
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Stop the recurring timer and clear the liveness mark.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("heartbeat timer stopped");
        }
        self.last_received.store(0, Ordering::Relaxed);
    }
}

/// Decide whether the dead-man timer fired, advancing the liveness mark on
/// a miss so the same silence is not flagged twice.
///
/// Pure over `(last_received, now)`; the supervisor calls it with wall time
/// and tests call it with simulated clocks.
pub fn liveness_expired(last_received: &AtomicI64, now: i64) -> bool {
    let last = last_received.load(Ordering::Relaxed);
    if last < now - DEAD_MAN_SECS {
        last_received.store(now + DEAD_MAN_SECS, Ordering::Relaxed);
        true
    } else {
        false
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Start the supervisor over an authenticated link.
///
/// The returned state owns the timer; dropping or stopping it ends the
/// loop. `epoch` is the session generation the task belongs to -- ticks
/// observe it and self-cancel after a disconnect rather than writing into a
/// torn-down session.
pub fn start(
    link: Arc<dyn GattLink>,
    metrics: Arc<SessionMetrics>,
    epoch: Arc<AtomicU64>,
    task_epoch: u64,
) -> HeartbeatState {
    let last_received = Arc::new(AtomicI64::new(now_secs() + GRACE_BIAS_SECS));
    let last_for_task = last_received.clone();

    let task = tokio::spawn(async move {
        tokio::time::sleep(INITIAL_DELAY).await;

        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            ticker.tick().await;

            if epoch.load(Ordering::Relaxed) != task_epoch {
                tracing::debug!("heartbeat task outlived its session, exiting");
                return;
            }

            if liveness_expired(&last_for_task, now_secs()) {
                SessionMetrics::bump(&metrics.heartbeat_misses);
                tracing::warn!("no liveness confirmation for 120s, resubscribing");
                if let Err(e) = link.subscribe_notifications().await {
                    tracing::warn!(error = %e, "heartbeat recovery resubscribe failed");
                }
            }

            if let Err(e) = link.write(CharKind::Heartbeat, &[0x01], false).await {
                SessionMetrics::bump(&metrics.write_failures);
                tracing::warn!(error = %e, "heartbeat write failed");
            }
        }
    });

    tracing::info!("heartbeat supervisor started");
    HeartbeatState {
        last_received,
        task: Some(task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_holds_within_dead_man_window() {
        let last = AtomicI64::new(1_000);
        assert!(!liveness_expired(&last, 1_000 + DEAD_MAN_SECS));
        assert_eq!(last.load(Ordering::Relaxed), 1_000);
    }

    #[test]
    fn miss_fires_once_and_advances_the_mark() {
        let last = AtomicI64::new(1_000);
        let now = 1_000 + DEAD_MAN_SECS + 1;

        assert!(liveness_expired(&last, now));
        assert_eq!(last.load(Ordering::Relaxed), now + DEAD_MAN_SECS);

        // The same silence must not be flagged again on the next tick.
        assert!(!liveness_expired(&last, now + 2));
    }
}
