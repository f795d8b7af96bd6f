//! Periodic human-readable status reporting (§4.3).
//!
//! Grounded on `original_source/pipeline/scheduler.py`'s status-line loop,
//! which samples queue depths and worker state on an interval and prints a
//! summary. There is no external logging crate in this stack (§4.9), so the
//! monitor both updates the `watch` snapshot callers poll via
//! `EngineHandle::snapshot()` and writes a line to stderr, the same way
//! `dashcam_core::NoopSink` reports its own activity.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::api::{StatusSnapshot, WorkerSnapshot};
use crate::frame_store::FrameStore;
use crate::queue::CentralQueue;
use crate::shutdown::ShutdownCoordinator;
use crate::worker::WorkerStatusTable;

pub(crate) async fn run_monitor(
    queue: Arc<CentralQueue>,
    frame_store: Arc<FrameStore>,
    status_table: Arc<WorkerStatusTable>,
    shutdown: Arc<ShutdownCoordinator>,
    snapshot_tx: watch::Sender<StatusSnapshot>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let snapshot = build_snapshot(&queue, &frame_store, &status_table, &shutdown);
        log_snapshot(&snapshot);
        if snapshot_tx.send(snapshot).is_err() {
            // No receivers left (engine handle dropped); nothing more to do.
            break;
        }

        if shutdown.is_terminate_requested()
            && queue.total_backlog() == 0
            && status_table.active_count() == 0
        {
            break;
        }
    }
}

fn build_snapshot(
    queue: &CentralQueue,
    frame_store: &FrameStore,
    status_table: &WorkerStatusTable,
    shutdown: &ShutdownCoordinator,
) -> StatusSnapshot {
    let workers = status_table
        .snapshot()
        .into_iter()
        .map(|(worker_id, entry)| WorkerSnapshot {
            worker_id,
            lane: entry.lane,
            category: entry.category,
            idle_ms: entry.last_heartbeat.elapsed().as_millis(),
        })
        .collect();

    StatusSnapshot {
        stop_requested: shutdown.is_stop_requested(),
        terminate_requested: shutdown.is_terminate_requested(),
        queue_backlog: queue.snapshot(),
        backed_up_categories: queue.backed_up_categories(),
        workers,
        frames_in_store: frame_store.len(),
    }
}

fn log_snapshot(snapshot: &StatusSnapshot) {
    let total: usize = snapshot.queue_backlog.values().sum();
    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    eprintln!(
        "[monitor {now}] backlog={total} frames_in_store={} workers={} backed_up={:?}",
        snapshot.frames_in_store,
        snapshot.workers.len(),
        snapshot.backed_up_categories,
    );
}
