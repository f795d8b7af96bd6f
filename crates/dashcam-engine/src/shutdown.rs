//! Two-phase shutdown coordinator (§4.8): `stop` lets in-flight work drain
//! naturally (readers stop producing, workers finish their current task and
//! then idle), `terminate` is the hard stop that workers also observe.
//!
//! Ported from the `stop`/`terminate` `threading.Event` pair in
//! `original_source/pipeline/scheduler.py`; the shape mirrors the teacher's
//! own `ShutdownController` (`crates/client/src/shutdown.rs`), generalized
//! from a single forced/graceful flag to the pipeline's two named phases.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Shared stop/terminate signal. Cheap to clone via `Arc`; every reader and
/// worker holds one.
#[derive(Default)]
pub struct ShutdownCoordinator {
    stop_requested: AtomicBool,
    terminate_requested: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase 1: readers stop enqueuing new frames; workers keep draining
    /// the backlog.
    pub fn request_stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Phase 2: workers finish whatever task they're mid-processing, then
    /// exit without picking up anything new.
    pub fn request_terminate(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        if !self.terminate_requested.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn is_terminate_requested(&self) -> bool {
        self.terminate_requested.load(Ordering::SeqCst)
    }

    /// Resolves once either phase has been requested. Useful for a
    /// `tokio::select!` arm that needs to wake promptly rather than poll.
    pub async fn notified(&self) {
        if self.is_stop_requested() {
            return;
        }
        self.notify.notified().await;
    }
}
