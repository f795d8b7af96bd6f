//! Public API types for the in-process dashcam pipeline engine.

use std::sync::Arc;
use std::time::Duration;

use dashcam_core::{Sink, TaskCategory};
use serde::{Deserialize, Serialize};

use crate::processor::{Detector, Ocr};
use crate::video_reader::FrameSource;

/// Configuration for the in-process engine (§2, §4 ambient stack).
pub struct EngineConfig {
    /// One `FrameSource` per video to process. Consumed by the reader pool
    /// at startup; readers round-robin over this list (§4.2).
    pub sources: Vec<Box<dyn FrameSource>>,

    /// Number of concurrent video readers.
    pub num_video_readers: usize,
    /// Number of GPU-lane workers.
    pub num_gpu_workers: usize,
    /// Number of CPU-lane workers.
    pub num_cpu_workers: usize,

    /// Per-category soft limit (backpressure engages here).
    pub queue_soft_limit: usize,
    /// Per-category hard limit (pushes are refused above this).
    pub queue_hard_limit: usize,
    /// Reader-side lane backlog ceilings (§4.2).
    pub max_gpu_backlog: usize,
    pub max_cpu_backlog: usize,

    /// How often idle workers and blocked readers poll for new work.
    pub idle_poll: Duration,
    /// How often the monitor emits a status snapshot.
    pub monitor_interval: Duration,
    /// Bounded wait for backlog and worker activity to reach zero after all
    /// readers finish, before escalating to terminate regardless (§4.8).
    pub drain_timeout: Duration,

    /// Vehicle/plate detector backing `VEHICLE_DETECT` and `PLATE_DETECT`.
    pub detector: Arc<dyn Detector>,
    /// OCR backend for `OCR`.
    pub ocr: Arc<dyn Ocr>,
    /// Destination for finalized records.
    pub sink: Arc<dyn Sink>,
}

impl EngineConfig {
    pub const DEFAULT_QUEUE_SOFT_LIMIT: usize = 64;
    pub const DEFAULT_QUEUE_HARD_LIMIT: usize = 128;
    pub const DEFAULT_MAX_GPU_BACKLOG: usize = 8;
    pub const DEFAULT_MAX_CPU_BACKLOG: usize = 16;
    pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(20);
    pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(2);
    pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Per-worker snapshot for the monitor/status surface (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub worker_id: usize,
    pub lane: dashcam_core::Lane,
    pub category: Option<TaskCategory>,
    pub idle_ms: u128,
}

/// Current engine state snapshot, refreshed by the monitor task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub stop_requested: bool,
    pub terminate_requested: bool,
    pub queue_backlog: std::collections::HashMap<TaskCategory, usize>,
    pub backed_up_categories: Vec<TaskCategory>,
    pub workers: Vec<WorkerSnapshot>,
    pub frames_in_store: usize,
}

/// Pipeline event stream payload (§4.9 ambient logging — there is no
/// external logging crate in this stack; a broadcast channel of typed
/// events is the engine's own observability surface, the way the teacher
/// exposes engine state via `EngineEvent`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    Started,
    StopRequested,
    TerminateRequested,
    ReaderBlocked {
        video_id: String,
        gpu_blocked: bool,
        cpu_blocked: bool,
    },
    ReaderUnblocked {
        video_id: String,
    },
    ReaderFinished {
        video_id: String,
        frames_enqueued: u64,
    },
    WorkerCategoryChanged {
        worker_id: usize,
        lane: dashcam_core::Lane,
        category: Option<TaskCategory>,
    },
    TaskFinished {
        category: TaskCategory,
    },
    Warning {
        message: String,
    },
    Error {
        message: String,
    },
    Stopped,
}

/// Handle to a running in-process engine instance. Cheaply cloneable: every
/// clone shares the same event stream, snapshot, and shutdown controls, but
/// only the first caller to `wait()` actually awaits the engine task — later
/// callers observe `Ok(())` immediately, since the task has already finished
/// by the time they'd join it.
#[derive(Clone)]
pub struct EngineHandle {
    pub(crate) inner: Arc<crate::engine::EngineInner>,
    pub(crate) join: Arc<tokio::sync::Mutex<Option<tokio::task::JoinHandle<anyhow::Result<()>>>>>,
}

/// Start a new in-process engine instance.
pub fn start_engine(config: EngineConfig) -> EngineHandle {
    crate::engine::start_engine(config)
}

impl EngineHandle {
    /// Subscribe to the pipeline event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    /// Get the latest engine snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.snapshot_rx.borrow().clone()
    }

    /// Phase 1 shutdown: readers stop producing, workers drain the backlog.
    pub fn request_stop(&self) {
        self.inner.shutdown.request_stop();
        let _ = self.inner.events.send(PipelineEvent::StopRequested);
    }

    /// Phase 2 shutdown: workers finish their current task and exit without
    /// picking up anything new, regardless of remaining backlog.
    pub fn request_terminate(&self) {
        self.inner.shutdown.request_terminate();
        let _ = self.inner.events.send(PipelineEvent::TerminateRequested);
    }

    /// Wait for the engine to stop, returning the engine task's result. Only
    /// the first caller across all clones of this handle actually awaits the
    /// underlying task; later callers get `Ok(())` once it has finished.
    pub async fn wait(&self) -> anyhow::Result<()> {
        let handle = self.join.lock().await.take();
        match handle {
            Some(join) => match join.await {
                Ok(res) => res,
                Err(err) => Err(anyhow::anyhow!("engine task join error: {err}")),
            },
            None => Ok(()),
        }
    }
}
