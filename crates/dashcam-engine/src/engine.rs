//! Engine orchestration: wires the queue, frame store, processor registry,
//! video readers, worker pool, and monitor into one running pipeline.
//!
//! Ported from `original_source/pipeline/scheduler.py`'s top-level run
//! loop; structured the way the teacher's own `engine.rs` wires a single
//! `EngineInner` plus an orchestration task (`run_engine`) spawned once from
//! `start_engine`.

use std::sync::Arc;

use dashcam_core::{Lane, TaskCategory};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;

use crate::api::{EngineConfig, EngineHandle, PipelineEvent, StatusSnapshot};
use crate::frame_store::FrameStore;
use crate::monitor::run_monitor;
use crate::processor::{
    OcrProcessor, PlateDetectProcessor, ProcessorRegistry, VehicleDetectProcessor,
};
use crate::processors::{FinalWriteProcessor, PlateSmoothProcessor, VehicleTrackProcessor};
use crate::queue::CentralQueue;
use crate::shutdown::ShutdownCoordinator;
use crate::video_reader::{FrameSource, VideoReader, VideoReaderConfig};
use crate::worker::{run_worker, WorkerConfig, WorkerStatusTable};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub(crate) struct EngineInner {
    pub(crate) events: broadcast::Sender<PipelineEvent>,
    pub(crate) snapshot_rx: watch::Receiver<StatusSnapshot>,
    pub(crate) shutdown: Arc<ShutdownCoordinator>,
}

pub(crate) fn start_engine(config: EngineConfig) -> EngineHandle {
    let (events_tx, _events_rx0) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let shutdown = Arc::new(ShutdownCoordinator::new());

    let queue = Arc::new(CentralQueue::new(
        config.queue_soft_limit,
        config.queue_hard_limit,
    ));
    let frame_store = Arc::new(FrameStore::new());
    let status_table = Arc::new(WorkerStatusTable::new());

    let initial_snapshot = StatusSnapshot {
        stop_requested: false,
        terminate_requested: false,
        queue_backlog: queue.snapshot(),
        backed_up_categories: Vec::new(),
        workers: Vec::new(),
        frames_in_store: 0,
    };
    let (snapshot_tx, snapshot_rx) = watch::channel(initial_snapshot);

    let inner = Arc::new(EngineInner {
        events: events_tx.clone(),
        snapshot_rx,
        shutdown: shutdown.clone(),
    });

    let join = tokio::spawn(run_engine(
        config,
        queue,
        frame_store,
        status_table,
        shutdown,
        events_tx,
        snapshot_tx,
    ));

    EngineHandle {
        inner,
        join: Arc::new(tokio::sync::Mutex::new(Some(join))),
    }
}

fn build_registry(config: &EngineConfig) -> Arc<ProcessorRegistry> {
    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::new(VehicleDetectProcessor::new(config.detector.clone())));
    registry.register(Arc::new(PlateDetectProcessor::new(config.detector.clone())));
    registry.register(Arc::new(OcrProcessor::new(config.ocr.clone())));
    registry.register(Arc::new(VehicleTrackProcessor::new()));
    registry.register(Arc::new(PlateSmoothProcessor::new()));
    registry.register(Arc::new(FinalWriteProcessor::new(config.sink.clone())));
    Arc::new(registry)
}

async fn run_engine(
    config: EngineConfig,
    queue: Arc<CentralQueue>,
    frame_store: Arc<FrameStore>,
    status_table: Arc<WorkerStatusTable>,
    shutdown: Arc<ShutdownCoordinator>,
    events: broadcast::Sender<PipelineEvent>,
    snapshot_tx: watch::Sender<StatusSnapshot>,
) -> anyhow::Result<()> {
    let _ = events.send(PipelineEvent::Started);

    let registry = build_registry(&config);

    let mut workers = JoinSet::new();
    for worker_id in 0..config.num_gpu_workers {
        workers.spawn(run_worker(
            worker_id,
            Lane::Gpu,
            &TaskCategory::GPU,
            queue.clone(),
            frame_store.clone(),
            registry.clone(),
            status_table.clone(),
            shutdown.clone(),
            events.clone(),
            WorkerConfig {
                idle_poll: config.idle_poll,
            },
        ));
    }
    for i in 0..config.num_cpu_workers {
        let worker_id = config.num_gpu_workers + i;
        workers.spawn(run_worker(
            worker_id,
            Lane::Cpu,
            &TaskCategory::CPU,
            queue.clone(),
            frame_store.clone(),
            registry.clone(),
            status_table.clone(),
            shutdown.clone(),
            events.clone(),
            WorkerConfig {
                idle_poll: config.idle_poll,
            },
        ));
    }

    let num_readers = config.num_video_readers.max(1);
    let mut buckets: Vec<Vec<Box<dyn FrameSource>>> =
        (0..num_readers).map(|_| Vec::new()).collect();
    for (i, source) in config.sources.into_iter().enumerate() {
        buckets[i % num_readers].push(source);
    }

    let mut readers = JoinSet::new();
    for bucket in buckets {
        if bucket.is_empty() {
            continue;
        }
        let reader = VideoReader::new(
            queue.clone(),
            frame_store.clone(),
            VideoReaderConfig {
                max_gpu_backlog: config.max_gpu_backlog,
                max_cpu_backlog: config.max_cpu_backlog,
                poll_interval: config.idle_poll,
            },
            shutdown.clone(),
            events.clone(),
        );
        readers.spawn(run_reader_bucket(reader, bucket, events.clone()));
    }

    let monitor_handle = tokio::spawn(run_monitor(
        queue.clone(),
        frame_store.clone(),
        status_table.clone(),
        shutdown.clone(),
        snapshot_tx,
        config.monitor_interval,
    ));

    // Phase 1: every reader either drains its assigned sources or is cut
    // short by an externally-requested stop (§4.8).
    while let Some(res) = readers.join_next().await {
        if let Err(join_err) = res {
            let _ = events.send(PipelineEvent::Error {
                message: format!("video reader task panicked: {join_err}"),
            });
        }
    }

    // All readers are done producing. Drain the backlog and let in-flight
    // tasks finish dispatching their descendants before escalating to
    // terminate, unless the caller already forced a hard stop. A task
    // between pop and release_refs can still enqueue new work the backlog
    // count alone wouldn't show (§4.8), so both must be zero; a bounded
    // timeout forces terminate regardless so a stuck worker can't wedge
    // shutdown forever.
    let drain_deadline = tokio::time::Instant::now() + config.drain_timeout;
    while !shutdown.is_terminate_requested()
        && (queue.total_backlog() > 0 || status_table.active_count() > 0)
        && tokio::time::Instant::now() < drain_deadline
    {
        tokio::time::sleep(config.idle_poll).await;
    }
    shutdown.request_terminate();
    let _ = events.send(PipelineEvent::TerminateRequested);

    while let Some(res) = workers.join_next().await {
        if let Err(join_err) = res {
            let _ = events.send(PipelineEvent::Error {
                message: format!("worker task panicked: {join_err}"),
            });
        }
    }

    let _ = monitor_handle.await;
    queue.shutdown();

    let _ = events.send(PipelineEvent::Stopped);
    Ok(())
}

async fn run_reader_bucket(
    reader: VideoReader,
    sources: Vec<Box<dyn FrameSource>>,
    events: broadcast::Sender<PipelineEvent>,
) {
    for source in sources {
        let video_id = source.video_id().to_string();
        match reader.run(source).await {
            Ok(frames_enqueued) => {
                let _ = events.send(PipelineEvent::ReaderFinished {
                    video_id,
                    frames_enqueued,
                });
            }
            Err(err) => {
                let _ = events.send(PipelineEvent::Error {
                    message: format!("video reader error on {video_id}: {err}"),
                });
            }
        }
    }
}
