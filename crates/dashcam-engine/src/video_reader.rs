//! Video reader: produces `VEHICLE_DETECT` tasks from a video source in
//! frame order, honoring lane backpressure.
//!
//! Video decoding itself is out of scope (§1) — `FrameSource` is the
//! pluggable boundary a caller implements over whatever decoder it likes.
//! The polling/backpressure/edge-triggered-logging shape is ported from
//! `original_source/pipeline/video_reader.py::VideoReader`.

use std::sync::Arc;
use std::time::Duration;

use dashcam_core::{Task, TaskCategory, TaskMeta};
use thiserror::Error;

use crate::api::PipelineEvent;
use crate::frame_store::FrameStore;
use crate::queue::CentralQueue;
use crate::shutdown::ShutdownCoordinator;

#[derive(Debug, Error)]
pub enum VideoReaderError {
    #[error("failed to open video source: {0}")]
    Open(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// One decoded frame plus whatever timing metadata the source could supply.
pub struct DecodedFrame {
    pub frame_idx: u64,
    pub bytes: Vec<u8>,
    pub video_ts_ms: Option<i64>,
}

/// Pluggable frame producer. An implementer owns the actual video decode;
/// the engine only needs frames in order.
pub trait FrameSource: Send {
    fn video_id(&self) -> &str;
    fn video_path(&self) -> &str;
    fn fps(&self) -> f64;

    /// Returns the next frame, or `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, VideoReaderError>;
}

pub(crate) struct VideoReaderConfig {
    pub max_gpu_backlog: usize,
    pub max_cpu_backlog: usize,
    pub poll_interval: Duration,
}

impl Default for VideoReaderConfig {
    fn default() -> Self {
        VideoReaderConfig {
            max_gpu_backlog: 8,
            max_cpu_backlog: 16,
            poll_interval: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct BlockState {
    gpu_blocked: bool,
    cpu_blocked: bool,
}

pub(crate) struct VideoReader {
    queue: Arc<CentralQueue>,
    frame_store: Arc<FrameStore>,
    config: VideoReaderConfig,
    shutdown: Arc<ShutdownCoordinator>,
    events: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl VideoReader {
    pub fn new(
        queue: Arc<CentralQueue>,
        frame_store: Arc<FrameStore>,
        config: VideoReaderConfig,
        shutdown: Arc<ShutdownCoordinator>,
        events: tokio::sync::broadcast::Sender<PipelineEvent>,
    ) -> Self {
        VideoReader {
            queue,
            frame_store,
            config,
            shutdown,
            events,
        }
    }

    fn block_state(&self) -> BlockState {
        BlockState {
            gpu_blocked: self.queue.total_gpu_backlog() >= self.config.max_gpu_backlog,
            cpu_blocked: self.queue.total_cpu_backlog() >= self.config.max_cpu_backlog,
        }
    }

    /// Drain one video source to completion (or until `stop` is requested).
    /// Returns the number of frames enqueued.
    pub async fn run(&self, mut source: Box<dyn FrameSource>) -> Result<u64, VideoReaderError> {
        let video_id = source.video_id().to_string();
        let video_path = source.video_path().to_string();
        let video_filename = std::path::Path::new(&video_path)
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| video_path.clone());
        let fps = source.fps();

        let mut last_state = BlockState::default();
        let mut enqueued = 0u64;

        loop {
            if self.shutdown.is_stop_requested() {
                break;
            }

            let state = self.block_state();
            if state != last_state && (state.gpu_blocked || state.cpu_blocked) {
                let _ = self.events.send(PipelineEvent::ReaderBlocked {
                    video_id: video_id.clone(),
                    gpu_blocked: state.gpu_blocked,
                    cpu_blocked: state.cpu_blocked,
                });
            } else if state != last_state && !state.gpu_blocked && !state.cpu_blocked {
                let _ = self.events.send(PipelineEvent::ReaderUnblocked {
                    video_id: video_id.clone(),
                });
            }
            last_state = state;

            if state.gpu_blocked || state.cpu_blocked {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            let frame = match source.next_frame()? {
                Some(frame) => frame,
                None => break,
            };

            let payload_ref = self
                .frame_store
                .save(&video_id, frame.frame_idx, frame.bytes);
            self.frame_store.add_refs(&[payload_ref.clone()]);

            let task = Task {
                category: TaskCategory::VehicleDetect,
                payload: dashcam_core::TaskPayload::None,
                priority: 0,
                video_id: video_id.clone(),
                frame_idx: frame.frame_idx,
                track_id: None,
                meta: TaskMeta {
                    payload_ref: Some(payload_ref.clone()),
                    dependencies: vec![payload_ref],
                    video_path: Some(video_path.clone()),
                    video_filename: Some(video_filename.clone()),
                    video_ts_frame: Some(frame.frame_idx),
                    video_ts_ms: frame.video_ts_ms,
                    fps: Some(fps),
                    ..Default::default()
                },
            };

            loop {
                if self.queue.push(task.clone()) {
                    break;
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
            enqueued += 1;
        }

        Ok(enqueued)
    }
}
