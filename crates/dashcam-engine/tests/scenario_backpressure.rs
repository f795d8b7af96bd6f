//! spec.md §8 scenario 3: a low `hard_limit` forces the video reader to hit
//! at least one push refusal while enqueuing a handful of frames; it must
//! retry until accepted rather than drop work, and the queue must drain to
//! zero once everything has been processed.

mod support;

use std::sync::Arc;
use std::time::Duration;

use dashcam_core::{NoopSink, Sink, TaskCategory};
use dashcam_engine::{
    start_engine, Detector, EngineConfig, FrameSource, NullDetector, NullOcr, Ocr, PipelineEvent,
};
use tokio::sync::broadcast::error::RecvError;

use support::FixedFrameSource;

#[tokio::test]
async fn reader_retries_past_hard_limit_and_drains_to_zero() {
    const FRAME_COUNT: u64 = 5;

    let source: Box<dyn FrameSource> = Box::new(FixedFrameSource::new("v", FRAME_COUNT));
    let detector: Arc<dyn Detector> = Arc::new(NullDetector);
    let ocr: Arc<dyn Ocr> = Arc::new(NullOcr);
    let sink: Arc<dyn Sink> = Arc::new(NoopSink);

    let config = EngineConfig {
        sources: vec![source],
        num_video_readers: 1,
        num_gpu_workers: 1,
        num_cpu_workers: 1,
        // Smaller than the frame count: the reader must see `push` refused
        // on VEHICLE_DETECT at least once and retry (§4.1, §4.3).
        queue_soft_limit: 2,
        queue_hard_limit: 2,
        max_gpu_backlog: 64,
        max_cpu_backlog: 64,
        idle_poll: Duration::from_millis(2),
        monitor_interval: Duration::from_millis(10),
        drain_timeout: Duration::from_secs(5),
        detector,
        ocr,
        sink,
    };

    let handle = start_engine(config);
    let mut events = handle.subscribe();

    let mut vehicle_detect_finished = 0u64;
    let mut reader_finished = 0u64;

    let watch = async {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::TaskFinished { category }) if category == TaskCategory::VehicleDetect => {
                    vehicle_detect_finished += 1;
                }
                Ok(PipelineEvent::ReaderFinished { frames_enqueued, .. }) => {
                    reader_finished += 1;
                    assert_eq!(frames_enqueued, FRAME_COUNT);
                }
                Ok(PipelineEvent::Stopped) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), watch)
        .await
        .expect("engine did not reach Stopped within timeout");

    handle.wait().await.expect("engine finished with an error");

    assert_eq!(reader_finished, 1, "the single reader must finish its one source");
    assert_eq!(
        vehicle_detect_finished, FRAME_COUNT,
        "every frame enqueued despite hard-limit refusals must still get processed"
    );

    let snapshot = handle.snapshot();
    let total_backlog: usize = snapshot.queue_backlog.values().sum();
    assert_eq!(total_backlog, 0, "backlog must be fully drained after a clean run");
}
