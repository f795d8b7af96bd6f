//! spec.md §8 scenario 1: single video, one vehicle detected across two
//! frames, a high-confidence plate read identically both times. Exercises
//! the whole dispatch graph end to end and pins down the `vehicles` row
//! the smoother's second observation must produce.

mod support;

use std::sync::Arc;
use std::time::Duration;

use dashcam_core::{RecordingSink, Sink, SinkTable};
use dashcam_engine::{start_engine, Detector, EngineConfig, FrameSource, Ocr};

use support::{FixedDetector, FixedFrameSource, FixedOcr};

#[tokio::test]
async fn full_pipeline_single_car_two_frames_yields_expected_sink_rows() {
    let source: Box<dyn FrameSource> = Box::new(FixedFrameSource::new("v", 2));
    let sink = Arc::new(RecordingSink::default());
    let detector: Arc<dyn Detector> = Arc::new(FixedDetector);
    let ocr: Arc<dyn Ocr> = Arc::new(FixedOcr);
    let sink_handle: Arc<dyn Sink> = sink.clone();

    let config = EngineConfig {
        sources: vec![source],
        num_video_readers: 1,
        num_gpu_workers: 1,
        num_cpu_workers: 1,
        queue_soft_limit: EngineConfig::DEFAULT_QUEUE_SOFT_LIMIT,
        queue_hard_limit: EngineConfig::DEFAULT_QUEUE_HARD_LIMIT,
        max_gpu_backlog: EngineConfig::DEFAULT_MAX_GPU_BACKLOG,
        max_cpu_backlog: EngineConfig::DEFAULT_MAX_CPU_BACKLOG,
        idle_poll: Duration::from_millis(2),
        monitor_interval: Duration::from_millis(10),
        drain_timeout: Duration::from_secs(5),
        detector,
        ocr,
        sink: sink_handle,
    };

    let handle = start_engine(config);
    tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("engine did not finish within timeout")
        .expect("engine finished with an error");

    let records = sink.records.lock().unwrap();

    let tracks: Vec<_> = records.iter().filter(|(t, _)| *t == SinkTable::Tracks).collect();
    let motion: Vec<_> = records.iter().filter(|(t, _)| *t == SinkTable::TrackMotion).collect();
    let vehicles: Vec<_> = records.iter().filter(|(t, _)| *t == SinkTable::Vehicles).collect();

    assert_eq!(tracks.len(), 1, "exactly one tracks row for the first-seen track");
    assert_eq!(motion.len(), 2, "one track_motion row per frame processed");
    assert_eq!(vehicles.len(), 1, "one vehicles row once the smoother sees two observations");

    assert_eq!(tracks[0].1["global_id"], "v:1");

    let vehicle_record = vehicles[0].1;
    assert_eq!(vehicle_record["final_plate"], "ABC123");
    assert_eq!(vehicle_record["video_id"], "v");
    assert!(
        !vehicle_record["ts"].is_null(),
        "ts must be backfilled by the FINAL_WRITE processor, never left null"
    );
}

#[tokio::test]
async fn empty_detection_yields_one_vehicle_track_and_no_plate_work() {
    use dashcam_engine::{NullDetector, NullOcr};

    let source: Box<dyn FrameSource> = Box::new(FixedFrameSource::new("v", 1));
    let sink = Arc::new(RecordingSink::default());
    let detector: Arc<dyn Detector> = Arc::new(NullDetector);
    let ocr: Arc<dyn Ocr> = Arc::new(NullOcr);
    let sink_handle: Arc<dyn Sink> = sink.clone();

    let config = EngineConfig {
        sources: vec![source],
        num_video_readers: 1,
        num_gpu_workers: 1,
        num_cpu_workers: 1,
        queue_soft_limit: EngineConfig::DEFAULT_QUEUE_SOFT_LIMIT,
        queue_hard_limit: EngineConfig::DEFAULT_QUEUE_HARD_LIMIT,
        max_gpu_backlog: EngineConfig::DEFAULT_MAX_GPU_BACKLOG,
        max_cpu_backlog: EngineConfig::DEFAULT_MAX_CPU_BACKLOG,
        idle_poll: Duration::from_millis(2),
        monitor_interval: Duration::from_millis(10),
        drain_timeout: Duration::from_secs(5),
        detector,
        ocr,
        sink: sink_handle,
    };

    let handle = start_engine(config);
    tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("engine did not finish within timeout")
        .expect("engine finished with an error");

    let records = sink.records.lock().unwrap();
    assert!(records.is_empty(), "an empty detection list writes nothing to the sink");

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.frames_in_store, 0, "the frame must be evicted once its last holder completes");
}
