#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! In-process pipeline engine for the dashcam video-processing system: the
//! central queue, frame store, video reader, worker pool, dispatch graph,
//! monitor, and shutdown coordinator described in the core specification.
//! REST endpoints, SQL persistence, the WebUI, and ML model internals are
//! external collaborators reached only through the `Sink`, `Detector`/`Ocr`,
//! and `FrameSource` trait boundaries this crate exposes.

/// Public API surface: configuration, the running-engine handle, events and
/// status snapshots.
pub mod api;

mod dispatch;
mod engine;
mod frame_store;
mod monitor;
mod processor;
mod processors;
mod queue;
mod shutdown;
mod sink_http;
mod video_reader;
mod worker;

pub use api::{start_engine, EngineConfig, EngineHandle, PipelineEvent, StatusSnapshot, WorkerSnapshot};
pub use frame_store::{FrameStore, FrameStoreError};
pub use processor::{Detector, NullDetector, NullOcr, Ocr, Processor, ProcessorError, ProcessorRegistry};
pub use processors::{FinalWriteProcessor, PlateSmoothProcessor, VehicleTrackProcessor};
pub use queue::CentralQueue;
pub use shutdown::ShutdownCoordinator;
pub use sink_http::HttpSink;
pub use video_reader::{DecodedFrame, FrameSource, VideoReaderError};
