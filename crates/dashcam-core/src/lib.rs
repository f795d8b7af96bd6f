//! Shared vocabulary for the dashcam pipeline engine: task/category/lane
//! types and the sink contract. No async runtime dependency — this crate is
//! the stable interface the engine and the CLI both build on.

pub mod sink;
pub mod task;

pub use sink::{BoxFuture, NoopSink, RecordingSink, Sink, SinkError, SinkTable};
pub use task::{
    BBox, Detection, FinalAck, Lane, OcrOutput, PayloadRef, PlateBox, SmoothOutput, Task,
    TaskCategory, TaskMeta, TaskPayload, TaskResult, TrackMotion,
};
