//! Shared task vocabulary: categories, lanes, the task record itself, and the
//! per-category result/payload shapes that flow between workers and dispatch
//! handlers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Which physical resource a category's worker needs loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lane {
    Gpu,
    Cpu,
}

/// Closed enumeration of pipeline stages.
///
/// Declaration order here is also the tie-break order used by worker
/// busiest-category selection (§4.4) when backlogs are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskCategory {
    VehicleDetect,
    PlateDetect,
    VehicleTrack,
    Ocr,
    PlateSmooth,
    FinalWrite,
}

impl TaskCategory {
    /// All categories, in declaration order.
    pub const ALL: [TaskCategory; 6] = [
        TaskCategory::VehicleDetect,
        TaskCategory::PlateDetect,
        TaskCategory::VehicleTrack,
        TaskCategory::Ocr,
        TaskCategory::PlateSmooth,
        TaskCategory::FinalWrite,
    ];

    /// GPU-lane categories, in declaration order.
    pub const GPU: [TaskCategory; 3] = [
        TaskCategory::VehicleDetect,
        TaskCategory::PlateDetect,
        TaskCategory::Ocr,
    ];

    /// CPU-lane categories, in declaration order.
    pub const CPU: [TaskCategory; 3] = [
        TaskCategory::VehicleTrack,
        TaskCategory::PlateSmooth,
        TaskCategory::FinalWrite,
    ];

    pub fn lane(self) -> Lane {
        match self {
            TaskCategory::VehicleDetect | TaskCategory::PlateDetect | TaskCategory::Ocr => {
                Lane::Gpu
            }
            TaskCategory::VehicleTrack | TaskCategory::PlateSmooth | TaskCategory::FinalWrite => {
                Lane::Cpu
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskCategory::VehicleDetect => "vehicle_detect",
            TaskCategory::PlateDetect => "plate_detect",
            TaskCategory::VehicleTrack => "vehicle_track",
            TaskCategory::Ocr => "ocr",
            TaskCategory::PlateSmooth => "plate_smooth",
            TaskCategory::FinalWrite => "final_write",
        }
    }
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle for a frame in the frame store: `<video_id>:<frame_idx>`.
///
/// Carries no semantics beyond identity; nothing but the frame store parses
/// its structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadRef(pub String);

impl PayloadRef {
    pub fn new(video_id: &str, frame_idx: u64) -> Self {
        PayloadRef(format!("{video_id}:{frame_idx}"))
    }
}

impl std::fmt::Display for PayloadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Axis-aligned pixel bounding box, `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn area(&self) -> f64 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

/// One vehicle detection, as produced by the `VEHICLE_DETECT` processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub conf: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,
}

/// One candidate plate box, as produced by the `PLATE_DETECT` processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateBox {
    pub bbox: BBox,
    pub conf: f64,
}

/// Output of the `OCR` processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    pub conf: f64,
}

/// Output of the `PLATE_SMOOTH` processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_plate: Option<String>,
    pub conf: f64,
}

/// One per-track motion sample, as produced by the `VEHICLE_TRACK` processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackMotion {
    pub track_id: i64,
    pub is_new: bool,
    pub bbox: BBox,
    pub vx: f64,
    pub vy: f64,
    pub speed_px_s: f64,
    pub heading_deg: f64,
    pub age_frames: u32,
    pub conf: f64,
    pub scale_ratio: f64,
}

/// Recognized metadata keys (§6), modeled as an explicit record rather than
/// a free-form map so the passthrough set is enforced by composition instead
/// of string matching at runtime. `extra` carries anything the core doesn't
/// recognize, so handlers never silently drop caller-supplied keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<PayloadRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<PayloadRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub car_bbox: Option<BBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate_bbox: Option<BBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_ts_frame: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_ts_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_id: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl TaskMeta {
    /// Build the meta for a downstream task, carrying forward only the fixed
    /// passthrough set (§4.5): `video_path`, `video_filename`,
    /// `video_ts_frame`, `global_id`.
    pub fn passthrough_from(parent: &TaskMeta) -> TaskMeta {
        TaskMeta {
            video_path: parent.video_path.clone(),
            video_filename: parent.video_filename.clone(),
            video_ts_frame: parent.video_ts_frame,
            global_id: parent.global_id.clone(),
            ..Default::default()
        }
    }
}

/// Category-specific work input. The video reader and dispatch handlers are
/// the only producers; processors are the only consumers.
#[derive(Debug, Clone)]
pub enum TaskPayload {
    /// `VEHICLE_DETECT` / `PLATE_DETECT` / `OCR`: the frame (and, for the
    /// latter two, the ROI) is reached through `meta`, so there is nothing
    /// further to carry here.
    None,
    /// `VEHICLE_TRACK`: the full per-frame detection list.
    Detections(Vec<Detection>),
    /// `PLATE_SMOOTH`: one OCR observation to fold into the accumulator.
    OcrObservation { text: String, conf: f64 },
    /// `FINAL_WRITE`: a pre-built sink record.
    FinalRecord {
        table: crate::sink::SinkTable,
        record: serde_json::Value,
    },
}

/// Immutable unit of work.
#[derive(Debug, Clone)]
pub struct Task {
    pub category: TaskCategory,
    pub payload: TaskPayload,
    pub priority: i32,
    pub video_id: String,
    pub frame_idx: u64,
    pub track_id: Option<i64>,
    pub meta: TaskMeta,
}

impl Task {
    pub fn new(category: TaskCategory, video_id: impl Into<String>, frame_idx: u64) -> Self {
        Task {
            category,
            payload: TaskPayload::None,
            priority: 0,
            video_id: video_id.into(),
            frame_idx,
            track_id: None,
            meta: TaskMeta::default(),
        }
    }
}

/// Output of a processor for one task. Shape is category-specific (§6).
#[derive(Debug, Clone)]
pub enum TaskResult {
    VehicleDetect(Vec<Detection>),
    PlateDetect(Vec<PlateBox>),
    VehicleTrack(Vec<TrackMotion>),
    Ocr(OcrOutput),
    PlateSmooth(SmoothOutput),
    FinalWrite(FinalAck),
}

/// Acknowledgement returned by the `FINAL_WRITE` processor once the sink
/// accepts a record.
#[derive(Debug, Clone)]
pub struct FinalAck {
    pub table: crate::sink::SinkTable,
    pub video_id: String,
    pub frame_idx: u64,
}
