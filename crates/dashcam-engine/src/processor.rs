//! Processor contract (§4.6): `(task, resource) -> result`, where `resource`
//! is the lazily-loaded per-category artifact a worker owns exclusively
//! while it stays loaded for that category (§4.4, §9 "resource lazy-load").
//!
//! `VEHICLE_DETECT`, `PLATE_DETECT`, and `OCR` are model-backed and their
//! internals are explicitly out of scope (§1) — they're represented here as
//! pluggable `Detector`/`Ocr` traits a caller supplies. `VEHICLE_TRACK` and
//! `PLATE_SMOOTH` are fully specified algorithms and get concrete
//! implementations (see `processors::vehicle_track`,
//! `processors::plate_smooth`). `FINAL_WRITE` is concrete too: it builds a
//! record and hands it to a `Sink`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use dashcam_core::{BBox, Detection, OcrOutput, PlateBox, Task, TaskCategory, TaskResult};
use thiserror::Error;

use crate::frame_store::FrameStore;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor for {category} failed: {message}")]
    Failed {
        category: TaskCategory,
        message: String,
    },
}

impl ProcessorError {
    pub fn new(category: TaskCategory, message: impl Into<String>) -> Self {
        ProcessorError::Failed {
            category,
            message: message.into(),
        }
    }
}

/// Lazily-loaded, category-scoped resource plus the work function over it.
/// Implementations must not hold state for more than one category — the
/// worker pool is responsible for evicting the old resource before loading
/// a new one on category switch (§4.4 "Switching").
pub trait Processor: Send + Sync {
    fn category(&self) -> TaskCategory;

    /// Load this category's resource (e.g. model weights). Called once per
    /// worker each time it switches onto this category.
    fn load_resource(&self) -> Result<Box<dyn Any + Send>, ProcessorError>;

    fn process(
        &self,
        task: &Task,
        frame_store: &FrameStore,
        resource: &mut (dyn Any + Send),
    ) -> Result<TaskResult, ProcessorError>;
}

/// A detector model's external contract: vehicle and plate detection share a
/// loader because both run on the same weights family in the source system,
/// but each category still gets its own `Processor` registration so the
/// worker pool can schedule and switch them independently.
pub trait Detector: Send + Sync {
    fn load(&self) -> Result<Box<dyn Any + Send>, ProcessorError>;

    /// Input: a raw frame. Output: `[{bbox, conf, track_id?}]` (§4.6).
    fn detect_vehicles(
        &self,
        resource: &mut (dyn Any + Send),
        frame: &[u8],
    ) -> Result<Vec<Detection>, ProcessorError>;

    /// Input: a frame cropped to `car_bbox`. Output: `[{bbox, conf}]` in ROI
    /// coordinates (§4.6).
    fn detect_plates(
        &self,
        resource: &mut (dyn Any + Send),
        frame: &[u8],
        car_bbox: BBox,
    ) -> Result<Vec<PlateBox>, ProcessorError>;
}

/// The OCR model's external contract (§4.6).
pub trait Ocr: Send + Sync {
    fn load(&self) -> Result<Box<dyn Any + Send>, ProcessorError>;

    fn read_plate(
        &self,
        resource: &mut (dyn Any + Send),
        frame: &[u8],
        car_bbox: BBox,
        plate_bbox: BBox,
    ) -> Result<OcrOutput, ProcessorError>;
}

/// A `Detector` that finds nothing. Used as the default when no real
/// detector is wired in, and by tests that only need to exercise the
/// dispatch graph.
#[derive(Debug, Default)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn load(&self) -> Result<Box<dyn Any + Send>, ProcessorError> {
        Ok(Box::new(()))
    }

    fn detect_vehicles(
        &self,
        _resource: &mut (dyn Any + Send),
        _frame: &[u8],
    ) -> Result<Vec<Detection>, ProcessorError> {
        Ok(Vec::new())
    }

    fn detect_plates(
        &self,
        _resource: &mut (dyn Any + Send),
        _frame: &[u8],
        _car_bbox: BBox,
    ) -> Result<Vec<PlateBox>, ProcessorError> {
        Ok(Vec::new())
    }
}

/// An `Ocr` that reads nothing. See `NullDetector`.
#[derive(Debug, Default)]
pub struct NullOcr;

impl Ocr for NullOcr {
    fn load(&self) -> Result<Box<dyn Any + Send>, ProcessorError> {
        Ok(Box::new(()))
    }

    fn read_plate(
        &self,
        _resource: &mut (dyn Any + Send),
        _frame: &[u8],
        _car_bbox: BBox,
        _plate_bbox: BBox,
    ) -> Result<OcrOutput, ProcessorError> {
        Ok(OcrOutput {
            text: String::new(),
            conf: 0.0,
        })
    }
}

/// Adapts a `Detector` into the `VEHICLE_DETECT` category's `Processor`.
pub(crate) struct VehicleDetectProcessor {
    detector: Arc<dyn Detector>,
}

impl VehicleDetectProcessor {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self { detector }
    }
}

impl Processor for VehicleDetectProcessor {
    fn category(&self) -> TaskCategory {
        TaskCategory::VehicleDetect
    }

    fn load_resource(&self) -> Result<Box<dyn Any + Send>, ProcessorError> {
        self.detector.load()
    }

    fn process(
        &self,
        task: &Task,
        frame_store: &FrameStore,
        resource: &mut (dyn Any + Send),
    ) -> Result<TaskResult, ProcessorError> {
        let payload_ref = task.meta.payload_ref.as_ref().ok_or_else(|| {
            ProcessorError::new(self.category(), "VEHICLE_DETECT task missing payload_ref")
        })?;
        let frame = frame_store
            .load(payload_ref)
            .map_err(|e| ProcessorError::new(self.category(), e.to_string()))?;
        let detections = self.detector.detect_vehicles(resource, &frame)?;
        Ok(TaskResult::VehicleDetect(detections))
    }
}

/// Adapts a `Detector` into the `PLATE_DETECT` category's `Processor`.
pub(crate) struct PlateDetectProcessor {
    detector: Arc<dyn Detector>,
}

impl PlateDetectProcessor {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self { detector }
    }
}

impl Processor for PlateDetectProcessor {
    fn category(&self) -> TaskCategory {
        TaskCategory::PlateDetect
    }

    fn load_resource(&self) -> Result<Box<dyn Any + Send>, ProcessorError> {
        self.detector.load()
    }

    fn process(
        &self,
        task: &Task,
        frame_store: &FrameStore,
        resource: &mut (dyn Any + Send),
    ) -> Result<TaskResult, ProcessorError> {
        let payload_ref = task.meta.payload_ref.as_ref().ok_or_else(|| {
            ProcessorError::new(self.category(), "PLATE_DETECT task missing payload_ref")
        })?;
        let car_bbox = task.meta.car_bbox.ok_or_else(|| {
            ProcessorError::new(self.category(), "PLATE_DETECT task missing car_bbox")
        })?;
        let frame = frame_store
            .load(payload_ref)
            .map_err(|e| ProcessorError::new(self.category(), e.to_string()))?;
        let plates = self.detector.detect_plates(resource, &frame, car_bbox)?;
        Ok(TaskResult::PlateDetect(plates))
    }
}

/// Adapts an `Ocr` into the `OCR` category's `Processor`.
pub(crate) struct OcrProcessor {
    ocr: Arc<dyn Ocr>,
}

impl OcrProcessor {
    pub fn new(ocr: Arc<dyn Ocr>) -> Self {
        Self { ocr }
    }
}

impl Processor for OcrProcessor {
    fn category(&self) -> TaskCategory {
        TaskCategory::Ocr
    }

    fn load_resource(&self) -> Result<Box<dyn Any + Send>, ProcessorError> {
        self.ocr.load()
    }

    fn process(
        &self,
        task: &Task,
        frame_store: &FrameStore,
        resource: &mut (dyn Any + Send),
    ) -> Result<TaskResult, ProcessorError> {
        let payload_ref = task
            .meta
            .payload_ref
            .as_ref()
            .ok_or_else(|| ProcessorError::new(self.category(), "OCR task missing payload_ref"))?;
        let car_bbox = task
            .meta
            .car_bbox
            .ok_or_else(|| ProcessorError::new(self.category(), "OCR task missing car_bbox"))?;
        let plate_bbox = task.meta.plate_bbox.ok_or_else(|| {
            ProcessorError::new(self.category(), "OCR task missing plate_bbox")
        })?;
        let frame = frame_store
            .load(payload_ref)
            .map_err(|e| ProcessorError::new(self.category(), e.to_string()))?;
        let output = self.ocr.read_plate(resource, &frame, car_bbox, plate_bbox)?;
        Ok(TaskResult::Ocr(output))
    }
}

/// Maps category → processor. No dynamic dispatch through inheritance is
/// needed; a tagged category plus this function table captures the graph
/// (§9).
#[derive(Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<TaskCategory, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        ProcessorRegistry {
            processors: HashMap::new(),
        }
    }

    pub fn register(&mut self, processor: Arc<dyn Processor>) {
        self.processors.insert(processor.category(), processor);
    }

    pub fn get(&self, category: TaskCategory) -> Option<Arc<dyn Processor>> {
        self.processors.get(&category).cloned()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
