//! Shared fixtures for the end-to-end tests in this directory: a trivial
//! `FrameSource` that hands out a fixed number of frames, and fixed
//! `Detector`/`Ocr` stand-ins that exercise the full dispatch graph the way
//! spec.md §8's scenario 1 describes, without depending on a real decoder
//! or model.

use std::any::Any;

use dashcam_core::{BBox, Detection, OcrOutput, PlateBox};
use dashcam_engine::{DecodedFrame, Detector, FrameSource, Ocr, ProcessorError, VideoReaderError};

/// Hands out `frame_count` frames in order for one video, each one byte of
/// placeholder content. Real decoding is out of scope (§1); this exists
/// only so the engine has frames to route.
pub struct FixedFrameSource {
    video_id: String,
    path: String,
    fps: f64,
    next_idx: u64,
    remaining: u64,
}

impl FixedFrameSource {
    pub fn new(video_id: &str, frame_count: u64) -> Self {
        FixedFrameSource {
            video_id: video_id.to_string(),
            path: format!("{video_id}.mp4"),
            fps: 30.0,
            next_idx: 0,
            remaining: frame_count,
        }
    }
}

impl FrameSource for FixedFrameSource {
    fn video_id(&self) -> &str {
        &self.video_id
    }

    fn video_path(&self) -> &str {
        &self.path
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, VideoReaderError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let frame_idx = self.next_idx;
        self.next_idx += 1;
        Ok(Some(DecodedFrame {
            frame_idx,
            bytes: vec![0u8],
            video_ts_ms: None,
        }))
    }
}

/// Always finds exactly one vehicle (`track_id = Some(1)`) and one plate
/// box, regardless of frame content.
pub struct FixedDetector;

impl Detector for FixedDetector {
    fn load(&self) -> Result<Box<dyn Any + Send>, ProcessorError> {
        Ok(Box::new(()))
    }

    fn detect_vehicles(
        &self,
        _resource: &mut (dyn Any + Send),
        _frame: &[u8],
    ) -> Result<Vec<Detection>, ProcessorError> {
        Ok(vec![Detection {
            bbox: BBox { x1: 10.0, y1: 10.0, x2: 110.0, y2: 110.0 },
            conf: 0.9,
            track_id: Some(1),
        }])
    }

    fn detect_plates(
        &self,
        _resource: &mut (dyn Any + Send),
        _frame: &[u8],
        _car_bbox: BBox,
    ) -> Result<Vec<PlateBox>, ProcessorError> {
        Ok(vec![PlateBox {
            bbox: BBox { x1: 30.0, y1: 40.0, x2: 80.0, y2: 60.0 },
            conf: 0.9,
        }])
    }
}

/// Finds `count` vehicles in every frame, each with a distinct `track_id`,
/// and one plate box per vehicle (spec.md §8 scenario 4's fan-out case).
pub struct MultiDetector {
    pub count: i64,
}

impl Detector for MultiDetector {
    fn load(&self) -> Result<Box<dyn Any + Send>, ProcessorError> {
        Ok(Box::new(()))
    }

    fn detect_vehicles(
        &self,
        _resource: &mut (dyn Any + Send),
        _frame: &[u8],
    ) -> Result<Vec<Detection>, ProcessorError> {
        Ok((1..=self.count)
            .map(|id| Detection {
                bbox: BBox { x1: 10.0 * id as f64, y1: 10.0, x2: 10.0 * id as f64 + 50.0, y2: 60.0 },
                conf: 0.9,
                track_id: Some(id),
            })
            .collect())
    }

    fn detect_plates(
        &self,
        _resource: &mut (dyn Any + Send),
        _frame: &[u8],
        car_bbox: BBox,
    ) -> Result<Vec<PlateBox>, ProcessorError> {
        Ok(vec![PlateBox { bbox: car_bbox, conf: 0.9 }])
    }
}

/// Always reads the same plate text, so two frames give the smoother two
/// matching observations to merge (spec.md §8 scenario 1).
pub struct FixedOcr;

impl Ocr for FixedOcr {
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
        Ok(OcrOutput { text: "ABC123".to_string(), conf: 0.9 })
    }
}
