//! Dispatch handlers: the pipeline graph (§4.5). One function per category
//! maps a processor's result onto zero or more downstream tasks.
//!
//! Ported from `original_source/pipeline/dispatch_handlers.py`. The refcount
//! discipline is identical: every downstream task's `dependencies` get
//! `add_refs` *before* its enqueue; the current task's own dependencies are
//! released by the worker (§4.4), not here.

use std::time::Duration;

use dashcam_core::{
    BBox, SinkTable, Task, TaskCategory, TaskMeta, TaskPayload, TaskResult,
};
use serde_json::json;

use crate::frame_store::FrameStore;
use crate::queue::CentralQueue;

/// Borrowed handles dispatch handlers need: the queue to push onto and the
/// frame store to bump refcounts on before every push.
pub(crate) struct DispatchContext<'a> {
    pub queue: &'a CentralQueue,
    pub frame_store: &'a FrameStore,
}

/// Push, retrying on hard-limit refusal until accepted (§4.5
/// "push-with-wait"). This is deliberate backpressure propagated back onto
/// whichever worker produced the upstream result.
pub(crate) async fn push_with_wait(queue: &CentralQueue, task: Task) {
    loop {
        if queue.push(task.clone()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn bbox_json(bbox: BBox) -> serde_json::Value {
    json!([bbox.x1, bbox.y1, bbox.x2, bbox.y2])
}

/// `VEHICLE_DETECT` → one `PLATE_DETECT` per detection, plus exactly one
/// `VEHICLE_TRACK` for the whole frame.
async fn handle_vehicle_detect_result(task: &Task, result: TaskResult, ctx: &DispatchContext<'_>) {
    let TaskResult::VehicleDetect(detections) = result else {
        return;
    };

    let deps = task.meta.dependencies.clone();

    for det in &detections {
        ctx.frame_store.add_refs(&deps);
        let mut meta = TaskMeta::passthrough_from(&task.meta);
        meta.payload_ref = task.meta.payload_ref.clone();
        meta.dependencies = deps.clone();
        meta.car_bbox = Some(det.bbox);
        if let Some(track_id) = det.track_id {
            meta.global_id = Some(format!("{}:{}", task.video_id, track_id));
        }
        let plate_detect_task = Task {
            category: TaskCategory::PlateDetect,
            payload: TaskPayload::None,
            priority: task.priority,
            video_id: task.video_id.clone(),
            frame_idx: task.frame_idx,
            track_id: det.track_id,
            meta,
        };
        push_with_wait(ctx.queue, plate_detect_task).await;
    }

    ctx.frame_store.add_refs(&deps);
    let mut meta = TaskMeta::passthrough_from(&task.meta);
    meta.payload_ref = task.meta.payload_ref.clone();
    meta.dependencies = deps;
    let vehicle_track_task = Task {
        category: TaskCategory::VehicleTrack,
        payload: TaskPayload::Detections(detections),
        priority: task.priority,
        video_id: task.video_id.clone(),
        frame_idx: task.frame_idx,
        track_id: None,
        meta,
    };
    push_with_wait(ctx.queue, vehicle_track_task).await;
}

/// `PLATE_DETECT` → at most one `OCR` task, for the highest-confidence
/// plate box.
async fn handle_plate_detect_result(task: &Task, result: TaskResult, ctx: &DispatchContext<'_>) {
    let TaskResult::PlateDetect(plates) = result else {
        return;
    };
    let Some(best) = plates
        .iter()
        .max_by(|a, b| a.conf.partial_cmp(&b.conf).unwrap_or(std::cmp::Ordering::Equal))
    else {
        return;
    };

    let deps = task.meta.dependencies.clone();
    ctx.frame_store.add_refs(&deps);

    let mut meta = TaskMeta::passthrough_from(&task.meta);
    meta.payload_ref = task.meta.payload_ref.clone();
    meta.dependencies = deps;
    meta.car_bbox = task.meta.car_bbox;
    meta.plate_bbox = Some(best.bbox);

    let ocr_task = Task {
        category: TaskCategory::Ocr,
        payload: TaskPayload::None,
        priority: task.priority,
        video_id: task.video_id.clone(),
        frame_idx: task.frame_idx,
        track_id: task.track_id,
        meta,
    };
    push_with_wait(ctx.queue, ocr_task).await;
}

/// `VEHICLE_TRACK` → one `FINAL_WRITE(track_motion)` per entry, plus one
/// `FINAL_WRITE(tracks)` index row for newly-seen tracks.
async fn handle_vehicle_track_result(task: &Task, result: TaskResult, ctx: &DispatchContext<'_>) {
    let TaskResult::VehicleTrack(entries) = result else {
        return;
    };

    for entry in entries {
        let global_id = format!("{}:{}", task.video_id, entry.track_id);

        if entry.is_new {
            let record = json!({
                "global_id": global_id,
                "video_id": task.video_id,
                "track_id": entry.track_id,
                "first_frame_idx": task.frame_idx,
                "video_ts_frame": task.meta.video_ts_frame,
                "video_path": task.meta.video_path,
                "video_filename": task.meta.video_filename,
            });
            let tracks_task = Task {
                category: TaskCategory::FinalWrite,
                payload: TaskPayload::FinalRecord {
                    table: SinkTable::Tracks,
                    record,
                },
                priority: task.priority,
                video_id: task.video_id.clone(),
                frame_idx: task.frame_idx,
                track_id: Some(entry.track_id),
                meta: TaskMeta::passthrough_from(&task.meta),
            };
            push_with_wait(ctx.queue, tracks_task).await;
        }

        let motion_record = json!({
            "global_id": global_id,
            "track_id": entry.track_id,
            "video_id": task.video_id,
            "frame_idx": task.frame_idx,
            "video_ts_frame": task.meta.video_ts_frame,
            "video_ts_ms": task.meta.video_ts_ms,
            "bbox": bbox_json(entry.bbox),
            "vx": entry.vx,
            "vy": entry.vy,
            "speed_px_s": entry.speed_px_s,
            "heading_deg": entry.heading_deg,
            "age_frames": entry.age_frames,
            "conf": entry.conf,
            "video_path": task.meta.video_path,
            "video_filename": task.meta.video_filename,
        });
        let motion_task = Task {
            category: TaskCategory::FinalWrite,
            payload: TaskPayload::FinalRecord {
                table: SinkTable::TrackMotion,
                record: motion_record,
            },
            priority: task.priority,
            video_id: task.video_id.clone(),
            frame_idx: task.frame_idx,
            track_id: Some(entry.track_id),
            meta: TaskMeta::passthrough_from(&task.meta),
        };
        push_with_wait(ctx.queue, motion_task).await;
    }
}

/// `OCR` → at most one `PLATE_SMOOTH` task.
async fn handle_ocr_result(task: &Task, result: TaskResult, ctx: &DispatchContext<'_>) {
    let TaskResult::Ocr(output) = result else {
        return;
    };
    if output.text.is_empty() {
        return;
    }

    let mut meta = TaskMeta::passthrough_from(&task.meta);
    meta.car_bbox = task.meta.car_bbox;
    meta.plate_bbox = task.meta.plate_bbox;

    let smooth_task = Task {
        category: TaskCategory::PlateSmooth,
        payload: TaskPayload::OcrObservation {
            text: output.text,
            conf: output.conf,
        },
        priority: task.priority,
        video_id: task.video_id.clone(),
        frame_idx: task.frame_idx,
        track_id: task.track_id,
        meta,
    };
    push_with_wait(ctx.queue, smooth_task).await;
}

/// `PLATE_SMOOTH` → at most one `FINAL_WRITE(vehicles)` task, once the
/// smoother has enough history to emit a final answer.
async fn handle_plate_smooth_result(task: &Task, result: TaskResult, ctx: &DispatchContext<'_>) {
    let TaskResult::PlateSmooth(output) = result else {
        return;
    };
    let Some(final_plate) = output.final_plate else {
        return;
    };

    let record = json!({
        "final_plate": final_plate,
        "plate_confidence": output.conf,
        "car_bbox": task.meta.car_bbox.map(bbox_json),
        "plate_bbox": task.meta.plate_bbox.map(bbox_json),
        "global_id": task.meta.global_id,
        "ts": task.meta.video_ts_ms,
    });
    let write_task = Task {
        category: TaskCategory::FinalWrite,
        payload: TaskPayload::FinalRecord {
            table: SinkTable::Vehicles,
            record,
        },
        priority: task.priority,
        video_id: task.video_id.clone(),
        frame_idx: task.frame_idx,
        track_id: task.track_id,
        meta: TaskMeta::passthrough_from(&task.meta),
    };
    push_with_wait(ctx.queue, write_task).await;
}

/// `FINAL_WRITE` is terminal: no descendants.
async fn handle_final_write_result(_task: &Task, _result: TaskResult, _ctx: &DispatchContext<'_>) {}

/// Route a processor's result to its category's handler (§9: "a tagged
/// variant plus a function table captures the graph" — here, a `match`).
pub(crate) async fn dispatch(task: &Task, result: TaskResult, ctx: &DispatchContext<'_>) {
    match task.category {
        TaskCategory::VehicleDetect => handle_vehicle_detect_result(task, result, ctx).await,
        TaskCategory::PlateDetect => handle_plate_detect_result(task, result, ctx).await,
        TaskCategory::VehicleTrack => handle_vehicle_track_result(task, result, ctx).await,
        TaskCategory::Ocr => handle_ocr_result(task, result, ctx).await,
        TaskCategory::PlateSmooth => handle_plate_smooth_result(task, result, ctx).await,
        TaskCategory::FinalWrite => handle_final_write_result(task, result, ctx).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashcam_core::{Detection, PayloadRef, PlateBox};

    fn ctx<'a>(queue: &'a CentralQueue, frame_store: &'a FrameStore) -> DispatchContext<'a> {
        DispatchContext { queue, frame_store }
    }

    fn base_task(category: TaskCategory, deps: Vec<PayloadRef>) -> Task {
        Task {
            category,
            payload: TaskPayload::None,
            priority: 0,
            video_id: "v1".to_string(),
            frame_idx: 0,
            track_id: None,
            meta: TaskMeta {
                dependencies: deps,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn empty_detections_still_spawns_one_vehicle_track_task() {
        let queue = CentralQueue::new(64, 128);
        let frame_store = FrameStore::new();
        let payload_ref = frame_store.save("v1", 0, vec![0]);
        let task = base_task(TaskCategory::VehicleDetect, vec![payload_ref]);

        dispatch(
            &task,
            TaskResult::VehicleDetect(Vec::new()),
            &ctx(&queue, &frame_store),
        )
        .await;

        assert_eq!(queue.backlog(TaskCategory::PlateDetect), 0);
        assert_eq!(queue.backlog(TaskCategory::VehicleTrack), 1);
    }

    #[tokio::test]
    async fn multi_detection_fans_out_to_plate_detect_and_one_track() {
        let queue = CentralQueue::new(64, 128);
        let frame_store = FrameStore::new();
        let payload_ref = frame_store.save("v1", 0, vec![0]);
        let task = base_task(TaskCategory::VehicleDetect, vec![payload_ref.clone()]);

        let detections = vec![
            Detection {
                bbox: BBox { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 },
                conf: 0.9,
                track_id: Some(1),
            },
            Detection {
                bbox: BBox { x1: 1.0, y1: 1.0, x2: 2.0, y2: 2.0 },
                conf: 0.8,
                track_id: Some(2),
            },
            Detection {
                bbox: BBox { x1: 2.0, y1: 2.0, x2: 3.0, y2: 3.0 },
                conf: 0.7,
                track_id: Some(3),
            },
        ];

        dispatch(
            &task,
            TaskResult::VehicleDetect(detections),
            &ctx(&queue, &frame_store),
        )
        .await;

        assert_eq!(queue.backlog(TaskCategory::PlateDetect), 3);
        assert_eq!(queue.backlog(TaskCategory::VehicleTrack), 1);
        // 3 plate_detect + 1 vehicle_track = 4 peak holders (the originating
        // task's own hold is released by the worker, not the handler, so it
        // is absent here — this test calls the handler directly).
        assert_eq!(frame_store.refcount(&payload_ref), Some(4));
    }

    #[tokio::test]
    async fn plate_detect_picks_highest_confidence() {
        let queue = CentralQueue::new(64, 128);
        let frame_store = FrameStore::new();
        let task = base_task(TaskCategory::PlateDetect, Vec::new());

        let plates = vec![
            PlateBox { bbox: BBox { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 }, conf: 0.5 },
            PlateBox { bbox: BBox { x1: 1.0, y1: 1.0, x2: 2.0, y2: 2.0 }, conf: 0.95 },
        ];

        dispatch(
            &task,
            TaskResult::PlateDetect(plates),
            &ctx(&queue, &frame_store),
        )
        .await;

        assert_eq!(queue.backlog(TaskCategory::Ocr), 1);
        let ocr_task = queue.pop(TaskCategory::Ocr).unwrap();
        assert_eq!(ocr_task.meta.plate_bbox.unwrap().x1, 1.0);
    }

    #[tokio::test]
    async fn empty_plate_list_spawns_nothing() {
        let queue = CentralQueue::new(64, 128);
        let frame_store = FrameStore::new();
        let task = base_task(TaskCategory::PlateDetect, Vec::new());
        dispatch(
            &task,
            TaskResult::PlateDetect(Vec::new()),
            &ctx(&queue, &frame_store),
        )
        .await;
        assert_eq!(queue.backlog(TaskCategory::Ocr), 0);
    }

    #[tokio::test]
    async fn empty_ocr_text_spawns_nothing() {
        let queue = CentralQueue::new(64, 128);
        let frame_store = FrameStore::new();
        let task = base_task(TaskCategory::Ocr, Vec::new());
        dispatch(
            &task,
            TaskResult::Ocr(dashcam_core::OcrOutput { text: String::new(), conf: 0.0 }),
            &ctx(&queue, &frame_store),
        )
        .await;
        assert_eq!(queue.backlog(TaskCategory::PlateSmooth), 0);
    }

    #[tokio::test]
    async fn null_final_plate_spawns_nothing() {
        let queue = CentralQueue::new(64, 128);
        let frame_store = FrameStore::new();
        let task = base_task(TaskCategory::PlateSmooth, Vec::new());
        dispatch(
            &task,
            TaskResult::PlateSmooth(dashcam_core::SmoothOutput { final_plate: None, conf: 0.5 }),
            &ctx(&queue, &frame_store),
        )
        .await;
        assert_eq!(queue.backlog(TaskCategory::FinalWrite), 0);
    }
}
