//! `FINAL_WRITE` processor: normalizes a dispatch-handler-built record and
//! hands it to the configured `Sink`. Terminal stage — no descendants.
//!
//! Ported from
//! `original_source/pipeline/processors/final_write.py::process_final_writer`/`_build_record`.

use std::any::Any;
use std::sync::Arc;

use dashcam_core::{FinalAck, Sink, SinkTable, Task, TaskCategory, TaskPayload, TaskResult};
use serde_json::json;

use crate::frame_store::FrameStore;
use crate::processor::{Processor, ProcessorError};

/// Fields the `vehicles` table requires before a record may be written
/// (§6).
const VEHICLES_REQUIRED_FIELDS: &[&str] = &[
    "video_id",
    "frame_idx",
    "final_plate",
    "plate_confidence",
    "car_bbox",
    "plate_bbox",
    "ts",
];

pub struct FinalWriteProcessor {
    sink: Arc<dyn Sink>,
}

impl FinalWriteProcessor {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }
}

impl Processor for FinalWriteProcessor {
    fn category(&self) -> TaskCategory {
        TaskCategory::FinalWrite
    }

    fn load_resource(&self) -> Result<Box<dyn Any + Send>, ProcessorError> {
        Ok(Box::new(()))
    }

    fn process(
        &self,
        task: &Task,
        _frame_store: &FrameStore,
        _resource: &mut (dyn Any + Send),
    ) -> Result<TaskResult, ProcessorError> {
        let (table, mut record) = match &task.payload {
            TaskPayload::FinalRecord { table, record } => (*table, record.clone()),
            _ => {
                return Err(ProcessorError::new(
                    self.category(),
                    "FINAL_WRITE task missing record payload",
                ));
            }
        };

        if let serde_json::Value::Object(map) = &mut record {
            map.entry("video_id").or_insert_with(|| json!(task.video_id));
            map.entry("frame_idx").or_insert_with(|| json!(task.frame_idx));
            if let Some(track_id) = task.track_id {
                map.entry("track_id").or_insert_with(|| json!(track_id));
            }
            // `video_ts_ms` isn't in the passthrough set, so it is rarely
            // carried this far; fill `ts` ourselves rather than rejecting
            // an otherwise-complete vehicles record for lacking it.
            let needs_ts = map.get("ts").map(|v| v.is_null()).unwrap_or(true);
            if needs_ts {
                map.insert("ts".to_string(), json!(chrono::Utc::now().to_rfc3339()));
            }
        }

        if table == SinkTable::Vehicles {
            for field in VEHICLES_REQUIRED_FIELDS {
                let present = record
                    .get(field)
                    .map(|v| !v.is_null())
                    .unwrap_or(false);
                if !present {
                    return Err(ProcessorError::new(
                        self.category(),
                        format!("vehicles record missing required field `{field}`"),
                    ));
                }
            }
        }

        // Processors run inside `spawn_blocking` (§5); the blocking thread
        // pool keeps the enclosing runtime's context, so `Handle::current`
        // and `block_on` are safe here.
        let handle = tokio::runtime::Handle::current();
        handle
            .block_on(self.sink.write_record(table, record))
            .map_err(|e| ProcessorError::new(self.category(), e.to_string()))?;

        Ok(TaskResult::FinalWrite(FinalAck {
            table,
            video_id: task.video_id.clone(),
            frame_idx: task.frame_idx,
        }))
    }
}
