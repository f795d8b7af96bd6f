//! `PLATE_SMOOTH` processor: accumulates OCR observations per
//! `(video_id, track_id)` and, once at least two have arrived, emits a
//! confidence-weighted, character-voted merge.
//!
//! Ported from
//! `original_source/pipeline/processors/plate_smooth.py::process_plate_smooth`.
//! Tracks with no `track_id` collapse onto the shared `(video_id, None)`
//! accumulator — a known limitation (§9 open question), not fixed here.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Mutex;

use dashcam_core::{SmoothOutput, Task, TaskCategory, TaskPayload, TaskResult};

use crate::frame_store::FrameStore;
use crate::processor::{Processor, ProcessorError};

/// Similarity ratio in `[0, 1]` between two equal-length strings, based on
/// longest-common-subsequence length (a practical stand-in for Python's
/// `difflib.SequenceMatcher.ratio`, which this was ported from).
fn similarity(a: &[u8], b: &[u8]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let n = a.len();
    let m = b.len();
    let mut dp = vec![vec![0u32; m + 1]; n + 1];
    for i in 1..=n {
        for j in 1..=m {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    let lcs = dp[n][m] as f64;
    2.0 * lcs / (n + m) as f64
}

/// Confidence-weighted, character-voted merge of ≥ 2 OCR observations.
/// Strings are right-padded with spaces to the longest observation's
/// length; each output position is the character with the greatest summed
/// confidence across observations, ties broken toward the "base" guess
/// (the observation whose similarity to the others, weighted by their
/// confidence, is greatest).
fn merge_strings(guesses: &[(String, f64)]) -> String {
    let max_len = guesses.iter().map(|(t, _)| t.len()).max().unwrap_or(0);
    let padded: Vec<(Vec<u8>, f64)> = guesses
        .iter()
        .map(|(t, c)| {
            let mut bytes = t.as_bytes().to_vec();
            bytes.resize(max_len, b' ');
            (bytes, *c)
        })
        .collect();

    let mut best_base_idx = 0usize;
    let mut best_score = f64::MIN;
    for (i, (base_text, _)) in padded.iter().enumerate() {
        let mut score = 0.0;
        for (j, (other_text, other_conf)) in padded.iter().enumerate() {
            if i == j {
                continue;
            }
            score += similarity(base_text, other_text) * other_conf;
        }
        if score > best_score {
            best_score = score;
            best_base_idx = i;
        }
    }
    let best_base = &padded[best_base_idx].0;

    let mut out = Vec::with_capacity(max_len);
    for pos in 0..max_len {
        let mut votes: HashMap<u8, f64> = HashMap::new();
        for (text, conf) in &padded {
            *votes.entry(text[pos]).or_insert(0.0) += conf;
        }
        let max_vote = votes.values().cloned().fold(f64::MIN, f64::max);
        let mut winners: Vec<u8> = votes
            .iter()
            .filter(|(_, v)| (**v - max_vote).abs() < 1e-9)
            .map(|(ch, _)| *ch)
            .collect();
        winners.sort_unstable();
        let winner = if winners.contains(&best_base[pos]) {
            best_base[pos]
        } else {
            winners[0]
        };
        out.push(winner);
    }

    String::from_utf8_lossy(&out).trim_end().to_string()
}

pub struct PlateSmoothProcessor {
    cache: Mutex<HashMap<(String, Option<i64>), Vec<(String, f64)>>>,
}

impl Default for PlateSmoothProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PlateSmoothProcessor {
    pub fn new() -> Self {
        PlateSmoothProcessor {
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl Processor for PlateSmoothProcessor {
    fn category(&self) -> TaskCategory {
        TaskCategory::PlateSmooth
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
        let (text, conf) = match &task.payload {
            TaskPayload::OcrObservation { text, conf } => (text.clone(), *conf),
            _ => {
                return Err(ProcessorError::new(
                    self.category(),
                    "PLATE_SMOOTH task missing OCR observation payload",
                ));
            }
        };

        let key = (task.video_id.clone(), task.track_id);
        let mut cache = self.cache.lock().unwrap();
        let guesses = cache.entry(key).or_default();
        guesses.push((text, conf));

        if guesses.len() >= 2 {
            let merged = merge_strings(guesses);
            let best_conf = guesses.iter().map(|(_, c)| *c).fold(f64::MIN, f64::max);
            Ok(TaskResult::PlateSmooth(SmoothOutput {
                final_plate: Some(merged),
                conf: best_conf,
            }))
        } else {
            Ok(TaskResult::PlateSmooth(SmoothOutput {
                final_plate: None,
                conf,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashcam_core::TaskMeta;

    fn ocr_task(video_id: &str, track_id: Option<i64>, text: &str, conf: f64) -> Task {
        Task {
            category: TaskCategory::PlateSmooth,
            payload: TaskPayload::OcrObservation {
                text: text.to_string(),
                conf,
            },
            priority: 0,
            video_id: video_id.to_string(),
            frame_idx: 0,
            track_id,
            meta: TaskMeta::default(),
        }
    }

    #[test]
    fn single_observation_produces_no_final() {
        let proc = PlateSmoothProcessor::new();
        let task = ocr_task("v1", Some(1), "ABC123", 0.9);
        let TaskResult::PlateSmooth(out) =
            proc.process(&task, &FrameStore::new(), &mut ()).unwrap()
        else {
            panic!("wrong result variant")
        };
        assert!(out.final_plate.is_none());
    }

    #[test]
    fn two_matching_observations_merge_to_same_text() {
        let proc = PlateSmoothProcessor::new();
        proc.process(&ocr_task("v1", Some(1), "ABC123", 0.9), &FrameStore::new(), &mut ())
            .unwrap();
        let TaskResult::PlateSmooth(out) = proc
            .process(&ocr_task("v1", Some(1), "ABC123", 0.85), &FrameStore::new(), &mut ())
            .unwrap()
        else {
            panic!("wrong result variant")
        };
        assert_eq!(out.final_plate.as_deref(), Some("ABC123"));
        assert!((out.conf - 0.9).abs() < 1e-9);
    }

    #[test]
    fn disagreement_is_resolved_by_confidence_weighted_vote() {
        let proc = PlateSmoothProcessor::new();
        proc.process(&ocr_task("v1", Some(1), "ABC128", 0.9), &FrameStore::new(), &mut ())
            .unwrap();
        let TaskResult::PlateSmooth(out) = proc
            .process(&ocr_task("v1", Some(1), "ABC123", 0.95), &FrameStore::new(), &mut ())
            .unwrap()
        else {
            panic!("wrong result variant")
        };
        // higher-confidence guess's last digit should win the per-position vote.
        assert_eq!(out.final_plate.as_deref(), Some("ABC123"));
    }

    #[test]
    fn missing_track_id_collapses_onto_shared_accumulator() {
        let proc = PlateSmoothProcessor::new();
        proc.process(&ocr_task("v1", None, "XY", 0.7), &FrameStore::new(), &mut ())
            .unwrap();
        let TaskResult::PlateSmooth(out) = proc
            .process(&ocr_task("v1", None, "ZZ", 0.5), &FrameStore::new(), &mut ())
            .unwrap()
        else {
            panic!("wrong result variant")
        };
        assert!(out.final_plate.is_some());
    }
}
