//! Content-addressed frame storage with explicit cross-worker reference
//! counting.
//!
//! Grounded on `original_source/pipeline/frame_store.py`, which keeps a
//! module-level refcount dict and byte blobs behind one lock. This port
//! keeps both behind the *same* `std::sync::Mutex` so increment/decrement
//! and eviction happen inside one critical section, preserving invariant
//! (c) of spec.md §4.2: "a frame's bytes exist iff its ref is in the
//! refcount table with count ≥ 1."

use std::collections::HashMap;
use std::sync::Mutex;

use dashcam_core::PayloadRef;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameStoreError {
    /// Loading a frame that isn't present. Per spec.md §4.2, a caller
    /// holding a ref must never observe this — it signals a refcount bug,
    /// not an expected condition.
    #[error("frame store missing frame for ref {0}")]
    MissingFrame(PayloadRef),
}

struct Entry {
    bytes: Vec<u8>,
    refcount: u64,
}

pub struct FrameStore {
    entries: Mutex<HashMap<PayloadRef, Entry>>,
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStore {
    pub fn new() -> Self {
        FrameStore {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Persist frame bytes under the derived ref. The entry starts at
    /// refcount 0 — mirroring `original_source/pipeline/frame_store.py`,
    /// where `save_frame` writes the file unconditionally and the refcounts
    /// dict is untouched until a caller explicitly calls `add_refs`. The
    /// caller is responsible for the single `add_refs` call that brings the
    /// producing task's own hold to 1 (§4.3); without it, nothing would ever
    /// keep the frame alive and a single `release_refs` would evict
    /// immediately. Returns the ref even though this implementation cannot
    /// itself fail to persist in-memory bytes — kept as a fallible-looking
    /// boundary so callers follow the same save-before-enqueue discipline
    /// the source requires of a real (disk-backed) store.
    pub fn save(&self, video_id: &str, frame_idx: u64, bytes: Vec<u8>) -> PayloadRef {
        let payload_ref = PayloadRef::new(video_id, frame_idx);
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            payload_ref.clone(),
            Entry {
                bytes,
                refcount: 0,
            },
        );
        payload_ref
    }

    /// Loads bytes for a ref still present in the table. A freshly-`save`d
    /// entry is loadable even before its first `add_refs` (§8's round-trip
    /// property holds unconditionally on `save; load`); only `release_refs`
    /// dropping the count to 0 evicts it.
    pub fn load(&self, payload_ref: &PayloadRef) -> Result<Vec<u8>, FrameStoreError> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(payload_ref)
            .map(|e| e.bytes.clone())
            .ok_or_else(|| FrameStoreError::MissingFrame(payload_ref.clone()))
    }

    /// Increment each ref's count by 1 under a single critical section.
    pub fn add_refs(&self, refs: &[PayloadRef]) {
        let mut entries = self.entries.lock().unwrap();
        for r in refs {
            if let Some(entry) = entries.get_mut(r) {
                entry.refcount += 1;
            }
        }
    }

    /// Decrement each ref's count; evict any that reach 0. Eviction happens
    /// inside the same critical section as the decrement so a concurrent
    /// `load` can never observe a count of 0 with bytes still present, or
    /// vice versa.
    pub fn release_refs(&self, refs: &[PayloadRef]) {
        let mut entries = self.entries.lock().unwrap();
        for r in refs {
            let Some(entry) = entries.get_mut(r) else {
                continue;
            };
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount == 0 {
                entries.remove(r);
            }
        }
    }

    /// Unconditional removal. Used only by tests and fatal-shutdown paths.
    pub fn delete(&self, payload_ref: &PayloadRef) {
        self.entries.lock().unwrap().remove(payload_ref);
    }

    pub fn refcount(&self, payload_ref: &PayloadRef) -> Option<u64> {
        self.entries
            .lock()
            .unwrap()
            .get(payload_ref)
            .map(|e| e.refcount)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
