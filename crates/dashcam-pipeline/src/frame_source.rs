//! Stand-in `FrameSource`: decoding real video frames is out of scope for
//! this crate (§1) — a deployment swaps this for a real decoder (ffmpeg,
//! gstreamer, ...). This reads a file's bytes in fixed-size chunks and
//! treats each chunk as a frame, which is enough to exercise the queue,
//! frame store, worker pool, and dispatch graph against real files on disk.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use dashcam_engine::{DecodedFrame, FrameSource, VideoReaderError};

const CHUNK_BYTES: usize = 64 * 1024;
const ASSUMED_FPS: f64 = 30.0;

pub struct ChunkedFileFrameSource {
    video_id: String,
    video_path: String,
    file: File,
    next_idx: u64,
}

impl ChunkedFileFrameSource {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let video_id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Ok(ChunkedFileFrameSource {
            video_id,
            video_path: path.to_string_lossy().into_owned(),
            file,
            next_idx: 0,
        })
    }
}

impl FrameSource for ChunkedFileFrameSource {
    fn video_id(&self) -> &str {
        &self.video_id
    }

    fn video_path(&self) -> &str {
        &self.video_path
    }

    fn fps(&self) -> f64 {
        ASSUMED_FPS
    }

    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, VideoReaderError> {
        let mut buf = vec![0u8; CHUNK_BYTES];
        let n = self
            .file
            .read(&mut buf)
            .map_err(|err| VideoReaderError::Decode(err.to_string()))?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);

        let frame_idx = self.next_idx;
        self.next_idx += 1;
        let video_ts_ms = Some((frame_idx as f64 * 1000.0 / ASSUMED_FPS) as i64);

        Ok(Some(DecodedFrame {
            frame_idx,
            bytes: buf,
            video_ts_ms,
        }))
    }
}
