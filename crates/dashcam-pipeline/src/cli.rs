use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reqwest::Url;

use dashcam_engine::EngineConfig;

fn parse_duration_secs(input: &str) -> Result<Duration, String> {
    let secs: u64 = input
        .trim()
        .parse()
        .map_err(|_| format!("invalid seconds value: {input:?}"))?;
    Ok(Duration::from_secs(secs))
}

#[derive(Debug, Clone, Parser)]
#[command(name = "dashcam-pipeline", version, about = "Dashcam video-processing pipeline")]
pub struct Cli {
    /// Directory of input video files (.mp4, .mov, .avi, .mkv).
    pub input_dir: PathBuf,

    /// GPU-lane worker count.
    #[arg(long, env = "NUM_GPU_WORKERS", default_value_t = 2)]
    pub num_gpu_workers: usize,

    /// CPU-lane worker count.
    #[arg(long, env = "NUM_CPU_WORKERS", default_value_t = 4)]
    pub num_cpu_workers: usize,

    /// Concurrent video readers.
    #[arg(long, env = "NUM_VIDEO_READERS", default_value_t = 2)]
    pub num_video_readers: usize,

    /// GPU lane backpressure threshold (combined backlog across GPU categories).
    #[arg(
        long,
        env = "MAX_GPU_BACKLOG",
        default_value_t = EngineConfig::DEFAULT_MAX_GPU_BACKLOG
    )]
    pub max_gpu_backlog: usize,

    /// CPU lane backpressure threshold (combined backlog across CPU categories).
    #[arg(
        long,
        env = "MAX_CPU_BACKLOG",
        default_value_t = EngineConfig::DEFAULT_MAX_CPU_BACKLOG
    )]
    pub max_cpu_backlog: usize,

    /// Per-category soft limit (advisory backpressure flag).
    #[arg(
        long,
        env = "QUEUE_SOFT_LIMIT",
        default_value_t = EngineConfig::DEFAULT_QUEUE_SOFT_LIMIT
    )]
    pub queue_soft_limit: usize,

    /// Per-category hard limit (pushes refused above this).
    #[arg(
        long,
        env = "QUEUE_HARD_LIMIT",
        default_value_t = EngineConfig::DEFAULT_QUEUE_HARD_LIMIT
    )]
    pub queue_hard_limit: usize,

    /// Destination for finalized records. Omit to log records to stderr
    /// instead of posting them anywhere (§4.10 `NoopSink` default).
    #[arg(long, env = "SINK_URL")]
    pub sink_url: Option<Url>,

    /// How often the monitor prints a status snapshot, in seconds.
    #[arg(
        long,
        env = "MONITOR_INTERVAL_SECS",
        default_value = "2",
        value_parser = parse_duration_secs,
    )]
    pub monitor_interval: Duration,

    /// Bounded wait for backlog and worker activity to drain after all
    /// readers finish, before forcing shutdown, in seconds.
    #[arg(
        long,
        env = "DRAIN_TIMEOUT_SECS",
        default_value = "30",
        value_parser = parse_duration_secs,
    )]
    pub drain_timeout: Duration,
}
